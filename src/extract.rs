//! Extraction entry points and the per-table state machine.
//!
//! A run has four phases, each finished for every document before the next
//! starts:
//!
//! 1. **Plan** — captions → regions, one [`TableRun`] per surviving caption.
//! 2. **First pass** — render every region, submit *one* batch, parse.
//! 3. **Recrop pass** — tables whose answer asked for a tighter box are
//!    re-rendered and submitted in *one* second batch. Never more than once.
//! 4. **Merge** — keep the recrop answer only when it is complete, resolve
//!    captions, normalise cells, emit one [`ExtractedTable`] and one
//!    [`VisionDetail`] per table.
//!
//! Table-level failures (render, provider, parse, missing result) end that
//! table in `Done` with a failure result; only a document whose page
//! geometry cannot be read is failed as a whole.

use crate::config::ExtractionConfig;
use crate::error::{PaperTabError, TableError};
use crate::geometry::{BBox, PageSize};
use crate::output::{
    Caption, DocumentExtraction, DocumentOutcome, ExtractedTable, ExtractionStats, RegionSpec, SkipReason,
    SkippedCaption, TableState, VisionDetail,
};
use crate::pipeline::normalize::{CellNormalizer, TextCleaner};
use crate::pipeline::parse::{self, ParsedResult};
use crate::pipeline::plan::{self, CropSlot};
use crate::pipeline::recrop;
use crate::pipeline::render::{self, RenderedRegion};
use crate::pipeline::request::{self, JobRequest, RequestBuilder};
use crate::progress::BatchPass;
use crate::prompts::TRANSCRIBER_SYSTEM_PROMPT;
use crate::provider::{resolve_provider, run_batch, BatchOutcome, BatchProvider, TokenUsage};
use crate::source::{PdfSource, PdfiumSource};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Longest document key kept in a table id.
const MAX_DOC_KEY_CHARS: usize = 32;
/// Longest caption number kept in a table id.
const MAX_NUMBER_CHARS: usize = 8;

/// One document of a corpus run.
#[derive(Clone)]
pub struct DocumentJob {
    pub source: Arc<dyn PdfSource>,
    /// Every caption detected in the document, each page's in vertical order.
    pub captions: Vec<Caption>,
}

impl DocumentJob {
    pub fn new(source: Arc<dyn PdfSource>, captions: Vec<Caption>) -> Self {
        Self { source, captions }
    }
}

impl std::fmt::Debug for DocumentJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentJob")
            .field("document_ref", &self.source.document_ref())
            .field("captions", &self.captions.len())
            .finish()
    }
}

/// Extract every captioned table from a PDF file.
///
/// # Errors
/// Returns `Err` only for fatal conditions: the file cannot be opened or is
/// not a PDF, its pages cannot be measured, or no provider is configured.
/// Per-table failures are reported in the output's [`VisionDetail`]s.
pub async fn extract_pdf(
    path: impl AsRef<Path>,
    captions: Vec<Caption>,
    config: &ExtractionConfig,
) -> Result<DocumentExtraction, PaperTabError> {
    let source = open_source(path.as_ref(), config)?;
    extract_document(Arc::new(source), captions, config).await
}

/// Extract tables from one already-open document.
pub async fn extract_document(
    source: Arc<dyn PdfSource>,
    captions: Vec<Caption>,
    config: &ExtractionConfig,
) -> Result<DocumentExtraction, PaperTabError> {
    let provider = resolve_provider(config)?;
    let planned = plan_document(source, captions, &mut TableIds::new(), config).await?;
    run(vec![planned], provider.as_ref(), config)
        .await
        .pop()
        .ok_or_else(|| PaperTabError::Internal("extraction produced no document".into()))
}

/// Extract tables from many documents with one first-pass batch and at most
/// one recrop batch for the whole corpus.
///
/// The output is position-aligned with `jobs`. A document that cannot be
/// measured becomes [`DocumentOutcome::Failed`] and the rest proceed.
///
/// # Errors
/// Only provider resolution is fatal to the corpus.
pub async fn extract_corpus(
    jobs: Vec<DocumentJob>,
    config: &ExtractionConfig,
) -> Result<Vec<DocumentOutcome>, PaperTabError> {
    let provider = resolve_provider(config)?;

    // One batch carries every document, so ids are allocated corpus-wide.
    let mut ids = TableIds::new();
    let mut planned = Vec::with_capacity(jobs.len());
    let mut slots: Vec<Option<DocumentOutcome>> = Vec::with_capacity(jobs.len());
    for job in jobs {
        let document_ref = job.source.document_ref().to_string();
        match plan_document(job.source, job.captions, &mut ids, config).await {
            Ok(p) => {
                planned.push(p);
                slots.push(None);
            }
            Err(e) => {
                warn!("{}: skipped — {}", document_ref, e);
                slots.push(Some(DocumentOutcome::Failed {
                    document_ref,
                    error: e.to_string(),
                }));
            }
        }
    }

    let mut extracted = run(planned, provider.as_ref(), config).await.into_iter();
    Ok(slots
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| match extracted.next() {
                Some(doc) => DocumentOutcome::Extracted(doc),
                None => DocumentOutcome::Failed {
                    document_ref: String::new(),
                    error: "extraction produced no document".into(),
                },
            })
        })
        .collect())
}

/// Extract tables from a PDF and write the result as JSON.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn extract_to_file(
    path: impl AsRef<Path>,
    captions: Vec<Caption>,
    output_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionStats, PaperTabError> {
    let extraction = extract_pdf(path, captions, config).await?;
    let out = output_path.as_ref();
    let json = serde_json::to_vec_pretty(&extraction)
        .map_err(|e| PaperTabError::Internal(format!("serialising output: {e}")))?;
    write_atomic(out, &json).await?;
    Ok(extraction.stats)
}

/// Page sizes of a PDF, without contacting any provider.
pub async fn inspect(path: impl AsRef<Path>, config: &ExtractionConfig) -> Result<Vec<PageSize>, PaperTabError> {
    let source: Arc<dyn PdfSource> = Arc::new(open_source(path.as_ref(), config)?);
    page_sizes(source).await
}

pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PaperTabError> {
    let write_failed = |source: std::io::Error| PaperTabError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, bytes).await.map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_failed)?;
    Ok(())
}

fn open_source(path: &Path, config: &ExtractionConfig) -> Result<PdfiumSource, PaperTabError> {
    Ok(PdfiumSource::open(path)?
        .with_password(config.password.clone())
        .with_library_path(config.pdfium_library_path.clone()))
}

async fn page_sizes(source: Arc<dyn PdfSource>) -> Result<Vec<PageSize>, PaperTabError> {
    tokio::task::spawn_blocking(move || source.page_sizes())
        .await
        .map_err(|e| PaperTabError::Internal(format!("page size task panicked: {e}")))?
}

// ── Planning ─────────────────────────────────────────────────────────────

/// A document after planning, carrying its tables through both passes.
struct PlannedDocument {
    source: Arc<dyn PdfSource>,
    document_ref: String,
    page_count: usize,
    tables: Vec<TableRun>,
    skipped: Vec<SkippedCaption>,
    stats: ExtractionStats,
    started: Instant,
}

async fn plan_document(
    source: Arc<dyn PdfSource>,
    captions: Vec<Caption>,
    ids: &mut TableIds,
    config: &ExtractionConfig,
) -> Result<PlannedDocument, PaperTabError> {
    let started = Instant::now();
    let document_ref = source.document_ref().to_string();
    let sizes = page_sizes(Arc::clone(&source)).await?;
    debug!("{}: {} pages, {} captions", document_ref, sizes.len(), captions.len());

    let mut by_page: BTreeMap<usize, Vec<Caption>> = BTreeMap::new();
    for caption in captions {
        by_page.entry(caption.page).or_default().push(caption);
    }

    let doc_key = ids.document(&document_ref);
    let mut tables = Vec::new();
    let mut skipped = Vec::new();

    for (page, page_captions) in by_page {
        let Some(size) = page.checked_sub(1).and_then(|i| sizes.get(i)).copied() else {
            warn!(
                "{}: {} captions on page {} of a {}-page document",
                document_ref,
                page_captions.len(),
                page,
                sizes.len()
            );
            skipped.extend(page_captions.iter().map(|c| SkippedCaption {
                page,
                number: c.number.clone(),
                reason: SkipReason::PageOutOfRange,
            }));
            continue;
        };

        let slots = plan::plan_page(&page_captions, size, config.min_region_height);
        let mut ordinal = 0;
        for (caption, slot) in page_captions.iter().zip(slots) {
            if caption.is_table() {
                ordinal += 1;
            }
            match slot {
                CropSlot::Region(bbox) => {
                    let table_id = ids.next(&doc_key, page, &caption.number, ordinal);
                    tables.push(TableRun::new(
                        RegionSpec {
                            document_ref: document_ref.clone(),
                            page_number: page,
                            bbox,
                            table_id,
                        },
                        caption.text.clone(),
                    ));
                }
                CropSlot::Skipped(reason) => {
                    if reason == SkipReason::DegenerateRegion {
                        info!("{}: table {} on page {} has no usable region", document_ref, caption.number, page);
                    }
                    skipped.push(SkippedCaption {
                        page,
                        number: caption.number.clone(),
                        reason,
                    });
                }
            }
        }
    }

    Ok(PlannedDocument {
        source,
        document_ref,
        page_count: sizes.len(),
        tables,
        skipped,
        stats: ExtractionStats::default(),
        started,
    })
}

/// Allocates `{doc_key}_p{page}_t{number}` ids, unique across one run.
struct TableIds {
    doc_keys: HashSet<String>,
    used: HashSet<String>,
}

impl TableIds {
    fn new() -> Self {
        Self {
            doc_keys: HashSet::new(),
            used: HashSet::new(),
        }
    }

    /// Reserve a key for one document, distinct from every key handed out
    /// before and at most `MAX_DOC_KEY_CHARS` long.
    fn document(&mut self, document_ref: &str) -> String {
        let mut key = id_fragment(document_ref, MAX_DOC_KEY_CHARS);
        if key.is_empty() {
            key = "doc".to_string();
        }
        let mut candidate = key.clone();
        let mut n = 2;
        while self.doc_keys.contains(&candidate) {
            let suffix = format!("_{n}");
            let stem: String = key.chars().take(MAX_DOC_KEY_CHARS - suffix.len()).collect();
            candidate = format!("{stem}{suffix}");
            n += 1;
        }
        self.doc_keys.insert(candidate.clone());
        candidate
    }

    fn next(&mut self, doc_key: &str, page: usize, number: &str, ordinal: usize) -> String {
        let mut number = id_fragment(number, MAX_NUMBER_CHARS);
        if number.is_empty() {
            number = ordinal.to_string();
        }
        let base = format!("{doc_key}_p{page}_t{number}");
        let mut candidate = base.clone();
        let mut n = 2;
        while self.used.contains(&candidate) {
            candidate = format!("{base}_{n}");
            n += 1;
        }
        self.used.insert(candidate.clone());
        candidate
    }
}

/// Map to `[A-Za-z0-9_-]`, replacing anything else with `_`.
fn id_fragment(raw: &str, max_chars: usize) -> String {
    raw.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(max_chars)
        .collect()
}

// ── Per-table state ──────────────────────────────────────────────────────

struct TableRun {
    region: RegionSpec,
    text_caption: String,
    state: TableState,
    /// Images sent on the first pass.
    images: usize,
    /// Request waiting for the next batch.
    pending: Option<JobRequest>,
    first: Option<ParsedResult>,
    second: Option<ParsedResult>,
    recrop_bbox: Option<BBox>,
    /// Failure behind the first-pass result, if any.
    error: Option<TableError>,
}

impl TableRun {
    fn new(region: RegionSpec, text_caption: String) -> Self {
        Self {
            region,
            text_caption,
            state: TableState::Planned,
            images: 0,
            pending: None,
            first: None,
            second: None,
            recrop_bbox: None,
            error: None,
        }
    }

    fn advance(&mut self, next: TableState) {
        debug!("{}: {:?} → {:?}", self.region.table_id, self.state, next);
        self.state = next;
    }

    /// The region rendered on the current pass.
    fn current_region(&self) -> RegionSpec {
        match self.recrop_bbox {
            Some(bbox) => RegionSpec {
                bbox,
                ..self.region.clone()
            },
            None => self.region.clone(),
        }
    }

    /// Best caption known before any answer is merged.
    fn best_caption(&self) -> &str {
        self.first
            .as_ref()
            .and_then(ParsedResult::answer)
            .map(|a| a.caption.as_str())
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(self.text_caption.as_str())
    }

    fn rendered(&mut self, pass: BatchPass, rendered: RenderedRegion, builder: &RequestBuilder) {
        let request = builder.build(
            &self.current_region(),
            &rendered.images,
            rendered.text_excerpt.as_deref(),
            self.best_caption(),
        );
        self.pending = Some(request);
        match pass {
            BatchPass::First => {
                self.images = rendered.images.len();
                self.advance(TableState::Rendered);
            }
            BatchPass::Recrop => self.advance(TableState::ReRendered),
        }
    }

    fn render_failed(&mut self, pass: BatchPass, error: TableError) {
        warn!("{} ({}): {}", self.region.table_id, pass, error);
        match pass {
            BatchPass::First => {
                self.first = Some(ParsedResult::failure(""));
                self.error = Some(error);
            }
            BatchPass::Recrop => self.second = Some(ParsedResult::failure("")),
        }
        self.advance(TableState::Done);
    }

    fn parsed(&mut self, pass: BatchPass, result: ParsedResult, error: Option<TableError>) {
        match pass {
            BatchPass::First => {
                self.first = Some(result);
                self.error = error;
                self.advance(TableState::Parsed);
            }
            BatchPass::Recrop => {
                if let Some(e) = error {
                    warn!("{} (recrop): {}", self.region.table_id, e);
                }
                self.second = Some(result);
                self.advance(TableState::ReParsed);
            }
        }
    }

    /// `Parsed → RecropPending | Done`. Returns whether a recrop was scheduled.
    fn decide_recrop(&mut self) -> bool {
        let request = self.first.as_ref().and_then(ParsedResult::recrop_request);
        match request {
            Some(pct) => {
                let bbox = recrop::recompute(&self.region.bbox, pct);
                debug!("{}: recrop {:?} → {:?}", self.region.table_id, self.region.bbox, bbox);
                self.recrop_bbox = Some(bbox);
                self.advance(TableState::RecropPending);
                true
            }
            None => {
                self.advance(TableState::Done);
                false
            }
        }
    }

    /// `ReParsed → Done`. Returns whether the recrop answer replaced the first.
    fn settle_recrop(&mut self) -> bool {
        let accepted = self.recrop_accepted();
        if !accepted {
            debug!("{}: recrop discarded, keeping first pass", self.region.table_id);
        }
        self.advance(TableState::Done);
        accepted
    }

    fn recrop_accepted(&self) -> bool {
        matches!(&self.second, Some(ParsedResult::Success(a)) if !a.is_incomplete)
    }

    fn finish(self, normalizer: &dyn CellNormalizer) -> (ExtractedTable, VisionDetail) {
        debug_assert_eq!(self.state, TableState::Done, "{} never reached Done", self.region.table_id);

        let accepted = self.recrop_accepted();
        let (kept, bbox) = match (accepted, self.second, self.recrop_bbox) {
            (true, Some(second), Some(bbox)) => (second, bbox),
            _ => (self.first.unwrap_or_else(|| ParsedResult::failure("")), self.region.bbox),
        };

        let vision_caption = kept.answer().map(|a| a.caption.clone()).unwrap_or_default();
        let caption = if !vision_caption.trim().is_empty() {
            normalizer.normalize(&vision_caption)
        } else {
            normalizer.normalize(&self.text_caption)
        };

        let error = if accepted { None } else { self.error };
        let table = match &kept {
            ParsedResult::Success(a) => ExtractedTable {
                table_id: self.region.table_id.clone(),
                page: self.region.page_number,
                bbox,
                table_label: a.table_label.clone(),
                caption,
                headers: normalizer.normalize_row(&a.headers),
                rows: a.rows.iter().map(|r| normalizer.normalize_row(r)).collect(),
                footnotes: a.footnotes.clone(),
                is_incomplete: a.is_incomplete,
                incomplete_reason: a.incomplete_reason.clone(),
            },
            ParsedResult::Failure { .. } => ExtractedTable {
                table_id: self.region.table_id.clone(),
                page: self.region.page_number,
                bbox,
                table_label: String::new(),
                caption,
                headers: Vec::new(),
                rows: Vec::new(),
                footnotes: String::new(),
                is_incomplete: true,
                incomplete_reason: Some(
                    error
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "no usable answer".to_string()),
                ),
            },
        };

        let detail = VisionDetail {
            table_id: self.region.table_id,
            page: self.region.page_number,
            text_layer_caption: self.text_caption,
            vision_caption,
            recropped: self.recrop_bbox.is_some(),
            parse_success: kept.is_success(),
            images: self.images,
            recrop_bbox: self.recrop_bbox,
            final_state: self.state,
            error,
        };
        (table, detail)
    }
}

// ── Passes ───────────────────────────────────────────────────────────────

async fn run(
    mut docs: Vec<PlannedDocument>,
    provider: &dyn BatchProvider,
    config: &ExtractionConfig,
) -> Vec<DocumentExtraction> {
    let total_tables: usize = docs.iter().map(|d| d.tables.len()).sum();
    info!("Extracting {} tables from {} documents", total_tables, docs.len());
    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_start(docs.len(), total_tables);
    }

    let builder = RequestBuilder::new(
        config.system_prompt.as_deref().unwrap_or(TRANSCRIBER_SYSTEM_PROMPT),
        config.model.clone(),
        config.max_tokens,
        config.temperature,
    );

    // ── First pass ───────────────────────────────────────────────────────
    render_pass(&mut docs, BatchPass::First, &builder, config).await;
    batch_pass(&mut docs, BatchPass::First, provider, config).await;

    // ── Recrop pass ──────────────────────────────────────────────────────
    let mut recrops = 0;
    for doc in docs.iter_mut() {
        for table in doc.tables.iter_mut().filter(|t| t.state == TableState::Parsed) {
            if table.decide_recrop() {
                doc.stats.recrops_attempted += 1;
                recrops += 1;
            }
        }
    }
    if recrops > 0 {
        info!("{} tables requested a recrop", recrops);
        render_pass(&mut docs, BatchPass::Recrop, &builder, config).await;
        batch_pass(&mut docs, BatchPass::Recrop, provider, config).await;
        for doc in docs.iter_mut() {
            for table in doc.tables.iter_mut().filter(|t| t.state == TableState::ReParsed) {
                if table.settle_recrop() {
                    doc.stats.recrops_accepted += 1;
                }
            }
        }
    }

    // ── Merge ────────────────────────────────────────────────────────────
    let default_normalizer = TextCleaner;
    let normalizer: &dyn CellNormalizer = config.normalizer.as_deref().unwrap_or(&default_normalizer);

    let mut succeeded_total = 0;
    let out: Vec<DocumentExtraction> = docs
        .into_iter()
        .map(|doc| {
            let mut stats = doc.stats;
            let mut tables = Vec::with_capacity(doc.tables.len());
            let mut vision_details = Vec::with_capacity(doc.tables.len());
            for run in doc.tables {
                let (table, detail) = run.finish(normalizer);
                if let Some(ref cb) = config.progress_callback {
                    cb.on_table_complete(&detail);
                }
                if !detail.parse_success {
                    stats.parse_failures += 1;
                }
                tables.push(table);
                vision_details.push(detail);
            }
            stats.tables = tables.len();
            stats.total_duration_ms = doc.started.elapsed().as_millis() as u64;
            succeeded_total += stats.tables - stats.parse_failures;
            info!(
                "{}: {}/{} tables parsed, {} recropped ({} accepted), {}ms",
                doc.document_ref,
                stats.tables - stats.parse_failures,
                stats.tables,
                stats.recrops_attempted,
                stats.recrops_accepted,
                stats.total_duration_ms
            );
            DocumentExtraction {
                document_ref: doc.document_ref,
                page_count: doc.page_count,
                tables,
                vision_details,
                skipped_captions: doc.skipped,
                stats,
            }
        })
        .collect();

    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_complete(total_tables, succeeded_total);
    }
    out
}

/// Render the tables due on `pass` and queue their requests.
async fn render_pass(docs: &mut [PlannedDocument], pass: BatchPass, builder: &RequestBuilder, config: &ExtractionConfig) {
    let due = match pass {
        BatchPass::First => TableState::Planned,
        BatchPass::Recrop => TableState::RecropPending,
    };
    let settings = config.render_settings();

    for doc in docs.iter_mut() {
        let indices: Vec<usize> = (0..doc.tables.len()).filter(|&i| doc.tables[i].state == due).collect();
        if indices.is_empty() {
            continue;
        }
        let start = Instant::now();
        let regions = indices.iter().map(|&i| doc.tables[i].current_region()).collect();
        let rendered = render::render_regions(Arc::clone(&doc.source), regions, settings).await;

        for (&i, result) in indices.iter().zip(rendered) {
            let table = &mut doc.tables[i];
            match result {
                Ok(region) => {
                    doc.stats.images_rendered += region.images.len();
                    table.rendered(pass, region, builder);
                }
                Err(e) => table.render_failed(pass, e),
            }
        }
        let elapsed = start.elapsed().as_millis() as u64;
        doc.stats.render_duration_ms += elapsed;
        debug!("{}: rendered {} regions ({}) in {}ms", doc.document_ref, indices.len(), pass, elapsed);
    }
}

/// Submit every queued request as one batch and parse the outcomes.
async fn batch_pass(docs: &mut [PlannedDocument], pass: BatchPass, provider: &dyn BatchProvider, config: &ExtractionConfig) {
    let (submitted, parsed) = match pass {
        BatchPass::First => (TableState::Submitted, TableState::Parsed),
        BatchPass::Recrop => (TableState::ReSubmitted, TableState::ReParsed),
    };

    let mut requests = Vec::new();
    for doc in docs.iter_mut() {
        for table in doc.tables.iter_mut() {
            if let Some(request) = table.pending.take() {
                requests.push(request);
                table.advance(submitted);
            }
        }
    }
    if requests.is_empty() {
        return;
    }

    let start = Instant::now();
    let outcome = run_batch(provider, &requests, config, pass).await;
    let elapsed = start.elapsed().as_millis() as u64;
    drop(requests);

    let mut results = match outcome {
        Ok(map) => Ok(map),
        Err(e) => {
            warn!("{} batch failed: {}", pass, e);
            Err(e.to_string())
        }
    };

    for doc in docs.iter_mut() {
        let mut participated = false;
        for table in doc.tables.iter_mut().filter(|t| t.state == submitted) {
            participated = true;
            let table_id = table.region.table_id.clone();
            let (result, usage, error) = match results.as_mut() {
                Ok(map) => {
                    let custom_id = request::custom_id(&table_id);
                    let outcome = map.remove(&custom_id);
                    resolve_outcome(&table_id, custom_id, outcome)
                }
                Err(detail) => (
                    ParsedResult::failure(""),
                    TokenUsage::default(),
                    Some(TableError::BatchFailed {
                        table_id,
                        detail: detail.clone(),
                    }),
                ),
            };
            add_usage(&mut doc.stats, usage);
            table.parsed(pass, result, error);
            debug_assert_eq!(table.state, parsed);
        }
        if participated {
            doc.stats.batch_duration_ms += elapsed;
        }
    }

    if let Ok(map) = results {
        if !map.is_empty() {
            warn!("{} batch returned {} unexpected results", pass, map.len());
        }
    }
}

/// One batch outcome → a parse result. A missing entry is a plain failure.
fn resolve_outcome(
    table_id: &str,
    custom_id: String,
    outcome: Option<BatchOutcome>,
) -> (ParsedResult, TokenUsage, Option<TableError>) {
    let failed = |error: TableError| (ParsedResult::failure(""), TokenUsage::default(), Some(error));
    match outcome {
        Some(BatchOutcome::Succeeded { text, usage }) => {
            let result = parse::parse(&text);
            let error = (!result.is_success()).then(|| TableError::Unparseable {
                table_id: table_id.to_string(),
            });
            (result, usage, error)
        }
        Some(BatchOutcome::Errored { message }) => failed(TableError::ProviderFailed {
            table_id: table_id.to_string(),
            detail: message,
        }),
        Some(BatchOutcome::Canceled) => failed(TableError::BatchFailed {
            table_id: table_id.to_string(),
            detail: "request canceled".into(),
        }),
        Some(BatchOutcome::Expired) => failed(TableError::BatchFailed {
            table_id: table_id.to_string(),
            detail: "request expired".into(),
        }),
        None => failed(TableError::MissingResult {
            table_id: table_id.to_string(),
            custom_id,
        }),
    }
}

fn add_usage(stats: &mut ExtractionStats, usage: TokenUsage) {
    stats.input_tokens += usage.input_tokens;
    stats.output_tokens += usage.output_tokens;
    stats.cache_read_tokens += usage.cache_read_tokens;
    stats.cache_creation_tokens += usage.cache_creation_tokens;
}
