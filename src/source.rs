//! PDF access: page geometry, region rasterisation and the text layer.
//!
//! [`PdfSource`] is the seam between the pipeline and whatever owns the PDF.
//! The production implementation, [`PdfiumSource`], opens the document inside
//! every call and lets it drop on return, so the pdfium handle is released on
//! every exit path, including render errors. pdfium is not re-entrant; with
//! the `thread_safe` feature pdfium-render serialises calls, and the pipeline
//! never renders the same document from two threads.

use crate::error::PaperTabError;
use crate::geometry::{BBox, PageSize};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One rectangle to rasterise at a given resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterClip {
    pub bbox: BBox,
    pub dpi: f64,
}

/// Read-only access to one PDF document.
pub trait PdfSource: Send + Sync {
    /// Stable reference used in table ids and reports (file stem, citekey…).
    fn document_ref(&self) -> &str;

    /// Size of every page, in order. The page count is the length.
    ///
    /// Failure here means the document cannot be processed at all.
    fn page_sizes(&self) -> Result<Vec<PageSize>, PaperTabError>;

    /// Rasterise `clips` of 1-indexed `page`, returning one image per clip in
    /// the same order. All clips share one document-open scope.
    fn rasterize(&self, page: usize, clips: &[RasterClip]) -> Result<Vec<DynamicImage>, PaperTabError>;

    /// Text layer inside `bbox`, or `None` when the region has no text.
    fn text_in_region(&self, page: usize, bbox: &BBox) -> Result<Option<String>, PaperTabError>;
}

/// [`PdfSource`] backed by pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumSource {
    path: PathBuf,
    document_ref: String,
    password: Option<String>,
    library_path: Option<PathBuf>,
}

impl PdfiumSource {
    /// Validate `path` and prepare a source. No pdfium call is made yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PaperTabError> {
        let path = path.as_ref().to_path_buf();
        check_pdf_file(&path)?;
        let document_ref = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        debug!("Resolved local PDF: {}", path.display());
        Ok(Self {
            path,
            document_ref,
            password: None,
            library_path: None,
        })
    }

    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    pub fn with_library_path(mut self, dir: Option<PathBuf>) -> Self {
        self.library_path = dir;
        self
    }

    pub fn with_document_ref(mut self, document_ref: impl Into<String>) -> Self {
        self.document_ref = document_ref.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn bind(&self) -> Result<Pdfium, PaperTabError> {
        let bindings = match &self.library_path {
            Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| PaperTabError::PdfiumBindingFailed(format!("{e:?}")))?;
        Ok(Pdfium::new(bindings))
    }

    /// Open the document for the duration of `f`.
    fn with_document<T>(
        &self,
        f: impl FnOnce(&PdfDocument<'_>) -> Result<T, PaperTabError>,
    ) -> Result<T, PaperTabError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(&self.path, self.password.as_deref())
            .map_err(|e| self.classify_load_error(e))?;
        f(&document)
    }

    fn classify_load_error(&self, e: PdfiumError) -> PaperTabError {
        let err_str = format!("{e:?}");
        if err_str.contains("Password") || err_str.contains("password") {
            if self.password.is_some() {
                PaperTabError::WrongPassword {
                    path: self.path.clone(),
                }
            } else {
                PaperTabError::PasswordRequired {
                    path: self.path.clone(),
                }
            }
        } else {
            PaperTabError::CorruptPdf {
                path: self.path.clone(),
                detail: err_str,
            }
        }
    }
}

impl PdfSource for PdfiumSource {
    fn document_ref(&self) -> &str {
        &self.document_ref
    }

    fn page_sizes(&self) -> Result<Vec<PageSize>, PaperTabError> {
        self.with_document(|document| {
            let sizes: Vec<PageSize> = document
                .pages()
                .iter()
                .map(|p| PageSize::new(p.width().value as f64, p.height().value as f64))
                .collect();
            info!("PDF loaded: {} pages", sizes.len());
            Ok(sizes)
        })
    }

    fn rasterize(&self, page: usize, clips: &[RasterClip]) -> Result<Vec<DynamicImage>, PaperTabError> {
        self.with_document(|document| {
            let pdf_page = get_page(document, page)?;
            let mut images = Vec::with_capacity(clips.len());
            for clip in clips {
                let scale = (clip.dpi / 72.0) as f32;
                let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);
                let bitmap = pdf_page.render_with_config(&render_config).map_err(|e| {
                    PaperTabError::RasterisationFailed {
                        page,
                        detail: format!("{e:?}"),
                    }
                })?;
                let full = bitmap.as_image();
                let cropped = crop_to_clip(&full, clip).ok_or_else(|| PaperTabError::RasterisationFailed {
                    page,
                    detail: format!("clip {:?} lies outside the rendered page", clip.bbox),
                })?;
                debug!(
                    "Rendered page {} clip → {}x{} px at {:.0} dpi",
                    page,
                    cropped.width(),
                    cropped.height(),
                    clip.dpi
                );
                images.push(cropped);
            }
            Ok(images)
        })
    }

    fn text_in_region(&self, page: usize, bbox: &BBox) -> Result<Option<String>, PaperTabError> {
        self.with_document(|document| {
            let pdf_page = get_page(document, page)?;
            let height = pdf_page.height().value;
            // pdfium uses a bottom-left origin.
            let rect = PdfRect::new_from_values(
                height - bbox.bottom as f32,
                bbox.x0 as f32,
                height - bbox.top as f32,
                bbox.x1 as f32,
            );
            let text = pdf_page
                .text()
                .map_err(|e| PaperTabError::RasterisationFailed {
                    page,
                    detail: format!("text layer unavailable: {e:?}"),
                })?
                .inside_rect(rect);
            let text = text.trim();
            Ok((!text.is_empty()).then(|| text.to_string()))
        })
    }
}

fn get_page<'a>(document: &PdfDocument<'a>, page: usize) -> Result<PdfPage<'a>, PaperTabError> {
    let pages = document.pages();
    let total = pages.len() as usize;
    if page == 0 || page > total {
        return Err(PaperTabError::PageOutOfRange { page, total });
    }
    pages
        .get((page - 1) as u16)
        .map_err(|e| PaperTabError::RasterisationFailed {
            page,
            detail: format!("{e:?}"),
        })
}

/// Crop a full-page render down to `clip`, converting points to pixels.
///
/// Returns `None` when the clip does not intersect the image.
pub(crate) fn crop_to_clip(full: &DynamicImage, clip: &RasterClip) -> Option<DynamicImage> {
    let scale = clip.dpi / 72.0;
    let (w, h) = (full.width() as f64, full.height() as f64);
    let x0 = (clip.bbox.x0 * scale).floor().clamp(0.0, w);
    let y0 = (clip.bbox.top * scale).floor().clamp(0.0, h);
    let x1 = (clip.bbox.x1 * scale).ceil().clamp(0.0, w);
    let y1 = (clip.bbox.bottom * scale).ceil().clamp(0.0, h);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(full.crop_imm(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
}

/// Check existence, readability and the `%PDF` magic bytes.
fn check_pdf_file(path: &Path) -> Result<(), PaperTabError> {
    if !path.exists() {
        return Err(PaperTabError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    match std::fs::File::open(path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                return Err(PaperTabError::NotAPdf {
                    path: path.to_path_buf(),
                    magic,
                });
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => Err(PaperTabError::PermissionDenied {
            path: path.to_path_buf(),
        }),
        Err(_) => Err(PaperTabError::FileNotFound {
            path: path.to_path_buf(),
        }),
    }
}
