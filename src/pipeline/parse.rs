//! Parsing of the model's answer into a [`ParsedResult`].
//!
//! There is exactly one decode attempt over the full answer text. If it is not
//! a JSON object matching [`AnswerSchema`] the result is
//! [`ParsedResult::Failure`] carrying the raw text; there is no fence
//! stripping, regex fallback or re-scan. Within a decoded object the only
//! leniency is the recrop signal: an invalid `recrop` is cleared without
//! failing the rest of the answer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of one extraction attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ParsedResult {
    Success(TableAnswer),
    Failure { raw_response: String },
}

impl ParsedResult {
    /// A fresh failure value.
    pub fn failure(raw_response: impl Into<String>) -> Self {
        ParsedResult::Failure {
            raw_response: raw_response.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ParsedResult::Success(_))
    }

    pub fn answer(&self) -> Option<&TableAnswer> {
        match self {
            ParsedResult::Success(a) => Some(a),
            ParsedResult::Failure { .. } => None,
        }
    }

    /// Relative recrop box, only when a recrop was requested with a valid box.
    pub fn recrop_request(&self) -> Option<[f64; 4]> {
        self.answer()
            .filter(|a| a.recrop.needed)
            .and_then(|a| a.recrop.bbox_pct)
    }

    /// Headers of a success, empty for a failure.
    pub fn headers(&self) -> &[String] {
        self.answer().map(|a| a.headers.as_slice()).unwrap_or(&[])
    }

    /// Rows of a success, empty for a failure.
    pub fn rows(&self) -> &[Vec<String>] {
        self.answer().map(|a| a.rows.as_slice()).unwrap_or(&[])
    }
}

/// A successfully decoded answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableAnswer {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub footnotes: String,
    pub table_label: String,
    pub caption: String,
    pub is_incomplete: bool,
    pub incomplete_reason: Option<String>,
    /// `(rows, columns)` as decoded, before any normalisation.
    pub raw_shape: (usize, usize),
    pub recrop: RecropSignal,
}

/// The model's request for a second, tighter rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RecropSignal {
    pub needed: bool,
    /// `[x0, y0, x1, y1]` as fractions of the rendered region.
    pub bbox_pct: Option<[f64; 4]>,
}

/// Wire schema of the answer object.
#[derive(Debug, Deserialize)]
struct AnswerSchema {
    #[serde(default)]
    headers: Option<Vec<Option<Scalar>>>,
    #[serde(default)]
    rows: Option<Vec<Vec<Option<Scalar>>>>,
    #[serde(default)]
    footnotes: Option<Footnotes>,
    #[serde(default)]
    table_label: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    is_incomplete: Option<bool>,
    #[serde(default)]
    incomplete_reason: Option<String>,
    /// Validated by hand so a bad signal does not sink the whole answer.
    #[serde(default)]
    recrop: Option<Value>,
}

/// A cell value; models emit bare numbers for numeric cells.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
}

impl Scalar {
    fn into_cell(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Number(n) => n.to_string(),
            Scalar::Bool(b) => b.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Footnotes {
    One(String),
    Many(Vec<String>),
}

fn cells(values: Vec<Option<Scalar>>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.map(Scalar::into_cell).unwrap_or_default())
        .collect()
}

/// Parse a raw model answer.
pub fn parse(raw_text: &str) -> ParsedResult {
    let value: Value = match serde_json::from_str(raw_text) {
        Ok(v) => v,
        Err(_) => return ParsedResult::failure(raw_text),
    };
    if !value.is_object() {
        return ParsedResult::failure(raw_text);
    }
    let schema: AnswerSchema = match serde_json::from_value(value) {
        Ok(s) => s,
        Err(_) => return ParsedResult::failure(raw_text),
    };

    let headers = cells(schema.headers.unwrap_or_default());
    let rows: Vec<Vec<String>> = schema.rows.unwrap_or_default().into_iter().map(cells).collect();
    let cols = if !headers.is_empty() {
        headers.len()
    } else {
        rows.first().map(Vec::len).unwrap_or(0)
    };

    ParsedResult::Success(TableAnswer {
        raw_shape: (rows.len(), cols),
        headers,
        rows,
        footnotes: match schema.footnotes {
            Some(Footnotes::One(s)) => s,
            Some(Footnotes::Many(lines)) => lines.join("\n"),
            None => String::new(),
        },
        table_label: schema.table_label.unwrap_or_default(),
        caption: schema.caption.unwrap_or_default(),
        is_incomplete: schema.is_incomplete.unwrap_or(false),
        incomplete_reason: schema.incomplete_reason,
        recrop: schema.recrop.as_ref().map(recrop_signal).unwrap_or_default(),
    })
}

/// Accept a recrop only with exactly four numbers, each in `[0, 1]`.
fn recrop_signal(value: &Value) -> RecropSignal {
    let needed = value.get("needed").and_then(Value::as_bool).unwrap_or(false);
    let bbox_pct = value
        .get("bbox_pct")
        .and_then(Value::as_array)
        .filter(|arr| arr.len() == 4)
        .and_then(|arr| {
            let mut out = [0.0; 4];
            for (slot, v) in out.iter_mut().zip(arr) {
                let f = v.as_f64().filter(|f| (0.0..=1.0).contains(f))?;
                *slot = f;
            }
            Some(out)
        });
    match bbox_pct {
        Some(pct) => RecropSignal {
            needed,
            bbox_pct: Some(pct),
        },
        None => RecropSignal::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_json_is_failure_with_raw_text() {
        let result = parse("not json");
        assert_eq!(result, ParsedResult::failure("not json"));
        assert!(result.headers().is_empty());
        assert!(result.rows().is_empty());
    }

    #[test]
    fn non_object_top_level_is_failure() {
        assert!(!parse("[1, 2, 3]").is_success());
        assert!(!parse("\"table\"").is_success());
        assert!(!parse("null").is_success());
    }

    #[test]
    fn fenced_json_is_not_recovered() {
        let raw = "```json\n{\"headers\": [\"a\"]}\n```";
        assert_eq!(parse(raw), ParsedResult::failure(raw));
    }

    #[test]
    fn trailing_prose_is_failure() {
        assert!(!parse("{\"headers\": []} Hope this helps!").is_success());
    }

    #[test]
    fn empty_object_takes_defaults() {
        let answer = parse("{}").answer().cloned().unwrap();
        assert_eq!(answer, TableAnswer::default());
        assert_eq!(answer.raw_shape, (0, 0));
    }

    #[test]
    fn full_answer_is_decoded() {
        let raw = r#"{
            "table_label": "Table 2",
            "caption": "Accuracy by model",
            "headers": ["Model", "Acc", "F1"],
            "rows": [["A", 0.91, "0.88"], ["B", null, true]],
            "footnotes": ["* p < 0.05", "† tuned"],
            "is_incomplete": true,
            "incomplete_reason": "bottom rows cut off",
            "recrop": {"needed": true, "bbox_pct": [0.0, 0.1, 1, 0.95]}
        }"#;
        let a = parse(raw).answer().cloned().unwrap();
        assert_eq!(a.table_label, "Table 2");
        assert_eq!(a.rows[0], vec!["A", "0.91", "0.88"]);
        assert_eq!(a.rows[1], vec!["B", "", "true"]);
        assert_eq!(a.footnotes, "* p < 0.05\n† tuned");
        assert!(a.is_incomplete);
        assert_eq!(a.raw_shape, (2, 3));
        assert_eq!(
            a.recrop,
            RecropSignal {
                needed: true,
                bbox_pct: Some([0.0, 0.1, 1.0, 0.95])
            }
        );
    }

    #[test]
    fn shape_falls_back_to_first_row() {
        let a = parse(r#"{"rows": [["1","2","3","4"], ["5"]]}"#).answer().cloned().unwrap();
        assert_eq!(a.raw_shape, (2, 4));
    }

    #[test]
    fn null_fields_take_defaults() {
        let a = parse(r#"{"headers": null, "rows": null, "caption": null, "recrop": null}"#)
            .answer()
            .cloned()
            .unwrap();
        assert!(a.headers.is_empty());
        assert_eq!(a.caption, "");
        assert!(!a.recrop.needed);
    }

    #[test]
    fn out_of_range_recrop_is_cleared_but_answer_kept() {
        let a = parse(r#"{"headers": ["x"], "recrop": {"needed": true, "bbox_pct": [0.1, 0.1, 1.2, 0.9]}}"#)
            .answer()
            .cloned()
            .unwrap();
        assert_eq!(a.headers, vec!["x"]);
        assert_eq!(a.recrop, RecropSignal::default());
    }

    #[test]
    fn wrong_arity_recrop_is_cleared() {
        for bad in [
            r#"{"recrop": {"needed": true, "bbox_pct": [0.1, 0.1, 0.9]}}"#,
            r#"{"recrop": {"needed": true, "bbox_pct": [0.1, 0.1, 0.9, 0.9, 0.5]}}"#,
            r#"{"recrop": {"needed": true, "bbox_pct": ["0.1", 0.1, 0.9, 0.9]}}"#,
            r#"{"recrop": {"needed": true}}"#,
            r#"{"recrop": "yes"}"#,
        ] {
            let result = parse(bad);
            assert!(result.is_success(), "{bad}");
            assert_eq!(result.recrop_request(), None, "{bad}");
            assert_eq!(result.answer().unwrap().recrop, RecropSignal::default(), "{bad}");
        }
    }

    #[test]
    fn recrop_request_requires_needed() {
        let result = parse(r#"{"recrop": {"needed": false, "bbox_pct": [0.1, 0.1, 0.9, 0.9]}}"#);
        assert_eq!(result.recrop_request(), None);
        let result = parse(r#"{"recrop": {"needed": true, "bbox_pct": [0.1, 0.1, 0.9, 0.9]}}"#);
        assert_eq!(result.recrop_request(), Some([0.1, 0.1, 0.9, 0.9]));
    }

    #[test]
    fn wrongly_typed_core_field_is_failure() {
        assert!(!parse(r#"{"headers": "Model, Acc"}"#).is_success());
        assert!(!parse(r#"{"rows": [[{"v": 1}]]}"#).is_success());
        assert!(!parse(r#"{"is_incomplete": "true"}"#).is_success());
    }

    #[test]
    fn parse_is_idempotent() {
        for raw in ["not json", "{}", r#"{"headers":["a"],"rows":[["1"]],"recrop":{"needed":true,"bbox_pct":[0,0,1,1]}}"#] {
            assert_eq!(parse(raw), parse(raw));
        }
    }
}
