//! Pipeline stages for table extraction.
//!
//! Each submodule implements exactly one transformation step, so each is
//! independently testable; [`crate::extract`] sequences them.
//!
//! ## Data Flow
//!
//! ```text
//! captions ──▶ plan ──▶ render ──▶ request ──▶ (batch) ──▶ parse ──┬──▶ normalize
//!                         ▲                                        │
//!                         └──────────── recrop ◀───────────────────┘  (at most once)
//! ```
//!
//! 1. [`plan`]      — caption anchors → page regions
//! 2. [`render`]    — adaptive-DPI rasterisation, tall regions split into strips
//! 3. [`encode`]    — PNG encoding and base64 for request bodies
//! 4. [`request`]   — one batch request per region, shared cached instructions
//! 5. [`parse`]     — strict decode of the model answer into a tagged result
//! 6. [`recrop`]    — model-relative box → absolute page box for the retry
//! 7. [`normalize`] — cell-string cleanup of surviving tables

pub mod encode;
pub mod normalize;
pub mod parse;
pub mod plan;
pub mod recrop;
pub mod render;
pub mod request;
