//! fillsign - PDF form-field discovery, splitting and fill/sign
//! reconciliation.
//!
//! The engine behind a fill-and-sign flow: load a PDF, discover its
//! native form fields and their on-page geometry, decide which wide
//! fields are really rows of digit boxes (SSN/EIN combs), hand the
//! result to a UI as an annotation model, and flatten the edited model
//! back into a new PDF. Rendering and document mutation are delegated
//! to an external document model (lopdf); this crate owns the geometry,
//! splitting and reconciliation logic.

pub mod acroform;
pub mod annot;
pub mod content;
pub mod document;
pub mod error;
pub mod export;
pub mod geom;
pub mod high_level;
pub mod signature;
pub mod split;

pub use annot::{Annotation, AnnotationKind, AnnotationModel, Color, FieldKind};
pub use document::{FormDocument, PageGeometry};
pub use error::{FillError, Result};
pub use high_level::{
    ExtractOptions, Extraction, default_export_filename, export_pdf, extract_annotations,
};
pub use split::{SplitDecision, SplitMode, SplitParams};
