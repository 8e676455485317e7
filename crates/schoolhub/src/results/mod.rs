//! Result generation pipeline: marks ingestion, card generation and publishing.
//!
//! Marks are ingested per subject as draft or finalized rows. Generation scores only
//! finalized marks and rewrites a class's cards in one transaction; publishing gates
//! which formats students and guardians may read.

pub mod domain;
pub mod grading;
pub mod renderer;
pub(crate) mod repository;
pub mod router;
pub mod service;
pub mod template;

#[cfg(test)]
mod tests;

pub use domain::{
    ClassResultSummary, FormatSummary, GenerationRequest, GenerationSummary, GradeCount,
    IngestionSummary, MarkEntry, MarkIngestion, MarkProgress, MarkStatus, PublishRequest,
    PublishStatus, ResultCard, ResultFormat, ResultPublish, SubjectMark, SubjectMarkId,
    SubjectProgress, SubjectScore, TemplateId,
};
pub use renderer::{CardDocument, DocumentRenderer, PdfSnapshotRenderer, RenderError};
pub use router::results_router;
pub use service::ResultService;
pub use template::{GradingScheme, NewTemplate, ResultTemplate, SettingValue, TemplateSettings};
