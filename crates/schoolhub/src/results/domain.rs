use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::roster::domain::row_id;
use crate::roster::{ClassId, ExamId, StudentId, SubjectId};

row_id!(
    /// Identifier of a stored result template.
    TemplateId
);
row_id!(SubjectMarkId);
row_id!(ResultCardId);
row_id!(ResultPublishId);

/// Default total marks applied when an ingestion batch omits `total_marks`.
pub const DEFAULT_TOTAL_MARKS: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkStatus {
    Draft,
    Finalized,
}

impl MarkStatus {
    pub const fn label(self) -> &'static str {
        match self {
            MarkStatus::Draft => "draft",
            MarkStatus::Finalized => "finalized",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(MarkStatus::Draft),
            "finalized" => Some(MarkStatus::Finalized),
            _ => None,
        }
    }
}

/// Marks for one student inside an ingestion batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkEntry {
    pub student_id: StudentId,
    pub marks_obtained: Decimal,
    #[serde(default)]
    pub remarks: Option<String>,
}

/// One subject's marks for a class sitting an exam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkIngestion {
    pub exam_id: ExamId,
    pub class_id: ClassId,
    pub subject_id: SubjectId,
    #[serde(default)]
    pub total_marks: Option<Decimal>,
    #[serde(default)]
    pub template_id: Option<TemplateId>,
    #[serde(default)]
    pub finalize: bool,
    #[serde(default)]
    pub remarks: Option<String>,
    pub marks: Vec<MarkEntry>,
}

impl MarkIngestion {
    pub fn status(&self) -> MarkStatus {
        if self.finalize {
            MarkStatus::Finalized
        } else {
            MarkStatus::Draft
        }
    }

    pub fn effective_total(&self) -> Decimal {
        self.total_marks
            .unwrap_or_else(|| Decimal::from(DEFAULT_TOTAL_MARKS))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionSummary {
    pub exam_id: ExamId,
    pub class_id: ClassId,
    pub subject_id: SubjectId,
    pub ingested: usize,
    pub status: MarkStatus,
}

/// Stored marks keyed by (student, exam, subject).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectMark {
    pub id: SubjectMarkId,
    pub student_id: StudentId,
    pub exam_id: ExamId,
    pub subject_id: SubjectId,
    pub marks_obtained: Decimal,
    pub total_marks: Decimal,
    pub status: MarkStatus,
    pub remarks: Option<String>,
    pub template_id: Option<TemplateId>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultFormat {
    Percentage,
    Gpa,
    Custom,
}

impl ResultFormat {
    pub const fn label(self) -> &'static str {
        match self {
            ResultFormat::Percentage => "percentage",
            ResultFormat::Gpa => "gpa",
            ResultFormat::Custom => "custom",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "percentage" => Some(ResultFormat::Percentage),
            "gpa" => Some(ResultFormat::Gpa),
            "custom" => Some(ResultFormat::Custom),
            _ => None,
        }
    }
}

/// Finalized marks for one subject, as fed into scoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradedMark {
    pub subject_id: SubjectId,
    pub subject_name: String,
    pub marks_obtained: Decimal,
    pub total_marks: Decimal,
}

/// Per-subject line on a result card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectScore {
    pub subject_id: SubjectId,
    pub subject_name: String,
    pub marks_obtained: Decimal,
    pub total_marks: Decimal,
    pub percentage: Decimal,
    pub grade: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultCard {
    pub id: ResultCardId,
    pub student_id: StudentId,
    pub exam_id: ExamId,
    pub class_id: ClassId,
    pub template_id: Option<TemplateId>,
    pub format: ResultFormat,
    pub total_obtained: Decimal,
    pub total_possible: Decimal,
    pub score: Decimal,
    pub grade: String,
    pub rank: Option<u32>,
    pub subjects: Vec<SubjectScore>,
    pub pdf_path: Option<String>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub exam_id: ExamId,
    pub class_id: ClassId,
    #[serde(default)]
    pub template_id: Option<TemplateId>,
    #[serde(default)]
    pub format: Option<ResultFormat>,
    #[serde(default)]
    pub generate_pdf: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationSummary {
    pub exam_id: ExamId,
    pub class_id: ClassId,
    pub template_id: Option<TemplateId>,
    pub format: ResultFormat,
    pub generated: usize,
    pub skipped: usize,
    pub documents: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    Draft,
    Published,
    Archived,
}

impl PublishStatus {
    pub const fn label(self) -> &'static str {
        match self {
            PublishStatus::Draft => "draft",
            PublishStatus::Published => "published",
            PublishStatus::Archived => "archived",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(PublishStatus::Draft),
            "published" => Some(PublishStatus::Published),
            "archived" => Some(PublishStatus::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub exam_id: ExamId,
    pub class_id: ClassId,
    pub format: ResultFormat,
    pub status: PublishStatus,
}

/// Visibility gate for the cards of one (exam, class, format).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultPublish {
    pub id: ResultPublishId,
    pub exam_id: ExamId,
    pub class_id: ClassId,
    pub format: ResultFormat,
    pub status: PublishStatus,
    pub published_at: Option<DateTime<Utc>>,
    pub published_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GradeCount {
    pub grade: String,
    pub students: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatSummary {
    pub format: ResultFormat,
    pub cards: u32,
    pub average_score: Decimal,
    pub grades: Vec<GradeCount>,
    pub publish_status: Option<PublishStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassResultSummary {
    pub exam_id: ExamId,
    pub class_id: ClassId,
    pub formats: Vec<FormatSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectProgress {
    pub subject_id: SubjectId,
    pub subject_name: String,
    pub draft: u32,
    pub finalized: u32,
}

/// How far marks entry has progressed for an exam in a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarkProgress {
    pub exam_id: ExamId,
    pub class_id: ClassId,
    pub enrolled: u32,
    pub subjects: Vec<SubjectProgress>,
}
