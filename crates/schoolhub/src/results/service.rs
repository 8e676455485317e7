use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::domain::{
    ClassResultSummary, FormatSummary, GenerationRequest, GenerationSummary, IngestionSummary,
    MarkIngestion, MarkProgress, MarkStatus, PublishRequest, PublishStatus, ResultCard,
    ResultFormat, ResultPublish, SubjectMark, TemplateId,
};
use super::grading::{self, Scored};
use super::renderer::{CardDocument, DocumentRenderer};
use super::repository::{self, CardWrite, MarkWrite, PublishWrite, DEFAULT_TEMPLATE_KEY};
use super::template::{GradingScheme, NewTemplate, ResultTemplate};
use crate::access::{Action, Authorizer, Identity, Scope};
use crate::deadline::Deadline;
use crate::error::{FieldError, ServiceError};
use crate::roster::service::{
    class_students, find_student, require_class, require_class_subject, require_exam,
};
use crate::roster::{ClassId, ExamId, StudentId, StudentRecord, SubjectId};
use crate::store::Database;

/// Marks ingestion, card generation and publishing for exams.
pub struct ResultService<R> {
    db: Arc<Database>,
    authorizer: Arc<dyn Authorizer>,
    renderer: Arc<R>,
    generation_timeout: Duration,
}

impl<R> ResultService<R>
where
    R: DocumentRenderer + 'static,
{
    pub fn new(
        db: Arc<Database>,
        authorizer: Arc<dyn Authorizer>,
        renderer: Arc<R>,
        generation_timeout: Duration,
    ) -> Self {
        Self {
            db,
            authorizer,
            renderer,
            generation_timeout,
        }
    }

    pub fn create_template(
        &self,
        identity: &Identity,
        template: NewTemplate,
    ) -> Result<ResultTemplate, ServiceError> {
        self.authorizer
            .ensure(identity, Action::ManageTemplates, Scope::Any)?;
        let name = template.name.trim().to_string();
        if name.is_empty() {
            return Err(ServiceError::validation("name", "must not be blank"));
        }
        GradingScheme::from_settings(template.format, &template.settings)
            .map_err(ServiceError::Validation)?;

        let id = self.db.write(|tx| {
            repository::insert_template(tx, &name, template.format, &template.settings)
                .map_err(|err| err.on_duplicate(|| format!("template '{name}' already exists")))
        })?;
        tracing::info!(template_id = %id, format = template.format.label(), "result template created");

        Ok(ResultTemplate {
            id,
            name,
            format: template.format,
            settings: template.settings,
        })
    }

    pub fn template(
        &self,
        identity: &Identity,
        template_id: TemplateId,
    ) -> Result<ResultTemplate, ServiceError> {
        self.authorizer
            .ensure(identity, Action::ViewClassResults, Scope::Any)?;
        self.db
            .read(|conn| repository::find_template(conn, template_id))?
            .ok_or_else(|| ServiceError::not_found("template", template_id))
    }

    /// Validates and upserts one subject's marks as a single all-or-nothing batch.
    pub fn ingest_marks(
        &self,
        identity: &Identity,
        batch: MarkIngestion,
    ) -> Result<IngestionSummary, ServiceError> {
        self.authorizer
            .ensure(identity, Action::IngestMarks, Scope::Any)?;
        validate_batch(&batch)?;

        let status = batch.status();
        let total_marks = batch.effective_total();
        let now = Utc::now();

        self.db.write(|tx| {
            require_exam(tx, batch.exam_id)?;
            require_class(tx, batch.class_id)?;
            require_class_subject(tx, batch.class_id, batch.subject_id)?;
            if let Some(template_id) = batch.template_id {
                repository::find_template(tx, template_id)?
                    .ok_or_else(|| ServiceError::not_found("template", template_id))?;
            }

            let mut errors = Vec::new();
            for (index, entry) in batch.marks.iter().enumerate() {
                let enrolled = find_student(tx, entry.student_id)?
                    .is_some_and(|student| student.class_id == batch.class_id);
                if !enrolled {
                    errors.push(FieldError::new(
                        format!("marks[{index}].student_id"),
                        format!(
                            "student {} is not enrolled in class {}",
                            entry.student_id, batch.class_id
                        ),
                    ));
                }
            }
            if !errors.is_empty() {
                return Err(ServiceError::Validation(errors));
            }

            for entry in &batch.marks {
                let existing =
                    repository::mark_status(tx, entry.student_id, batch.exam_id, batch.subject_id)?;
                if status == MarkStatus::Draft && existing == Some(MarkStatus::Finalized) {
                    return Err(ServiceError::Conflict(format!(
                        "marks for student {} in subject {} are finalized; resubmit with finalize=true to correct them",
                        entry.student_id, batch.subject_id
                    )));
                }
                repository::upsert_mark(
                    tx,
                    &MarkWrite {
                        student_id: entry.student_id,
                        exam_id: batch.exam_id,
                        subject_id: batch.subject_id,
                        marks_obtained: entry.marks_obtained,
                        total_marks,
                        status,
                        remarks: entry.remarks.as_deref().or(batch.remarks.as_deref()),
                        template_id: batch.template_id,
                        updated_at: now,
                    },
                )?;
            }
            Ok(())
        })?;

        tracing::info!(
            exam_id = %batch.exam_id,
            class_id = %batch.class_id,
            subject_id = %batch.subject_id,
            ingested = batch.marks.len(),
            status = status.label(),
            "marks ingested"
        );
        Ok(IngestionSummary {
            exam_id: batch.exam_id,
            class_id: batch.class_id,
            subject_id: batch.subject_id,
            ingested: batch.marks.len(),
            status,
        })
    }

    /// Recomputes every card for a class from its finalized marks in one transaction.
    pub fn generate(
        &self,
        identity: &Identity,
        request: GenerationRequest,
    ) -> Result<GenerationSummary, ServiceError> {
        self.authorizer
            .ensure(identity, Action::GenerateResults, Scope::Any)?;
        let deadline = Deadline::start("result generation", self.generation_timeout);

        let revision = generation_revision(Utc::now());
        let mut rendered: Vec<String> = Vec::new();

        let outcome = self.db.write(|tx| -> Result<_, ServiceError> {
            let exam = require_exam(tx, request.exam_id)?;
            let class = require_class(tx, request.class_id)?;
            let template = match request.template_id {
                Some(template_id) => Some(
                    repository::find_template(tx, template_id)?
                        .ok_or_else(|| ServiceError::not_found("template", template_id))?,
                ),
                None => None,
            };
            let format = request
                .format
                .or(template.as_ref().map(|t| t.format))
                .unwrap_or(ResultFormat::Percentage);
            let scheme = match &template {
                Some(template) => GradingScheme::from_settings(template.format, &template.settings)
                    .map_err(ServiceError::Validation)?,
                None => GradingScheme::default(),
            };
            let template_key = template
                .as_ref()
                .map(|t| t.id.0)
                .unwrap_or(DEFAULT_TEMPLATE_KEY);

            let students = class_students(tx, class.id)?;
            let mut marks = repository::finalized_marks(tx, exam.id, class.id)?;
            let mut previous = repository::card_documents(tx, exam.id, class.id, template_key)?;
            let mut replaced = Vec::new();

            let mut scored: Vec<(StudentRecord, Scored)> = Vec::new();
            let mut skipped = 0;
            for student in students {
                deadline.check()?;
                replaced.extend(previous.remove(&student.id));
                match marks.remove(&student.id) {
                    Some(student_marks) if !student_marks.is_empty() => {
                        let result = grading::score(format, &scheme, &student_marks);
                        scored.push((student, result));
                    }
                    _ => {
                        repository::delete_card(tx, student.id, exam.id, class.id, template_key)?;
                        skipped += 1;
                    }
                }
            }

            let ranks: Vec<Option<u32>> = if scheme.rank {
                let scores: Vec<Decimal> = scored.iter().map(|(_, result)| result.score).collect();
                grading::competition_ranks(&scores)
                    .into_iter()
                    .map(Some)
                    .collect()
            } else {
                vec![None; scored.len()]
            };

            let mut documents = Vec::with_capacity(scored.len());
            for ((student, result), rank) in scored.iter().zip(&ranks) {
                if !request.generate_pdf {
                    documents.push(None);
                    continue;
                }
                deadline.check()?;
                let document = CardDocument {
                    exam_id: exam.id,
                    exam_name: exam.name.clone(),
                    class_id: class.id,
                    class_name: class.name.clone(),
                    student_id: student.id,
                    student_name: student.name.clone(),
                    template_key,
                    revision: revision.clone(),
                    format,
                    subjects: result.subjects.clone(),
                    total_obtained: result.total_obtained,
                    total_possible: result.total_possible,
                    score: result.score,
                    grade: result.grade.clone(),
                    rank: *rank,
                };
                let path = self.renderer.render(&document).map_err(|err| {
                    tracing::warn!(student_id = %student.id, error = %err, "result card rendering failed");
                    ServiceError::Rendering(err.to_string())
                })?;
                rendered.push(path.clone());
                documents.push(Some(path));
            }

            let generated_at = Utc::now();
            for (((student, result), rank), pdf_path) in
                scored.iter().zip(&ranks).zip(&documents)
            {
                repository::upsert_card(
                    tx,
                    &CardWrite {
                        student_id: student.id,
                        exam_id: exam.id,
                        class_id: class.id,
                        template_key,
                        format,
                        total_obtained: result.total_obtained,
                        total_possible: result.total_possible,
                        score: result.score,
                        grade: &result.grade,
                        rank: *rank,
                        subjects: &result.subjects,
                        pdf_path: pdf_path.as_deref(),
                        generated_at,
                    },
                )?;
            }
            deadline.check()?;

            let summary = GenerationSummary {
                exam_id: exam.id,
                class_id: class.id,
                template_id: template.as_ref().map(|t| t.id),
                format,
                generated: scored.len(),
                skipped,
                documents: documents.iter().flatten().count(),
            };
            Ok((summary, replaced))
        });

        // Rollback drops this run's documents; commit drops the ones it replaced.
        let summary = match outcome {
            Ok((summary, replaced)) => {
                self.discard_documents(&replaced);
                summary
            }
            Err(err) => {
                self.discard_documents(&rendered);
                return Err(err);
            }
        };

        tracing::info!(
            exam_id = %summary.exam_id,
            class_id = %summary.class_id,
            format = summary.format.label(),
            generated = summary.generated,
            skipped = summary.skipped,
            documents = summary.documents,
            "result cards generated"
        );
        Ok(summary)
    }

    fn discard_documents(&self, locations: &[String]) {
        for location in locations {
            if let Err(err) = self.renderer.discard(location) {
                tracing::warn!(path = %location, error = %err, "unable to remove result card document");
            }
        }
    }

    /// Sets the visibility status of an (exam, class, format).
    pub fn publish(
        &self,
        identity: &Identity,
        request: PublishRequest,
    ) -> Result<ResultPublish, ServiceError> {
        self.authorizer
            .ensure(identity, Action::PublishResults, Scope::Any)?;
        let now = Utc::now();

        let record = self.db.write(|tx| {
            require_exam(tx, request.exam_id)?;
            require_class(tx, request.class_id)?;
            let existing =
                repository::find_publish(tx, request.exam_id, request.class_id, request.format)?;

            let (published_at, published_by) = match (request.status, existing) {
                (PublishStatus::Published, Some(current))
                    if current.status == PublishStatus::Published =>
                {
                    (current.published_at, current.published_by)
                }
                (PublishStatus::Published, _) => (Some(now), Some(identity.actor_id.clone())),
                _ => (None, None),
            };

            repository::upsert_publish(
                tx,
                &PublishWrite {
                    exam_id: request.exam_id,
                    class_id: request.class_id,
                    format: request.format,
                    status: request.status,
                    published_at,
                    published_by: published_by.as_deref(),
                    updated_at: now,
                },
            )
        })?;

        tracing::info!(
            exam_id = %record.exam_id,
            class_id = %record.class_id,
            format = record.format.label(),
            status = record.status.label(),
            actor = %identity.actor_id,
            "result publish status updated"
        );
        Ok(record)
    }

    pub fn class_cards(
        &self,
        identity: &Identity,
        exam_id: ExamId,
        class_id: ClassId,
    ) -> Result<Vec<ResultCard>, ServiceError> {
        self.authorizer
            .ensure(identity, Action::ViewClassResults, Scope::Any)?;
        self.db.read(|conn| {
            require_exam(conn, exam_id)?;
            require_class(conn, class_id)?;
            repository::class_cards(conn, exam_id, class_id)
        })
    }

    /// Cards a student holds for an exam. Students and guardians only see formats
    /// whose results are published.
    pub fn student_cards(
        &self,
        identity: &Identity,
        exam_id: ExamId,
        student_id: StudentId,
    ) -> Result<Vec<ResultCard>, ServiceError> {
        self.authorizer
            .ensure(identity, Action::ViewResultCard, Scope::Any)?;

        self.db.read(|conn| {
            let student = find_student(conn, student_id)?
                .ok_or_else(|| ServiceError::not_found("student", student_id))?;
            self.authorizer
                .ensure(identity, Action::ViewResultCard, Scope::Student(student.id))?;
            require_exam(conn, exam_id)?;

            let mut cards = repository::student_cards(conn, exam_id, student.id)?;
            let staff = self
                .authorizer
                .is_allowed(identity, Action::ViewClassResults, Scope::Any);
            if !staff {
                let mut visible = HashSet::new();
                for card in &cards {
                    let published = repository::find_publish(conn, exam_id, card.class_id, card.format)?
                        .is_some_and(|record| record.status == PublishStatus::Published);
                    if published {
                        visible.insert(card.id);
                    }
                }
                cards.retain(|card| visible.contains(&card.id));
            }

            if cards.is_empty() {
                return Err(ServiceError::not_found(
                    "result card",
                    format!("for student {student_id} in exam {exam_id}"),
                ));
            }
            Ok(cards)
        })
    }

    pub fn class_summary(
        &self,
        identity: &Identity,
        exam_id: ExamId,
        class_id: ClassId,
    ) -> Result<ClassResultSummary, ServiceError> {
        self.authorizer
            .ensure(identity, Action::ViewClassResults, Scope::Any)?;

        self.db.read(|conn| {
            require_exam(conn, exam_id)?;
            require_class(conn, class_id)?;
            let mut grades = repository::grade_distribution(conn, exam_id, class_id)?;
            let statuses = repository::publish_statuses(conn, exam_id, class_id)?;
            let scores = repository::scores_by_format(conn, exam_id, class_id)?;

            let formats = scores
                .into_iter()
                .map(|(format, scores)| {
                    let total: Decimal = scores.iter().copied().sum();
                    let average = total
                        .checked_div(Decimal::from(scores.len()))
                        .map(|mean| grading::round(mean, 2))
                        .unwrap_or(Decimal::ZERO);
                    FormatSummary {
                        format,
                        cards: scores.len() as u32,
                        average_score: average,
                        grades: grades.remove(&format).unwrap_or_default(),
                        publish_status: statuses.get(&format).copied(),
                    }
                })
                .collect();

            Ok(ClassResultSummary {
                exam_id,
                class_id,
                formats,
            })
        })
    }

    /// Stored marks for one subject of a class, drafts included.
    pub fn subject_marks(
        &self,
        identity: &Identity,
        exam_id: ExamId,
        class_id: ClassId,
        subject_id: SubjectId,
    ) -> Result<Vec<SubjectMark>, ServiceError> {
        self.authorizer
            .ensure(identity, Action::ViewClassResults, Scope::Any)?;

        self.db.read(|conn| {
            require_exam(conn, exam_id)?;
            require_class(conn, class_id)?;
            require_class_subject(conn, class_id, subject_id)?;
            repository::subject_marks(conn, exam_id, class_id, subject_id)
        })
    }

    pub fn mark_progress(
        &self,
        identity: &Identity,
        exam_id: ExamId,
        class_id: ClassId,
    ) -> Result<MarkProgress, ServiceError> {
        self.authorizer
            .ensure(identity, Action::ViewClassResults, Scope::Any)?;

        self.db.read(|conn| {
            require_exam(conn, exam_id)?;
            require_class(conn, class_id)?;
            let enrolled = class_students(conn, class_id)?.len() as u32;
            let subjects = repository::subject_progress(conn, exam_id, class_id)?;
            Ok(MarkProgress {
                exam_id,
                class_id,
                enrolled,
                subjects,
            })
        })
    }
}

static GENERATION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Tag shared by every document of one generation run.
fn generation_revision(at: DateTime<Utc>) -> String {
    let sequence = GENERATION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{}-{sequence}", at.format("%Y%m%d%H%M%S%3f"))
}

fn validate_batch(batch: &MarkIngestion) -> Result<(), ServiceError> {
    let mut errors = Vec::new();
    let total_marks = batch.effective_total();

    if total_marks <= Decimal::ZERO {
        errors.push(FieldError::new("total_marks", "must be greater than zero"));
    }
    if batch.marks.is_empty() {
        errors.push(FieldError::new("marks", "must contain at least one entry"));
    }

    let mut seen = BTreeMap::new();
    for (index, entry) in batch.marks.iter().enumerate() {
        if let Some(first) = seen.insert(entry.student_id, index) {
            errors.push(FieldError::new(
                format!("marks[{index}].student_id"),
                format!(
                    "student {} already appears at marks[{first}]",
                    entry.student_id
                ),
            ));
        }
        if entry.marks_obtained < Decimal::ZERO {
            errors.push(FieldError::new(
                format!("marks[{index}].marks_obtained"),
                "must not be negative",
            ));
        } else if total_marks > Decimal::ZERO && entry.marks_obtained > total_marks {
            errors.push(FieldError::new(
                format!("marks[{index}].marks_obtained"),
                format!("must not exceed total_marks ({total_marks})"),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ServiceError::Validation(errors))
    }
}
