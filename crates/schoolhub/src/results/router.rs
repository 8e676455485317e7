use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use super::domain::{
    ClassResultSummary, GenerationRequest, GenerationSummary, IngestionSummary, MarkIngestion,
    MarkProgress, PublishRequest, ResultCard, ResultPublish, SubjectMark, TemplateId,
};
use super::renderer::DocumentRenderer;
use super::service::ResultService;
use super::template::{NewTemplate, ResultTemplate};
use crate::access::Identity;
use crate::error::ServiceError;
use crate::roster::{ClassId, ExamId, StudentId, SubjectId};
use crate::store::run_blocking;

/// HTTP surface for templates, marks, generation, publishing and card reads.
pub fn results_router<R>(service: Arc<ResultService<R>>) -> Router
where
    R: DocumentRenderer + 'static,
{
    Router::new()
        .route("/api/v1/results/templates", post(create_template_handler::<R>))
        .route(
            "/api/v1/results/templates/:template_id",
            get(template_handler::<R>),
        )
        .route("/api/v1/results/marks", post(ingest_marks_handler::<R>))
        .route(
            "/api/v1/results/exams/:exam_id/classes/:class_id/progress",
            get(progress_handler::<R>),
        )
        .route(
            "/api/v1/results/exams/:exam_id/classes/:class_id/subjects/:subject_id/marks",
            get(subject_marks_handler::<R>),
        )
        .route("/api/v1/results/generate", post(generate_handler::<R>))
        .route("/api/v1/results/publish", post(publish_handler::<R>))
        .route(
            "/api/v1/results/exams/:exam_id/classes/:class_id/cards",
            get(class_cards_handler::<R>),
        )
        .route(
            "/api/v1/results/exams/:exam_id/classes/:class_id/summary",
            get(summary_handler::<R>),
        )
        .route(
            "/api/v1/results/exams/:exam_id/students/:student_id/card",
            get(student_card_handler::<R>),
        )
        .with_state(service)
}

pub(crate) async fn create_template_handler<R>(
    State(service): State<Arc<ResultService<R>>>,
    identity: Identity,
    Json(template): Json<NewTemplate>,
) -> Result<(StatusCode, Json<ResultTemplate>), ServiceError>
where
    R: DocumentRenderer + 'static,
{
    let created = run_blocking(move || service.create_template(&identity, template)).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(crate) async fn template_handler<R>(
    State(service): State<Arc<ResultService<R>>>,
    identity: Identity,
    Path(template_id): Path<i64>,
) -> Result<Json<ResultTemplate>, ServiceError>
where
    R: DocumentRenderer + 'static,
{
    run_blocking(move || service.template(&identity, TemplateId(template_id)))
        .await
        .map(Json)
}

pub(crate) async fn ingest_marks_handler<R>(
    State(service): State<Arc<ResultService<R>>>,
    identity: Identity,
    Json(batch): Json<MarkIngestion>,
) -> Result<Json<IngestionSummary>, ServiceError>
where
    R: DocumentRenderer + 'static,
{
    run_blocking(move || service.ingest_marks(&identity, batch))
        .await
        .map(Json)
}

pub(crate) async fn progress_handler<R>(
    State(service): State<Arc<ResultService<R>>>,
    identity: Identity,
    Path((exam_id, class_id)): Path<(i64, i64)>,
) -> Result<Json<MarkProgress>, ServiceError>
where
    R: DocumentRenderer + 'static,
{
    run_blocking(move || service.mark_progress(&identity, ExamId(exam_id), ClassId(class_id)))
        .await
        .map(Json)
}

pub(crate) async fn subject_marks_handler<R>(
    State(service): State<Arc<ResultService<R>>>,
    identity: Identity,
    Path((exam_id, class_id, subject_id)): Path<(i64, i64, i64)>,
) -> Result<Json<Vec<SubjectMark>>, ServiceError>
where
    R: DocumentRenderer + 'static,
{
    run_blocking(move || {
        service.subject_marks(
            &identity,
            ExamId(exam_id),
            ClassId(class_id),
            SubjectId(subject_id),
        )
    })
    .await
    .map(Json)
}

pub(crate) async fn generate_handler<R>(
    State(service): State<Arc<ResultService<R>>>,
    identity: Identity,
    Json(request): Json<GenerationRequest>,
) -> Result<Json<GenerationSummary>, ServiceError>
where
    R: DocumentRenderer + 'static,
{
    run_blocking(move || service.generate(&identity, request))
        .await
        .map(Json)
}

pub(crate) async fn publish_handler<R>(
    State(service): State<Arc<ResultService<R>>>,
    identity: Identity,
    Json(request): Json<PublishRequest>,
) -> Result<Json<ResultPublish>, ServiceError>
where
    R: DocumentRenderer + 'static,
{
    run_blocking(move || service.publish(&identity, request))
        .await
        .map(Json)
}

pub(crate) async fn class_cards_handler<R>(
    State(service): State<Arc<ResultService<R>>>,
    identity: Identity,
    Path((exam_id, class_id)): Path<(i64, i64)>,
) -> Result<Json<Vec<ResultCard>>, ServiceError>
where
    R: DocumentRenderer + 'static,
{
    run_blocking(move || service.class_cards(&identity, ExamId(exam_id), ClassId(class_id)))
        .await
        .map(Json)
}

pub(crate) async fn summary_handler<R>(
    State(service): State<Arc<ResultService<R>>>,
    identity: Identity,
    Path((exam_id, class_id)): Path<(i64, i64)>,
) -> Result<Json<ClassResultSummary>, ServiceError>
where
    R: DocumentRenderer + 'static,
{
    run_blocking(move || service.class_summary(&identity, ExamId(exam_id), ClassId(class_id)))
        .await
        .map(Json)
}

pub(crate) async fn student_card_handler<R>(
    State(service): State<Arc<ResultService<R>>>,
    identity: Identity,
    Path((exam_id, student_id)): Path<(i64, i64)>,
) -> Result<Json<Vec<ResultCard>>, ServiceError>
where
    R: DocumentRenderer + 'static,
{
    run_blocking(move || service.student_cards(&identity, ExamId(exam_id), StudentId(student_id)))
        .await
        .map(Json)
}
