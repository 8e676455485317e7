use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};

use super::domain::{
    ClassRecord, ExamRecord, NewClass, NewExam, NewStudent, NewSubject, StudentRecord,
    SubjectRecord,
};
use super::service::RosterService;
use crate::access::Identity;
use crate::error::ServiceError;
use crate::store::run_blocking;

pub fn roster_router(service: Arc<RosterService>) -> Router {
    Router::new()
        .route("/api/v1/roster/classes", post(create_class_handler))
        .route("/api/v1/roster/subjects", post(create_subject_handler))
        .route("/api/v1/roster/students", post(enrol_student_handler))
        .route("/api/v1/roster/exams", post(create_exam_handler))
        .with_state(service)
}

pub(crate) async fn create_class_handler(
    State(service): State<Arc<RosterService>>,
    identity: Identity,
    Json(class): Json<NewClass>,
) -> Result<(StatusCode, Json<ClassRecord>), ServiceError> {
    let record = run_blocking(move || service.create_class(&identity, class)).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub(crate) async fn create_subject_handler(
    State(service): State<Arc<RosterService>>,
    identity: Identity,
    Json(subject): Json<NewSubject>,
) -> Result<(StatusCode, Json<SubjectRecord>), ServiceError> {
    let record = run_blocking(move || service.create_subject(&identity, subject)).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub(crate) async fn enrol_student_handler(
    State(service): State<Arc<RosterService>>,
    identity: Identity,
    Json(student): Json<NewStudent>,
) -> Result<(StatusCode, Json<StudentRecord>), ServiceError> {
    let record = run_blocking(move || service.enrol_student(&identity, student)).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub(crate) async fn create_exam_handler(
    State(service): State<Arc<RosterService>>,
    identity: Identity,
    Json(exam): Json<NewExam>,
) -> Result<(StatusCode, Json<ExamRecord>), ServiceError> {
    let record = run_blocking(move || service.create_exam(&identity, exam)).await?;
    Ok((StatusCode::CREATED, Json(record)))
}
