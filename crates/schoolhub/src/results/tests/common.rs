use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::response::Response;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::access::{Identity, Role, RolePolicy};
use crate::results::domain::{MarkEntry, MarkIngestion};
use crate::results::renderer::{CardDocument, DocumentRenderer, RenderError};
use crate::results::service::ResultService;
use crate::roster::{
    ClassRecord, ExamRecord, NewClass, NewExam, NewStudent, NewSubject, RosterService,
    StudentId, StudentRecord, SubjectRecord,
};
use crate::store::{Database, StoreError};

/// Remembers rendered and discarded locations; fails for one student when asked to.
#[derive(Default)]
pub(super) struct RecordingRenderer {
    rendered: Mutex<Vec<String>>,
    discarded: Mutex<Vec<String>>,
    fail_for: Mutex<Option<StudentId>>,
}

impl RecordingRenderer {
    pub(super) fn failing_for(student_id: StudentId) -> Self {
        let renderer = Self::default();
        renderer.fail_for(Some(student_id));
        renderer
    }

    pub(super) fn fail_for(&self, student_id: Option<StudentId>) {
        *self.fail_for.lock().expect("renderer mutex poisoned") = student_id;
    }

    pub(super) fn rendered(&self) -> Vec<String> {
        self.rendered.lock().expect("renderer mutex poisoned").clone()
    }

    pub(super) fn discarded(&self) -> Vec<String> {
        self.discarded.lock().expect("renderer mutex poisoned").clone()
    }

    /// Rendered and not yet discarded.
    pub(super) fn live(&self) -> Vec<String> {
        let discarded = self.discarded();
        self.rendered()
            .into_iter()
            .filter(|location| !discarded.contains(location))
            .collect()
    }
}

impl DocumentRenderer for RecordingRenderer {
    fn render(&self, document: &CardDocument) -> Result<String, RenderError> {
        if *self.fail_for.lock().expect("renderer mutex poisoned") == Some(document.student_id) {
            return Err(RenderError::Rejected("printer on fire".to_string()));
        }
        let name = format!("memory://{}", document.file_name());
        self.rendered
            .lock()
            .expect("renderer mutex poisoned")
            .push(name.clone());
        Ok(name)
    }

    fn discard(&self, location: &str) -> Result<(), RenderError> {
        self.discarded
            .lock()
            .expect("renderer mutex poisoned")
            .push(location.to_string());
        Ok(())
    }
}

pub(super) struct Fixture {
    pub db: Arc<Database>,
    pub roster: RosterService,
    pub service: Arc<ResultService<RecordingRenderer>>,
    pub renderer: Arc<RecordingRenderer>,
    pub class: ClassRecord,
    pub exam: ExamRecord,
    pub maths: SubjectRecord,
    pub science: SubjectRecord,
    pub students: Vec<StudentRecord>,
}

impl Fixture {
    pub(super) fn new() -> Self {
        Self::with(RecordingRenderer::default(), Duration::from_secs(30))
    }

    pub(super) fn with(renderer: RecordingRenderer, generation_timeout: Duration) -> Self {
        let db = Arc::new(Database::open_in_memory().expect("db opens"));
        let roster = RosterService::new(db.clone(), Arc::new(RolePolicy));
        let renderer = Arc::new(renderer);
        let service = Arc::new(ResultService::new(
            db.clone(),
            Arc::new(RolePolicy),
            renderer.clone(),
            generation_timeout,
        ));

        let class = roster
            .create_class(&admin(), NewClass { name: "Grade 6".to_string() })
            .expect("class");
        let exam = roster
            .create_exam(
                &admin(),
                NewExam {
                    name: "Midterm".to_string(),
                    held_on: None,
                },
            )
            .expect("exam");
        let subject = |name: &str| {
            roster
                .create_subject(
                    &admin(),
                    NewSubject {
                        class_id: class.id,
                        name: name.to_string(),
                    },
                )
                .expect("subject")
        };
        let maths = subject("Maths");
        let science = subject("Science");
        let students = ["Ada", "Ben", "Cyd"]
            .iter()
            .map(|name| enrol(&roster, &class, name))
            .collect();

        Self {
            db,
            roster,
            service,
            renderer,
            class,
            exam,
            maths,
            science,
            students,
        }
    }

    pub(super) fn student(&self, index: usize) -> StudentId {
        self.students[index].id
    }

    pub(super) fn batch(
        &self,
        subject: &SubjectRecord,
        marks: &[(StudentId, Decimal)],
        finalize: bool,
    ) -> MarkIngestion {
        MarkIngestion {
            exam_id: self.exam.id,
            class_id: self.class.id,
            subject_id: subject.id,
            total_marks: None,
            template_id: None,
            finalize,
            remarks: None,
            marks: marks
                .iter()
                .map(|(student_id, marks_obtained)| MarkEntry {
                    student_id: *student_id,
                    marks_obtained: *marks_obtained,
                    remarks: None,
                })
                .collect(),
        }
    }

    pub(super) fn count(&self, sql: &str) -> i64 {
        self.db
            .read(|conn| {
                conn.query_row(sql, [], |row| row.get(0))
                    .map_err(StoreError::from)
            })
            .expect("count query")
    }
}

pub(super) fn enrol(roster: &RosterService, class: &ClassRecord, name: &str) -> StudentRecord {
    roster
        .enrol_student(
            &admin(),
            NewStudent {
                class_id: class.id,
                name: name.to_string(),
                admission_no: None,
                guardian_id: None,
            },
        )
        .expect("enrolled")
}

pub(super) fn admin() -> Identity {
    Identity::new("admin-1", Role::Admin)
}

pub(super) fn teacher() -> Identity {
    Identity::new("teacher-1", Role::Teacher)
}

pub(super) fn student_identity(student_id: StudentId) -> Identity {
    Identity::for_student(format!("student-{student_id}"), Role::Student, student_id)
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
