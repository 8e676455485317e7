//! Classes, subjects, students and exams: the minimum roster the result and fee pipelines read.

pub mod domain;
pub mod router;
pub mod service;

pub use domain::{
    ClassId, ClassRecord, ExamId, ExamRecord, NewClass, NewExam, NewStudent, NewSubject,
    StudentId, StudentRecord, SubjectId, SubjectRecord,
};
pub use router::roster_router;
pub use service::RosterService;
