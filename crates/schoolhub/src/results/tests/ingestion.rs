use rust_decimal_macros::dec;

use super::common::*;
use crate::error::ServiceError;
use crate::results::domain::MarkStatus;
use crate::roster::{ExamId, NewClass, NewSubject};

#[test]
fn reingesting_the_same_batch_is_idempotent() {
    let fx = Fixture::new();
    let batch = fx.batch(
        &fx.maths,
        &[(fx.student(0), dec!(72)), (fx.student(1), dec!(64.5))],
        false,
    );

    let first = fx
        .service
        .ingest_marks(&teacher(), batch.clone())
        .expect("first ingest");
    let second = fx
        .service
        .ingest_marks(&teacher(), batch)
        .expect("second ingest");

    assert_eq!(first, second);
    assert_eq!(first.ingested, 2);
    assert_eq!(first.status, MarkStatus::Draft);
    assert_eq!(fx.count("SELECT COUNT(*) FROM subject_marks"), 2);
}

#[test]
fn later_batches_overwrite_draft_marks() {
    let fx = Fixture::new();
    fx.service
        .ingest_marks(&teacher(), fx.batch(&fx.maths, &[(fx.student(0), dec!(40))], false))
        .expect("draft");
    fx.service
        .ingest_marks(&teacher(), fx.batch(&fx.maths, &[(fx.student(0), dec!(55))], false))
        .expect("corrected draft");

    assert_eq!(
        fx.count("SELECT COUNT(*) FROM subject_marks WHERE marks_obtained = '55'"),
        1
    );
}

// Finalized marks are latched: a draft batch may not reopen them.
#[test]
fn draft_batch_cannot_revert_finalized_marks() {
    let fx = Fixture::new();
    fx.service
        .ingest_marks(
            &teacher(),
            fx.batch(&fx.maths, &[(fx.student(0), dec!(81))], true),
        )
        .expect("finalized");

    let err = fx
        .service
        .ingest_marks(
            &teacher(),
            fx.batch(
                &fx.maths,
                &[(fx.student(1), dec!(60)), (fx.student(0), dec!(12))],
                false,
            ),
        )
        .expect_err("latched");
    assert!(matches!(err, ServiceError::Conflict(_)));

    // The whole batch rolled back, including the untouched student.
    assert_eq!(fx.count("SELECT COUNT(*) FROM subject_marks"), 1);
    assert_eq!(
        fx.count(
            "SELECT COUNT(*) FROM subject_marks WHERE status = 'finalized' AND marks_obtained = '81'"
        ),
        1
    );
}

#[test]
fn finalized_marks_can_be_corrected_with_another_final_batch() {
    let fx = Fixture::new();
    fx.service
        .ingest_marks(&teacher(), fx.batch(&fx.maths, &[(fx.student(0), dec!(81))], true))
        .expect("finalized");
    fx.service
        .ingest_marks(&teacher(), fx.batch(&fx.maths, &[(fx.student(0), dec!(83))], true))
        .expect("corrected");

    assert_eq!(
        fx.count("SELECT COUNT(*) FROM subject_marks WHERE marks_obtained = '83' AND status = 'finalized'"),
        1
    );
}

#[test]
fn unenrolled_student_rolls_back_the_batch() {
    let fx = Fixture::new();
    let other = fx
        .roster
        .create_class(&admin(), NewClass { name: "Grade 7".to_string() })
        .expect("class");
    let outsider = enrol(&fx.roster, &other, "Eve");

    let err = fx
        .service
        .ingest_marks(
            &teacher(),
            fx.batch(
                &fx.maths,
                &[(fx.student(0), dec!(50)), (outsider.id, dec!(70))],
                true,
            ),
        )
        .expect_err("outsider rejected");

    match err {
        ServiceError::Validation(fields) => {
            assert_eq!(fields.len(), 1);
            assert_eq!(fields[0].field, "marks[1].student_id");
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert_eq!(fx.count("SELECT COUNT(*) FROM subject_marks"), 0);
}

#[test]
fn batch_shape_is_validated_before_any_lookup() {
    let fx = Fixture::new();
    let mut batch = fx.batch(
        &fx.maths,
        &[
            (fx.student(0), dec!(101)),
            (fx.student(1), dec!(-1)),
            (fx.student(0), dec!(20)),
        ],
        false,
    );
    batch.exam_id = ExamId(999);

    let err = fx
        .service
        .ingest_marks(&teacher(), batch)
        .expect_err("invalid batch");
    let ServiceError::Validation(fields) = err else {
        panic!("expected validation error");
    };
    let names: Vec<&str> = fields.iter().map(|field| field.field.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "marks[0].marks_obtained",
            "marks[1].marks_obtained",
            "marks[2].student_id",
        ]
    );
}

#[test]
fn empty_batches_and_non_positive_totals_are_rejected() {
    let fx = Fixture::new();
    let mut batch = fx.batch(&fx.maths, &[], false);
    batch.total_marks = Some(dec!(0));

    let ServiceError::Validation(fields) = fx
        .service
        .ingest_marks(&teacher(), batch)
        .expect_err("invalid batch")
    else {
        panic!("expected validation error");
    };
    let names: Vec<&str> = fields.iter().map(|field| field.field.as_str()).collect();
    assert_eq!(names, vec!["total_marks", "marks"]);
}

#[test]
fn unknown_exam_is_not_found() {
    let fx = Fixture::new();
    let mut batch = fx.batch(&fx.maths, &[(fx.student(0), dec!(10))], false);
    batch.exam_id = ExamId(404);

    let err = fx
        .service
        .ingest_marks(&teacher(), batch)
        .expect_err("unknown exam");
    assert!(matches!(err, ServiceError::NotFound { entity: "exam", .. }));
}

#[test]
fn subject_must_belong_to_the_class() {
    let fx = Fixture::new();
    let other = fx
        .roster
        .create_class(&admin(), NewClass { name: "Grade 8".to_string() })
        .expect("class");
    let art = fx
        .roster
        .create_subject(
            &admin(),
            NewSubject {
                class_id: other.id,
                name: "Art".to_string(),
            },
        )
        .expect("subject");

    let err = fx
        .service
        .ingest_marks(&teacher(), fx.batch(&art, &[(fx.student(0), dec!(10))], false))
        .expect_err("foreign subject");
    assert!(matches!(err, ServiceError::Validation(_)));
}

#[test]
fn students_cannot_upload_marks() {
    let fx = Fixture::new();
    let err = fx
        .service
        .ingest_marks(
            &student_identity(fx.student(0)),
            fx.batch(&fx.maths, &[(fx.student(0), dec!(100))], true),
        )
        .expect_err("forbidden");
    assert!(matches!(err, ServiceError::Forbidden { .. }));
    assert_eq!(fx.count("SELECT COUNT(*) FROM subject_marks"), 0);
}

#[test]
fn progress_counts_draft_and_finalized_per_subject() {
    let fx = Fixture::new();
    fx.service
        .ingest_marks(
            &teacher(),
            fx.batch(
                &fx.maths,
                &[(fx.student(0), dec!(70)), (fx.student(1), dec!(65))],
                true,
            ),
        )
        .expect("maths");
    fx.service
        .ingest_marks(
            &teacher(),
            fx.batch(&fx.science, &[(fx.student(2), dec!(30))], false),
        )
        .expect("science");

    let progress = fx
        .service
        .mark_progress(&teacher(), fx.exam.id, fx.class.id)
        .expect("progress");
    assert_eq!(progress.enrolled, 3);
    let counts: Vec<(&str, u32, u32)> = progress
        .subjects
        .iter()
        .map(|subject| (subject.subject_name.as_str(), subject.draft, subject.finalized))
        .collect();
    assert_eq!(counts, vec![("Maths", 0, 2), ("Science", 1, 0)]);
}

#[test]
fn stored_marks_are_listed_per_subject() {
    let fx = Fixture::new();
    fx.service
        .ingest_marks(
            &teacher(),
            fx.batch(
                &fx.maths,
                &[(fx.student(1), dec!(58)), (fx.student(0), dec!(92))],
                true,
            ),
        )
        .expect("maths");
    fx.service
        .ingest_marks(&teacher(), fx.batch(&fx.science, &[(fx.student(2), dec!(30))], false))
        .expect("science draft");

    let maths = fx
        .service
        .subject_marks(&teacher(), fx.exam.id, fx.class.id, fx.maths.id)
        .expect("maths marks");
    let rows: Vec<_> = maths
        .iter()
        .map(|mark| (mark.student_id, mark.marks_obtained, mark.status))
        .collect();
    assert_eq!(
        rows,
        vec![
            (fx.student(0), dec!(92), MarkStatus::Finalized),
            (fx.student(1), dec!(58), MarkStatus::Finalized),
        ]
    );
    assert!(maths.iter().all(|mark| mark.total_marks == dec!(100)));

    let science = fx
        .service
        .subject_marks(&teacher(), fx.exam.id, fx.class.id, fx.science.id)
        .expect("science marks");
    assert_eq!(science.len(), 1);
    assert_eq!(science[0].status, MarkStatus::Draft);

    let err = fx
        .service
        .subject_marks(&student_identity(fx.student(0)), fx.exam.id, fx.class.id, fx.maths.id)
        .expect_err("students cannot list class marks");
    assert!(matches!(err, ServiceError::Forbidden { .. }));
}
