use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension};

use super::domain::{
    ClassId, ClassRecord, ExamId, ExamRecord, NewClass, NewExam, NewStudent, NewSubject,
    StudentId, StudentRecord, SubjectId, SubjectRecord,
};
use crate::access::{Action, Authorizer, Identity, Scope};
use crate::error::ServiceError;
use crate::store::{is_unique_violation, Database};

/// Creates the classes, subjects, students and exams the pipelines depend on.
pub struct RosterService {
    db: Arc<Database>,
    authorizer: Arc<dyn Authorizer>,
}

impl RosterService {
    pub fn new(db: Arc<Database>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self { db, authorizer }
    }

    pub fn create_class(
        &self,
        identity: &Identity,
        class: NewClass,
    ) -> Result<ClassRecord, ServiceError> {
        self.authorizer
            .ensure(identity, Action::ManageRoster, Scope::Any)?;
        let name = required_name("name", &class.name)?;

        self.db.write(|tx| {
            tx.execute("INSERT INTO classes(name) VALUES(?1)", [&name])
                .map_err(|err| duplicate_or(err, format!("class '{name}' already exists")))?;
            Ok(ClassRecord {
                id: ClassId(tx.last_insert_rowid()),
                name: name.clone(),
            })
        })
    }

    pub fn create_subject(
        &self,
        identity: &Identity,
        subject: NewSubject,
    ) -> Result<SubjectRecord, ServiceError> {
        self.authorizer
            .ensure(identity, Action::ManageRoster, Scope::Any)?;
        let name = required_name("name", &subject.name)?;

        self.db.write(|tx| {
            require_class(tx, subject.class_id)?;
            tx.execute(
                "INSERT INTO subjects(class_id, name) VALUES(?1, ?2)",
                (subject.class_id.0, &name),
            )
            .map_err(|err| {
                duplicate_or(
                    err,
                    format!("class {} already teaches '{name}'", subject.class_id),
                )
            })?;
            Ok(SubjectRecord {
                id: SubjectId(tx.last_insert_rowid()),
                class_id: subject.class_id,
                name: name.clone(),
            })
        })
    }

    pub fn enrol_student(
        &self,
        identity: &Identity,
        student: NewStudent,
    ) -> Result<StudentRecord, ServiceError> {
        self.authorizer
            .ensure(identity, Action::ManageRoster, Scope::Any)?;
        let name = required_name("name", &student.name)?;
        let admission_no = student
            .admission_no
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        self.db.write(|tx| {
            require_class(tx, student.class_id)?;
            tx.execute(
                "INSERT INTO students(class_id, name, admission_no, guardian_id)
                 VALUES(?1, ?2, ?3, ?4)",
                (
                    student.class_id.0,
                    &name,
                    admission_no.as_deref(),
                    student.guardian_id.as_deref(),
                ),
            )
            .map_err(|err| duplicate_or(err, "admission number already in use".to_string()))?;
            Ok(StudentRecord {
                id: StudentId(tx.last_insert_rowid()),
                class_id: student.class_id,
                name: name.clone(),
                admission_no: admission_no.clone(),
                guardian_id: student.guardian_id.clone(),
            })
        })
    }

    pub fn create_exam(&self, identity: &Identity, exam: NewExam) -> Result<ExamRecord, ServiceError> {
        self.authorizer
            .ensure(identity, Action::ManageRoster, Scope::Any)?;
        let name = required_name("name", &exam.name)?;

        self.db.write(|tx| {
            tx.execute(
                "INSERT INTO exams(name, held_on) VALUES(?1, ?2)",
                (&name, exam.held_on),
            )?;
            Ok(ExamRecord {
                id: ExamId(tx.last_insert_rowid()),
                name: name.clone(),
                held_on: exam.held_on,
            })
        })
    }
}

fn required_name(field: &str, raw: &str) -> Result<String, ServiceError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::validation(field, "must not be blank"));
    }
    Ok(trimmed.to_string())
}

fn duplicate_or(err: rusqlite::Error, message: String) -> ServiceError {
    if is_unique_violation(&err) {
        ServiceError::Conflict(message)
    } else {
        ServiceError::from(err)
    }
}

pub(crate) fn require_class(
    conn: &Connection,
    class_id: ClassId,
) -> Result<ClassRecord, ServiceError> {
    let found = conn
        .query_row(
            "SELECT id, name FROM classes WHERE id = ?1",
            [class_id.0],
            |row| {
                Ok(ClassRecord {
                    id: ClassId(row.get(0)?),
                    name: row.get(1)?,
                })
            },
        )
        .optional()?;
    found.ok_or_else(|| ServiceError::not_found("class", class_id))
}

pub(crate) fn require_exam(conn: &Connection, exam_id: ExamId) -> Result<ExamRecord, ServiceError> {
    let found = conn
        .query_row(
            "SELECT id, name, held_on FROM exams WHERE id = ?1",
            [exam_id.0],
            |row| {
                Ok(ExamRecord {
                    id: ExamId(row.get(0)?),
                    name: row.get(1)?,
                    held_on: row.get(2)?,
                })
            },
        )
        .optional()?;
    found.ok_or_else(|| ServiceError::not_found("exam", exam_id))
}

/// Fails unless the subject exists and is taught in `class_id`.
pub(crate) fn require_class_subject(
    conn: &Connection,
    class_id: ClassId,
    subject_id: SubjectId,
) -> Result<(), ServiceError> {
    let owner: Option<i64> = conn
        .query_row(
            "SELECT class_id FROM subjects WHERE id = ?1",
            [subject_id.0],
            |row| row.get(0),
        )
        .optional()?;
    match owner {
        None => Err(ServiceError::not_found("subject", subject_id)),
        Some(owner) if owner != class_id.0 => Err(ServiceError::validation(
            "subject_id",
            format!("subject {subject_id} is not taught in class {class_id}"),
        )),
        Some(_) => Ok(()),
    }
}

pub(crate) fn find_student(
    conn: &Connection,
    student_id: StudentId,
) -> Result<Option<StudentRecord>, ServiceError> {
    let record = conn
        .query_row(
            "SELECT id, class_id, name, admission_no, guardian_id FROM students WHERE id = ?1",
            [student_id.0],
            |row| {
                Ok(StudentRecord {
                    id: StudentId(row.get(0)?),
                    class_id: ClassId(row.get(1)?),
                    name: row.get(2)?,
                    admission_no: row.get(3)?,
                    guardian_id: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

/// Students enrolled in a class, in id order.
pub(crate) fn class_students(
    conn: &Connection,
    class_id: ClassId,
) -> Result<Vec<StudentRecord>, ServiceError> {
    let mut stmt = conn.prepare(
        "SELECT id, class_id, name, admission_no, guardian_id
         FROM students WHERE class_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map([class_id.0], |row| {
        Ok(StudentRecord {
            id: StudentId(row.get(0)?),
            class_id: ClassId(row.get(1)?),
            name: row.get(2)?,
            admission_no: row.get(3)?,
            guardian_id: row.get(4)?,
        })
    })?;
    let mut students = Vec::new();
    for row in rows {
        students.push(row?);
    }
    Ok(students)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{RolePolicy, Role};

    fn service() -> RosterService {
        let db = Arc::new(Database::open_in_memory().expect("db opens"));
        RosterService::new(db, Arc::new(RolePolicy))
    }

    fn admin() -> Identity {
        Identity::new("admin-1", Role::Admin)
    }

    #[test]
    fn subjects_must_belong_to_an_existing_class() {
        let service = service();
        let err = service
            .create_subject(
                &admin(),
                NewSubject {
                    class_id: ClassId(99),
                    name: "Physics".to_string(),
                },
            )
            .expect_err("unknown class");
        assert!(matches!(err, ServiceError::NotFound { entity: "class", .. }));
    }

    #[test]
    fn duplicate_class_names_conflict() {
        let service = service();
        service
            .create_class(&admin(), NewClass { name: "Grade 9".to_string() })
            .expect("first class");
        let err = service
            .create_class(&admin(), NewClass { name: " Grade 9 ".to_string() })
            .expect_err("duplicate");
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[test]
    fn teachers_cannot_enrol_students() {
        let service = service();
        let class = service
            .create_class(&admin(), NewClass { name: "Grade 4".to_string() })
            .expect("class");
        let err = service
            .enrol_student(
                &Identity::new("t-9", Role::Teacher),
                NewStudent {
                    class_id: class.id,
                    name: "Ada".to_string(),
                    admission_no: None,
                    guardian_id: None,
                },
            )
            .expect_err("forbidden");
        assert!(matches!(err, ServiceError::Forbidden { .. }));
    }

    #[test]
    fn class_students_are_listed_in_id_order() {
        let service = service();
        let class = service
            .create_class(&admin(), NewClass { name: "Grade 5".to_string() })
            .expect("class");
        for name in ["Zed", "Amy"] {
            service
                .enrol_student(
                    &admin(),
                    NewStudent {
                        class_id: class.id,
                        name: name.to_string(),
                        admission_no: None,
                        guardian_id: None,
                    },
                )
                .expect("enrolled");
        }
        let names: Vec<String> = service
            .db
            .read(|conn| class_students(conn, class.id))
            .expect("listing")
            .into_iter()
            .map(|student| student.name)
            .collect();
        assert_eq!(names, vec!["Zed".to_string(), "Amy".to_string()]);
    }
}
