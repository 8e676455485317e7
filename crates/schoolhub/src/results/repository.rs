//! SQL for marks, templates, cards and publish records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;

use super::domain::{
    GradeCount, GradedMark, MarkStatus, PublishStatus, ResultCard, ResultCardId, ResultFormat,
    ResultPublish, ResultPublishId, SubjectMark, SubjectMarkId, SubjectProgress, SubjectScore,
    TemplateId,
};
use super::template::{ResultTemplate, TemplateSettings};
use crate::error::ServiceError;
use crate::roster::{ClassId, ExamId, StudentId, SubjectId};
use crate::store::{decimal_at, parsed_at};

/// `template_id` value stored on cards generated without a template.
pub const DEFAULT_TEMPLATE_KEY: i64 = 0;

fn json_at<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, ServiceError> {
    serde_json::to_string(value).map_err(|err| {
        ServiceError::from(rusqlite::Error::ToSqlConversionFailure(Box::new(err)))
    })
}

pub(crate) fn insert_template(
    conn: &Connection,
    name: &str,
    format: ResultFormat,
    settings: &TemplateSettings,
) -> Result<TemplateId, ServiceError> {
    conn.execute(
        "INSERT INTO result_templates(name, format, settings) VALUES(?1, ?2, ?3)",
        params![name, format.label(), to_json(settings)?],
    )?;
    Ok(TemplateId(conn.last_insert_rowid()))
}

pub(crate) fn find_template(
    conn: &Connection,
    template_id: TemplateId,
) -> Result<Option<ResultTemplate>, ServiceError> {
    let template = conn
        .query_row(
            "SELECT id, name, format, settings FROM result_templates WHERE id = ?1",
            [template_id.0],
            |row| {
                Ok(ResultTemplate {
                    id: TemplateId(row.get(0)?),
                    name: row.get(1)?,
                    format: parsed_at(row, 2, ResultFormat::parse)?,
                    settings: json_at(row, 3)?,
                })
            },
        )
        .optional()?;
    Ok(template)
}

pub(crate) fn mark_status(
    conn: &Connection,
    student_id: StudentId,
    exam_id: ExamId,
    subject_id: SubjectId,
) -> Result<Option<MarkStatus>, ServiceError> {
    let status = conn
        .query_row(
            "SELECT status FROM subject_marks
             WHERE student_id = ?1 AND exam_id = ?2 AND subject_id = ?3",
            [student_id.0, exam_id.0, subject_id.0],
            |row| parsed_at(row, 0, MarkStatus::parse),
        )
        .optional()?;
    Ok(status)
}

pub(crate) struct MarkWrite<'a> {
    pub student_id: StudentId,
    pub exam_id: ExamId,
    pub subject_id: SubjectId,
    pub marks_obtained: Decimal,
    pub total_marks: Decimal,
    pub status: MarkStatus,
    pub remarks: Option<&'a str>,
    pub template_id: Option<TemplateId>,
    pub updated_at: DateTime<Utc>,
}

/// Inserts or overwrites the mark for (student, exam, subject).
pub(crate) fn upsert_mark(conn: &Connection, mark: &MarkWrite<'_>) -> Result<(), ServiceError> {
    conn.execute(
        "INSERT INTO subject_marks(
             student_id, exam_id, subject_id, marks_obtained, total_marks,
             status, remarks, template_id, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(student_id, exam_id, subject_id) DO UPDATE SET
             marks_obtained = excluded.marks_obtained,
             total_marks = excluded.total_marks,
             status = excluded.status,
             remarks = excluded.remarks,
             template_id = excluded.template_id,
             updated_at = excluded.updated_at",
        params![
            mark.student_id.0,
            mark.exam_id.0,
            mark.subject_id.0,
            mark.marks_obtained.to_string(),
            mark.total_marks.to_string(),
            mark.status.label(),
            mark.remarks,
            mark.template_id.map(|id| id.0),
            mark.updated_at,
        ],
    )?;
    Ok(())
}

/// Every stored mark (draft or finalized) one subject holds for a class in an exam.
pub(crate) fn subject_marks(
    conn: &Connection,
    exam_id: ExamId,
    class_id: ClassId,
    subject_id: SubjectId,
) -> Result<Vec<SubjectMark>, ServiceError> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.student_id, m.exam_id, m.subject_id, m.marks_obtained, m.total_marks,
                m.status, m.remarks, m.template_id, m.updated_at
         FROM subject_marks m
         JOIN students st ON st.id = m.student_id
         WHERE m.exam_id = ?1 AND st.class_id = ?2 AND m.subject_id = ?3
         ORDER BY m.student_id",
    )?;
    let rows = stmt.query_map([exam_id.0, class_id.0, subject_id.0], |row| {
        let template_id: Option<i64> = row.get(8)?;
        Ok(SubjectMark {
            id: SubjectMarkId(row.get(0)?),
            student_id: StudentId(row.get(1)?),
            exam_id: ExamId(row.get(2)?),
            subject_id: SubjectId(row.get(3)?),
            marks_obtained: decimal_at(row, 4)?,
            total_marks: decimal_at(row, 5)?,
            status: parsed_at(row, 6, MarkStatus::parse)?,
            remarks: row.get(7)?,
            template_id: template_id.map(TemplateId),
            updated_at: row.get(9)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(ServiceError::from)
}

/// Finalized marks for subjects owned by `class_id`, grouped by student.
pub(crate) fn finalized_marks(
    conn: &Connection,
    exam_id: ExamId,
    class_id: ClassId,
) -> Result<BTreeMap<StudentId, Vec<GradedMark>>, ServiceError> {
    let mut stmt = conn.prepare(
        "SELECT m.student_id, s.id, s.name, m.marks_obtained, m.total_marks
         FROM subject_marks m
         JOIN subjects s ON s.id = m.subject_id
         WHERE m.exam_id = ?1 AND s.class_id = ?2 AND m.status = 'finalized'
         ORDER BY m.student_id, s.id",
    )?;
    let rows = stmt.query_map([exam_id.0, class_id.0], |row| {
        Ok((
            StudentId(row.get(0)?),
            GradedMark {
                subject_id: SubjectId(row.get(1)?),
                subject_name: row.get(2)?,
                marks_obtained: decimal_at(row, 3)?,
                total_marks: decimal_at(row, 4)?,
            },
        ))
    })?;

    let mut grouped: BTreeMap<StudentId, Vec<GradedMark>> = BTreeMap::new();
    for row in rows {
        let (student_id, mark) = row?;
        grouped.entry(student_id).or_default().push(mark);
    }
    Ok(grouped)
}

pub(crate) struct CardWrite<'a> {
    pub student_id: StudentId,
    pub exam_id: ExamId,
    pub class_id: ClassId,
    pub template_key: i64,
    pub format: ResultFormat,
    pub total_obtained: Decimal,
    pub total_possible: Decimal,
    pub score: Decimal,
    pub grade: &'a str,
    pub rank: Option<u32>,
    pub subjects: &'a [SubjectScore],
    pub pdf_path: Option<&'a str>,
    pub generated_at: DateTime<Utc>,
}

pub(crate) fn upsert_card(conn: &Connection, card: &CardWrite<'_>) -> Result<ResultCardId, ServiceError> {
    let id = conn.query_row(
        "INSERT INTO result_cards(
             student_id, exam_id, class_id, template_id, format, total_obtained,
             total_possible, score, grade, class_rank, subjects, pdf_path, generated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(student_id, exam_id, class_id, template_id) DO UPDATE SET
             format = excluded.format,
             total_obtained = excluded.total_obtained,
             total_possible = excluded.total_possible,
             score = excluded.score,
             grade = excluded.grade,
             class_rank = excluded.class_rank,
             subjects = excluded.subjects,
             pdf_path = excluded.pdf_path,
             generated_at = excluded.generated_at
         RETURNING id",
        params![
            card.student_id.0,
            card.exam_id.0,
            card.class_id.0,
            card.template_key,
            card.format.label(),
            card.total_obtained.to_string(),
            card.total_possible.to_string(),
            card.score.to_string(),
            card.grade,
            card.rank,
            to_json(&card.subjects)?,
            card.pdf_path,
            card.generated_at,
        ],
        |row| row.get(0),
    )?;
    Ok(ResultCardId(id))
}

pub(crate) fn delete_card(
    conn: &Connection,
    student_id: StudentId,
    exam_id: ExamId,
    class_id: ClassId,
    template_key: i64,
) -> Result<usize, ServiceError> {
    let removed = conn.execute(
        "DELETE FROM result_cards
         WHERE student_id = ?1 AND exam_id = ?2 AND class_id = ?3 AND template_id = ?4",
        [student_id.0, exam_id.0, class_id.0, template_key],
    )?;
    Ok(removed)
}

/// Document locations currently recorded on one template's cards, keyed by student.
pub(crate) fn card_documents(
    conn: &Connection,
    exam_id: ExamId,
    class_id: ClassId,
    template_key: i64,
) -> Result<BTreeMap<StudentId, String>, ServiceError> {
    let mut stmt = conn.prepare(
        "SELECT student_id, pdf_path FROM result_cards
         WHERE exam_id = ?1 AND class_id = ?2 AND template_id = ?3 AND pdf_path IS NOT NULL",
    )?;
    let rows = stmt.query_map([exam_id.0, class_id.0, template_key], |row| {
        Ok((StudentId(row.get(0)?), row.get::<_, String>(1)?))
    })?;
    rows.collect::<rusqlite::Result<BTreeMap<_, _>>>()
        .map_err(ServiceError::from)
}

const CARD_COLUMNS: &str = "id, student_id, exam_id, class_id, template_id, format, total_obtained,
     total_possible, score, grade, class_rank, subjects, pdf_path, generated_at";

fn card_from_row(row: &Row<'_>) -> rusqlite::Result<ResultCard> {
    let template_key: i64 = row.get(4)?;
    Ok(ResultCard {
        id: ResultCardId(row.get(0)?),
        student_id: StudentId(row.get(1)?),
        exam_id: ExamId(row.get(2)?),
        class_id: ClassId(row.get(3)?),
        template_id: (template_key != DEFAULT_TEMPLATE_KEY).then_some(TemplateId(template_key)),
        format: parsed_at(row, 5, ResultFormat::parse)?,
        total_obtained: decimal_at(row, 6)?,
        total_possible: decimal_at(row, 7)?,
        score: decimal_at(row, 8)?,
        grade: row.get(9)?,
        rank: row.get(10)?,
        subjects: json_at(row, 11)?,
        pdf_path: row.get(12)?,
        generated_at: row.get(13)?,
    })
}

pub(crate) fn class_cards(
    conn: &Connection,
    exam_id: ExamId,
    class_id: ClassId,
) -> Result<Vec<ResultCard>, ServiceError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CARD_COLUMNS} FROM result_cards
         WHERE exam_id = ?1 AND class_id = ?2
         ORDER BY template_id, student_id"
    ))?;
    let rows = stmt.query_map([exam_id.0, class_id.0], card_from_row)?;
    let mut cards = Vec::new();
    for row in rows {
        cards.push(row?);
    }
    Ok(cards)
}

pub(crate) fn student_cards(
    conn: &Connection,
    exam_id: ExamId,
    student_id: StudentId,
) -> Result<Vec<ResultCard>, ServiceError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CARD_COLUMNS} FROM result_cards
         WHERE exam_id = ?1 AND student_id = ?2
         ORDER BY template_id"
    ))?;
    let rows = stmt.query_map([exam_id.0, student_id.0], card_from_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(ServiceError::from)
}

fn publish_from_row(row: &Row<'_>) -> rusqlite::Result<ResultPublish> {
    Ok(ResultPublish {
        id: ResultPublishId(row.get(0)?),
        exam_id: ExamId(row.get(1)?),
        class_id: ClassId(row.get(2)?),
        format: parsed_at(row, 3, ResultFormat::parse)?,
        status: parsed_at(row, 4, PublishStatus::parse)?,
        published_at: row.get(5)?,
        published_by: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

pub(crate) fn find_publish(
    conn: &Connection,
    exam_id: ExamId,
    class_id: ClassId,
    format: ResultFormat,
) -> Result<Option<ResultPublish>, ServiceError> {
    let record = conn
        .query_row(
            "SELECT id, exam_id, class_id, format, status, published_at, published_by, updated_at
             FROM result_publishes WHERE exam_id = ?1 AND class_id = ?2 AND format = ?3",
            params![exam_id.0, class_id.0, format.label()],
            publish_from_row,
        )
        .optional()?;
    Ok(record)
}

pub(crate) struct PublishWrite<'a> {
    pub exam_id: ExamId,
    pub class_id: ClassId,
    pub format: ResultFormat,
    pub status: PublishStatus,
    pub published_at: Option<DateTime<Utc>>,
    pub published_by: Option<&'a str>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) fn upsert_publish(
    conn: &Connection,
    publish: &PublishWrite<'_>,
) -> Result<ResultPublish, ServiceError> {
    let record = conn.query_row(
        "INSERT INTO result_publishes(
             exam_id, class_id, format, status, published_at, published_by, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(exam_id, class_id, format) DO UPDATE SET
             status = excluded.status,
             published_at = excluded.published_at,
             published_by = excluded.published_by,
             updated_at = excluded.updated_at
         RETURNING id, exam_id, class_id, format, status, published_at, published_by, updated_at",
        params![
            publish.exam_id.0,
            publish.class_id.0,
            publish.format.label(),
            publish.status.label(),
            publish.published_at,
            publish.published_by,
            publish.updated_at,
        ],
        publish_from_row,
    )?;
    Ok(record)
}

/// Publish status of every format recorded for an exam and class.
pub(crate) fn publish_statuses(
    conn: &Connection,
    exam_id: ExamId,
    class_id: ClassId,
) -> Result<BTreeMap<ResultFormat, PublishStatus>, ServiceError> {
    let mut stmt = conn.prepare(
        "SELECT format, status FROM result_publishes WHERE exam_id = ?1 AND class_id = ?2",
    )?;
    let rows = stmt.query_map([exam_id.0, class_id.0], |row| {
        Ok((
            parsed_at(row, 0, ResultFormat::parse)?,
            parsed_at(row, 1, PublishStatus::parse)?,
        ))
    })?;
    let mut statuses = BTreeMap::new();
    for row in rows {
        let (format, status) = row?;
        statuses.insert(format, status);
    }
    Ok(statuses)
}

pub(crate) fn grade_distribution(
    conn: &Connection,
    exam_id: ExamId,
    class_id: ClassId,
) -> Result<BTreeMap<ResultFormat, Vec<GradeCount>>, ServiceError> {
    let mut stmt = conn.prepare(
        "SELECT format, grade, COUNT(*) FROM result_cards
         WHERE exam_id = ?1 AND class_id = ?2
         GROUP BY format, grade
         ORDER BY format, grade",
    )?;
    let rows = stmt.query_map([exam_id.0, class_id.0], |row| {
        Ok((
            parsed_at(row, 0, ResultFormat::parse)?,
            GradeCount {
                grade: row.get(1)?,
                students: row.get(2)?,
            },
        ))
    })?;
    let mut grouped: BTreeMap<ResultFormat, Vec<GradeCount>> = BTreeMap::new();
    for row in rows {
        let (format, count) = row?;
        grouped.entry(format).or_default().push(count);
    }
    Ok(grouped)
}

pub(crate) fn scores_by_format(
    conn: &Connection,
    exam_id: ExamId,
    class_id: ClassId,
) -> Result<BTreeMap<ResultFormat, Vec<Decimal>>, ServiceError> {
    let mut stmt = conn.prepare(
        "SELECT format, score FROM result_cards WHERE exam_id = ?1 AND class_id = ?2",
    )?;
    let rows = stmt.query_map([exam_id.0, class_id.0], |row| {
        Ok((parsed_at(row, 0, ResultFormat::parse)?, decimal_at(row, 1)?))
    })?;
    let mut grouped: BTreeMap<ResultFormat, Vec<Decimal>> = BTreeMap::new();
    for row in rows {
        let (format, score) = row?;
        grouped.entry(format).or_default().push(score);
    }
    Ok(grouped)
}

/// Draft and finalized mark counts for every subject the class owns.
pub(crate) fn subject_progress(
    conn: &Connection,
    exam_id: ExamId,
    class_id: ClassId,
) -> Result<Vec<SubjectProgress>, ServiceError> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.name,
                COALESCE(SUM(CASE WHEN m.status = 'draft' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN m.status = 'finalized' THEN 1 ELSE 0 END), 0)
         FROM subjects s
         LEFT JOIN subject_marks m ON m.subject_id = s.id AND m.exam_id = ?1
         WHERE s.class_id = ?2
         GROUP BY s.id, s.name
         ORDER BY s.id",
    )?;
    let rows = stmt.query_map([exam_id.0, class_id.0], |row| {
        Ok(SubjectProgress {
            subject_id: SubjectId(row.get(0)?),
            subject_name: row.get(1)?,
            draft: row.get(2)?,
            finalized: row.get(3)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(ServiceError::from)
}
