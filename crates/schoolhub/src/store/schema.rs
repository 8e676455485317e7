use rusqlite::Connection;

use super::StoreError;

pub const SCHEMA_VERSION: i64 = 1;

const TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS classes(
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS subjects(
        id INTEGER PRIMARY KEY,
        class_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        FOREIGN KEY(class_id) REFERENCES classes(id),
        UNIQUE(class_id, name)
    )",
    "CREATE TABLE IF NOT EXISTS students(
        id INTEGER PRIMARY KEY,
        class_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        admission_no TEXT UNIQUE,
        guardian_id TEXT,
        FOREIGN KEY(class_id) REFERENCES classes(id)
    )",
    "CREATE TABLE IF NOT EXISTS exams(
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        held_on TEXT
    )",
    "CREATE TABLE IF NOT EXISTS result_templates(
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        format TEXT NOT NULL CHECK(format IN ('percentage', 'gpa', 'custom')),
        settings TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS subject_marks(
        id INTEGER PRIMARY KEY,
        student_id INTEGER NOT NULL,
        exam_id INTEGER NOT NULL,
        subject_id INTEGER NOT NULL,
        marks_obtained TEXT NOT NULL,
        total_marks TEXT NOT NULL,
        status TEXT NOT NULL CHECK(status IN ('draft', 'finalized')),
        remarks TEXT,
        template_id INTEGER,
        updated_at TEXT NOT NULL,
        FOREIGN KEY(student_id) REFERENCES students(id),
        FOREIGN KEY(exam_id) REFERENCES exams(id),
        FOREIGN KEY(subject_id) REFERENCES subjects(id),
        FOREIGN KEY(template_id) REFERENCES result_templates(id),
        UNIQUE(student_id, exam_id, subject_id)
    )",
    "CREATE TABLE IF NOT EXISTS result_cards(
        id INTEGER PRIMARY KEY,
        student_id INTEGER NOT NULL,
        exam_id INTEGER NOT NULL,
        class_id INTEGER NOT NULL,
        template_id INTEGER NOT NULL DEFAULT 0,
        format TEXT NOT NULL,
        total_obtained TEXT NOT NULL,
        total_possible TEXT NOT NULL,
        score TEXT NOT NULL,
        grade TEXT NOT NULL,
        class_rank INTEGER,
        subjects TEXT NOT NULL,
        pdf_path TEXT,
        generated_at TEXT NOT NULL,
        FOREIGN KEY(student_id) REFERENCES students(id),
        FOREIGN KEY(exam_id) REFERENCES exams(id),
        FOREIGN KEY(class_id) REFERENCES classes(id),
        UNIQUE(student_id, exam_id, class_id, template_id)
    )",
    "CREATE TABLE IF NOT EXISTS result_publishes(
        id INTEGER PRIMARY KEY,
        exam_id INTEGER NOT NULL,
        class_id INTEGER NOT NULL,
        format TEXT NOT NULL,
        status TEXT NOT NULL CHECK(status IN ('draft', 'published', 'archived')),
        published_at TEXT,
        published_by TEXT,
        updated_at TEXT NOT NULL,
        FOREIGN KEY(exam_id) REFERENCES exams(id),
        FOREIGN KEY(class_id) REFERENCES classes(id),
        UNIQUE(exam_id, class_id, format)
    )",
    "CREATE TABLE IF NOT EXISTS student_fees(
        id INTEGER PRIMARY KEY,
        student_id INTEGER NOT NULL,
        title TEXT NOT NULL,
        amount TEXT NOT NULL,
        paid_amount TEXT NOT NULL DEFAULT '0',
        status TEXT NOT NULL CHECK(status IN ('unpaid', 'partial', 'paid')),
        due_date TEXT,
        paid_date TEXT,
        FOREIGN KEY(student_id) REFERENCES students(id)
    )",
    "CREATE TABLE IF NOT EXISTS payment_gateway_configs(
        id INTEGER PRIMARY KEY,
        gateway TEXT NOT NULL UNIQUE,
        key_id TEXT NOT NULL,
        currency TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS fee_transactions(
        id INTEGER PRIMARY KEY,
        student_fee_id INTEGER NOT NULL,
        gateway TEXT NOT NULL,
        transaction_id TEXT NOT NULL,
        amount TEXT NOT NULL,
        status TEXT NOT NULL CHECK(status IN ('success', 'failed', 'pending')),
        payment_method TEXT,
        paid_at TEXT,
        recorded_at TEXT NOT NULL,
        receipt_id INTEGER,
        FOREIGN KEY(student_fee_id) REFERENCES student_fees(id)
    )",
    "CREATE TABLE IF NOT EXISTS fee_receipts(
        id INTEGER PRIMARY KEY,
        fee_transaction_id INTEGER NOT NULL UNIQUE,
        student_fee_id INTEGER NOT NULL,
        receipt_number TEXT NOT NULL UNIQUE,
        amount TEXT NOT NULL,
        issued_at TEXT NOT NULL,
        FOREIGN KEY(fee_transaction_id) REFERENCES fee_transactions(id),
        FOREIGN KEY(student_fee_id) REFERENCES student_fees(id)
    )",
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
    "CREATE INDEX IF NOT EXISTS idx_subjects_class ON subjects(class_id)",
    "CREATE INDEX IF NOT EXISTS idx_subject_marks_exam ON subject_marks(exam_id, student_id)",
    "CREATE INDEX IF NOT EXISTS idx_result_cards_exam_class ON result_cards(exam_id, class_id)",
    "CREATE INDEX IF NOT EXISTS idx_fee_transactions_fee ON fee_transactions(student_fee_id)",
    // At most one active gateway.
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_gateway_single_active
        ON payment_gateway_configs(is_active) WHERE is_active = 1",
    // A gateway transaction id can credit a fee only once.
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_fee_transactions_success_once
        ON fee_transactions(gateway, transaction_id) WHERE status = 'success'",
];

pub(super) fn user_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

pub(super) fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let found = user_version(conn)?;
    if found > SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchema {
            found,
            supported: SCHEMA_VERSION,
        });
    }

    for statement in TABLES.iter().chain(INDEXES) {
        conn.execute(statement, [])?;
    }
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}
