//! SQL for fees, gateway configs, transactions and receipts.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;

use super::domain::{
    FeeReceipt, FeeReceiptId, FeeStatus, FeeTransaction, FeeTransactionId, GatewayConfigId,
    StudentFee, StudentFeeId, TransactionStatus,
};
use super::gateway::{GatewaySetup, PaymentGatewayConfig};
use crate::error::ServiceError;
use crate::roster::StudentId;
use crate::store::{decimal_at, parsed_at};

pub(crate) fn insert_fee(
    conn: &Connection,
    student_id: StudentId,
    title: &str,
    amount: Decimal,
    due_date: Option<NaiveDate>,
) -> Result<StudentFeeId, ServiceError> {
    conn.execute(
        "INSERT INTO student_fees(student_id, title, amount, paid_amount, status, due_date)
         VALUES(?1, ?2, ?3, '0', ?4, ?5)",
        params![
            student_id.0,
            title,
            amount.to_string(),
            FeeStatus::Unpaid.label(),
            due_date
        ],
    )?;
    Ok(StudentFeeId(conn.last_insert_rowid()))
}

fn fee_from_row(row: &Row<'_>) -> rusqlite::Result<StudentFee> {
    Ok(StudentFee {
        id: StudentFeeId(row.get(0)?),
        student_id: StudentId(row.get(1)?),
        title: row.get(2)?,
        amount: decimal_at(row, 3)?,
        paid_amount: decimal_at(row, 4)?,
        status: parsed_at(row, 5, FeeStatus::parse)?,
        due_date: row.get(6)?,
        paid_date: row.get(7)?,
    })
}

pub(crate) fn find_fee(
    conn: &Connection,
    fee_id: StudentFeeId,
) -> Result<Option<StudentFee>, ServiceError> {
    let fee = conn
        .query_row(
            "SELECT id, student_id, title, amount, paid_amount, status, due_date, paid_date
             FROM student_fees WHERE id = ?1",
            [fee_id.0],
            fee_from_row,
        )
        .optional()?;
    Ok(fee)
}

/// The only write path for `paid_amount`.
pub(crate) fn record_payment(
    conn: &Connection,
    fee_id: StudentFeeId,
    paid_amount: Decimal,
    status: FeeStatus,
    paid_date: DateTime<Utc>,
) -> Result<(), ServiceError> {
    conn.execute(
        "UPDATE student_fees SET paid_amount = ?2, status = ?3, paid_date = ?4 WHERE id = ?1",
        params![fee_id.0, paid_amount.to_string(), status.label(), paid_date],
    )?;
    Ok(())
}

fn gateway_from_row(row: &Row<'_>) -> rusqlite::Result<PaymentGatewayConfig> {
    Ok(PaymentGatewayConfig {
        id: GatewayConfigId(row.get(0)?),
        gateway: row.get(1)?,
        key_id: row.get(2)?,
        currency: row.get(3)?,
        is_active: row.get(4)?,
    })
}

pub(crate) fn active_gateway(conn: &Connection) -> Result<Option<PaymentGatewayConfig>, ServiceError> {
    let config = conn
        .query_row(
            "SELECT id, gateway, key_id, currency, is_active
             FROM payment_gateway_configs WHERE is_active = 1",
            [],
            gateway_from_row,
        )
        .optional()?;
    Ok(config)
}

pub(crate) fn gateway_configured(conn: &Connection, gateway: &str) -> Result<bool, ServiceError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM payment_gateway_configs WHERE gateway = ?1",
            [gateway],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Clears the active flag on every gateway except `keep`.
pub(crate) fn deactivate_other_gateways(conn: &Connection, keep: &str) -> Result<usize, ServiceError> {
    let changed = conn.execute(
        "UPDATE payment_gateway_configs SET is_active = 0 WHERE gateway <> ?1 AND is_active = 1",
        [keep],
    )?;
    Ok(changed)
}

/// Inserts or updates a gateway by name. An existing active flag is kept unless `activate`.
pub(crate) fn upsert_gateway(
    conn: &Connection,
    setup: &GatewaySetup,
) -> Result<PaymentGatewayConfig, ServiceError> {
    let config = conn.query_row(
        "INSERT INTO payment_gateway_configs(gateway, key_id, currency, is_active)
         VALUES(?1, ?2, ?3, ?4)
         ON CONFLICT(gateway) DO UPDATE SET
             key_id = excluded.key_id,
             currency = excluded.currency,
             is_active = MAX(is_active, excluded.is_active)
         RETURNING id, gateway, key_id, currency, is_active",
        params![setup.gateway, setup.key_id, setup.currency, setup.activate],
        gateway_from_row,
    )?;
    Ok(config)
}

pub(crate) struct TransactionWrite<'a> {
    pub student_fee_id: StudentFeeId,
    pub gateway: &'a str,
    pub transaction_id: &'a str,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub payment_method: Option<&'a str>,
    pub paid_at: Option<DateTime<Utc>>,
    pub recorded_at: DateTime<Utc>,
}

pub(crate) fn insert_transaction(
    conn: &Connection,
    transaction: &TransactionWrite<'_>,
) -> Result<FeeTransactionId, ServiceError> {
    conn.execute(
        "INSERT INTO fee_transactions(
             student_fee_id, gateway, transaction_id, amount, status,
             payment_method, paid_at, recorded_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            transaction.student_fee_id.0,
            transaction.gateway,
            transaction.transaction_id,
            transaction.amount.to_string(),
            transaction.status.label(),
            transaction.payment_method,
            transaction.paid_at,
            transaction.recorded_at,
        ],
    )?;
    Ok(FeeTransactionId(conn.last_insert_rowid()))
}

pub(crate) fn link_receipt(
    conn: &Connection,
    transaction_id: FeeTransactionId,
    receipt_id: FeeReceiptId,
) -> Result<(), ServiceError> {
    conn.execute(
        "UPDATE fee_transactions SET receipt_id = ?2 WHERE id = ?1",
        [transaction_id.0, receipt_id.0],
    )?;
    Ok(())
}

const TRANSACTION_COLUMNS: &str = "id, student_fee_id, gateway, transaction_id, amount, status,
     payment_method, paid_at, recorded_at, receipt_id";

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<FeeTransaction> {
    let receipt_id: Option<i64> = row.get(9)?;
    Ok(FeeTransaction {
        id: FeeTransactionId(row.get(0)?),
        student_fee_id: StudentFeeId(row.get(1)?),
        gateway: row.get(2)?,
        transaction_id: row.get(3)?,
        amount: decimal_at(row, 4)?,
        status: parsed_at(row, 5, TransactionStatus::parse)?,
        payment_method: row.get(6)?,
        paid_at: row.get(7)?,
        recorded_at: row.get(8)?,
        receipt_id: receipt_id.map(FeeReceiptId),
    })
}

pub(crate) fn find_transaction(
    conn: &Connection,
    id: FeeTransactionId,
) -> Result<Option<FeeTransaction>, ServiceError> {
    let transaction = conn
        .query_row(
            &format!("SELECT {TRANSACTION_COLUMNS} FROM fee_transactions WHERE id = ?1"),
            [id.0],
            transaction_from_row,
        )
        .optional()?;
    Ok(transaction)
}

/// The transaction that already credited a fee for this gateway reference, if any.
pub(crate) fn find_successful_transaction(
    conn: &Connection,
    gateway: &str,
    transaction_id: &str,
) -> Result<Option<FeeTransaction>, ServiceError> {
    let transaction = conn
        .query_row(
            &format!(
                "SELECT {TRANSACTION_COLUMNS} FROM fee_transactions
                 WHERE gateway = ?1 AND transaction_id = ?2 AND status = 'success'"
            ),
            [gateway, transaction_id],
            transaction_from_row,
        )
        .optional()?;
    Ok(transaction)
}

pub(crate) fn transactions_for_fee(
    conn: &Connection,
    fee_id: StudentFeeId,
) -> Result<Vec<FeeTransaction>, ServiceError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM fee_transactions WHERE student_fee_id = ?1 ORDER BY id"
    ))?;
    let rows = stmt.query_map([fee_id.0], transaction_from_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(ServiceError::from)
}

pub(crate) struct ReceiptWrite<'a> {
    pub fee_transaction_id: FeeTransactionId,
    pub student_fee_id: StudentFeeId,
    pub receipt_number: &'a str,
    pub amount: Decimal,
    pub issued_at: DateTime<Utc>,
}

pub(crate) fn insert_receipt(
    conn: &Connection,
    receipt: &ReceiptWrite<'_>,
) -> Result<FeeReceiptId, ServiceError> {
    conn.execute(
        "INSERT INTO fee_receipts(fee_transaction_id, student_fee_id, receipt_number, amount, issued_at)
         VALUES(?1, ?2, ?3, ?4, ?5)",
        params![
            receipt.fee_transaction_id.0,
            receipt.student_fee_id.0,
            receipt.receipt_number,
            receipt.amount.to_string(),
            receipt.issued_at,
        ],
    )?;
    Ok(FeeReceiptId(conn.last_insert_rowid()))
}

const RECEIPT_COLUMNS: &str =
    "id, fee_transaction_id, student_fee_id, receipt_number, amount, issued_at";

fn receipt_from_row(row: &Row<'_>) -> rusqlite::Result<FeeReceipt> {
    Ok(FeeReceipt {
        id: FeeReceiptId(row.get(0)?),
        fee_transaction_id: FeeTransactionId(row.get(1)?),
        student_fee_id: StudentFeeId(row.get(2)?),
        receipt_number: row.get(3)?,
        amount: decimal_at(row, 4)?,
        issued_at: row.get(5)?,
    })
}

pub(crate) fn receipt_for_transaction(
    conn: &Connection,
    transaction_id: FeeTransactionId,
) -> Result<Option<FeeReceipt>, ServiceError> {
    let receipt = conn
        .query_row(
            &format!("SELECT {RECEIPT_COLUMNS} FROM fee_receipts WHERE fee_transaction_id = ?1"),
            [transaction_id.0],
            receipt_from_row,
        )
        .optional()?;
    Ok(receipt)
}

pub(crate) fn find_receipt_by_number(
    conn: &Connection,
    receipt_number: &str,
) -> Result<Option<FeeReceipt>, ServiceError> {
    let receipt = conn
        .query_row(
            &format!("SELECT {RECEIPT_COLUMNS} FROM fee_receipts WHERE receipt_number = ?1"),
            [receipt_number],
            receipt_from_row,
        )
        .optional()?;
    Ok(receipt)
}

pub(crate) fn receipts_for_fee(
    conn: &Connection,
    fee_id: StudentFeeId,
) -> Result<Vec<FeeReceipt>, ServiceError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECEIPT_COLUMNS} FROM fee_receipts WHERE student_fee_id = ?1 ORDER BY id"
    ))?;
    let rows = stmt.query_map([fee_id.0], receipt_from_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(ServiceError::from)
}
