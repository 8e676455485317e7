use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::gateway::GatewayOrder;
use crate::roster::domain::row_id;
use crate::roster::StudentId;

row_id!(
    /// A fee charged to one student.
    StudentFeeId
);
row_id!(FeeTransactionId);
row_id!(FeeReceiptId);
row_id!(GatewayConfigId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeStatus {
    Unpaid,
    Partial,
    Paid,
}

impl FeeStatus {
    pub const fn label(self) -> &'static str {
        match self {
            FeeStatus::Unpaid => "unpaid",
            FeeStatus::Partial => "partial",
            FeeStatus::Paid => "paid",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "unpaid" => Some(FeeStatus::Unpaid),
            "partial" => Some(FeeStatus::Partial),
            "paid" => Some(FeeStatus::Paid),
            _ => None,
        }
    }

    /// Status after `paid` has been received against `amount`.
    pub fn for_balance(paid: Decimal, amount: Decimal) -> Self {
        if paid >= amount {
            FeeStatus::Paid
        } else if paid > Decimal::ZERO {
            FeeStatus::Partial
        } else {
            FeeStatus::Unpaid
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Success,
    Failed,
    Pending,
}

impl TransactionStatus {
    pub const fn label(self) -> &'static str {
        match self {
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Pending => "pending",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "success" => Some(TransactionStatus::Success),
            "failed" => Some(TransactionStatus::Failed),
            "pending" => Some(TransactionStatus::Pending),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFee {
    pub student_id: StudentId,
    pub title: String,
    pub amount: Decimal,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentFee {
    pub id: StudentFeeId,
    pub student_id: StudentId,
    pub title: String,
    pub amount: Decimal,
    pub paid_amount: Decimal,
    pub status: FeeStatus,
    pub due_date: Option<NaiveDate>,
    pub paid_date: Option<DateTime<Utc>>,
}

impl StudentFee {
    /// What is still owed; never negative.
    pub fn outstanding(&self) -> Decimal {
        (self.amount - self.paid_amount).max(Decimal::ZERO)
    }
}

/// One gateway notification as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeeTransaction {
    pub id: FeeTransactionId,
    pub student_fee_id: StudentFeeId,
    pub gateway: String,
    pub transaction_id: String,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub payment_method: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub recorded_at: DateTime<Utc>,
    pub receipt_id: Option<FeeReceiptId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeeReceipt {
    pub id: FeeReceiptId,
    pub fee_transaction_id: FeeTransactionId,
    pub student_fee_id: StudentFeeId,
    pub receipt_number: String,
    pub amount: Decimal,
    pub issued_at: DateTime<Utc>,
}

/// Gateway callback payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCallback {
    pub student_fee_id: StudentFeeId,
    pub transaction_id: String,
    pub gateway: String,
    pub status: TransactionStatus,
    pub amount: Decimal,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallbackOutcome {
    /// The success notification was already credited; nothing changed.
    pub duplicate: bool,
    pub transaction: FeeTransaction,
    pub receipt: Option<FeeReceipt>,
    pub fee: StudentFee,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeeStatement {
    pub fee: StudentFee,
    pub outstanding: Decimal,
    pub transactions: Vec<FeeTransaction>,
    pub receipts: Vec<FeeReceipt>,
}

/// Returned to the payer so the client can open the gateway checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentInitiation {
    pub student_fee_id: StudentFeeId,
    pub gateway: String,
    pub key_id: String,
    pub amount: Decimal,
    pub amount_minor: i64,
    pub currency: String,
    pub order: GatewayOrder,
}
