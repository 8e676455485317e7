use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use chrono::Utc;
use rust_decimal::Decimal;

use super::domain::{
    CallbackOutcome, FeeStatement, FeeStatus, FeeReceipt, NewFee, PaymentCallback,
    PaymentInitiation, StudentFee, StudentFeeId, TransactionStatus,
};
use super::gateway::{
    to_minor_units, CallbackVerifier, GatewaySetup, OrderDescriptor, PaymentGateway,
    PaymentGatewayConfig,
};
use super::ledger::{self, ReceiptWrite, TransactionWrite};
use crate::access::{Action, Authorizer, Identity, Scope};
use crate::deadline::Deadline;
use crate::error::{FieldError, ServiceError};
use crate::roster::service::find_student;
use crate::store::Database;

/// Fee assignment, payment initiation and gateway reconciliation.
pub struct FeeLedgerService<G> {
    db: Arc<Database>,
    authorizer: Arc<dyn Authorizer>,
    gateway: Arc<G>,
    callback_verifier: Option<Arc<dyn CallbackVerifier>>,
    payment_timeout: Duration,
}

impl<G> FeeLedgerService<G>
where
    G: PaymentGateway + 'static,
{
    pub fn new(
        db: Arc<Database>,
        authorizer: Arc<dyn Authorizer>,
        gateway: Arc<G>,
        payment_timeout: Duration,
    ) -> Self {
        Self {
            db,
            authorizer,
            gateway,
            callback_verifier: None,
            payment_timeout,
        }
    }

    /// Requires every callback delivery to pass `verifier` before it reaches the ledger.
    pub fn with_callback_verifier(mut self, verifier: Arc<dyn CallbackVerifier>) -> Self {
        self.callback_verifier = Some(verifier);
        self
    }

    pub fn verify_callback(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), ServiceError> {
        let Some(verifier) = &self.callback_verifier else {
            return Ok(());
        };
        verifier.verify(headers, body).map_err(|err| {
            tracing::warn!(error = %err, "payment callback failed verification");
            ServiceError::Unauthenticated(err.to_string())
        })
    }

    pub fn assign_fee(&self, identity: &Identity, fee: NewFee) -> Result<StudentFee, ServiceError> {
        self.authorizer
            .ensure(identity, Action::AssignFees, Scope::Any)?;
        let title = fee.title.trim().to_string();
        let mut errors = Vec::new();
        if title.is_empty() {
            errors.push(FieldError::new("title", "must not be blank"));
        }
        if fee.amount <= Decimal::ZERO {
            errors.push(FieldError::new("amount", "must be greater than zero"));
        }
        if !errors.is_empty() {
            return Err(ServiceError::Validation(errors));
        }

        let created = self.db.write(|tx| {
            find_student(tx, fee.student_id)?
                .ok_or_else(|| ServiceError::not_found("student", fee.student_id))?;
            let id = ledger::insert_fee(tx, fee.student_id, &title, fee.amount, fee.due_date)?;
            ledger::find_fee(tx, id)?.ok_or_else(|| ServiceError::not_found("fee", id))
        })?;

        tracing::info!(
            fee_id = %created.id,
            student_id = %created.student_id,
            amount = %created.amount,
            "fee assigned"
        );
        Ok(created)
    }

    pub fn statement(
        &self,
        identity: &Identity,
        fee_id: StudentFeeId,
    ) -> Result<FeeStatement, ServiceError> {
        self.authorizer.ensure(identity, Action::ViewFee, Scope::Any)?;

        self.db.read(|conn| {
            let fee = ledger::find_fee(conn, fee_id)?
                .ok_or_else(|| ServiceError::not_found("fee", fee_id))?;
            self.authorizer
                .ensure(identity, Action::ViewFee, Scope::Student(fee.student_id))?;
            let transactions = ledger::transactions_for_fee(conn, fee.id)?;
            let receipts = ledger::receipts_for_fee(conn, fee.id)?;
            Ok(FeeStatement {
                outstanding: fee.outstanding(),
                fee,
                transactions,
                receipts,
            })
        })
    }

    /// Builds a gateway order for the outstanding balance. Nothing in the ledger changes.
    pub fn initiate_payment(
        &self,
        identity: &Identity,
        fee_id: StudentFeeId,
    ) -> Result<PaymentInitiation, ServiceError> {
        self.authorizer.ensure(identity, Action::Pay, Scope::Any)?;

        let (fee, config) = self.db.read(|conn| -> Result<_, ServiceError> {
            let fee = ledger::find_fee(conn, fee_id)?
                .ok_or_else(|| ServiceError::not_found("fee", fee_id))?;
            self.authorizer
                .ensure(identity, Action::Pay, Scope::Student(fee.student_id))?;
            let config = ledger::active_gateway(conn)?.ok_or(ServiceError::NoGatewayConfigured)?;
            Ok((fee, config))
        })?;

        let charge = fee.amount - fee.paid_amount;
        if charge <= Decimal::ZERO {
            return Err(ServiceError::Conflict(format!(
                "fee {} is already settled",
                fee.id
            )));
        }
        let amount_minor = to_minor_units(charge, &config.currency).ok_or_else(|| {
            ServiceError::validation("amount", "outstanding balance cannot be charged in minor units")
        })?;

        let notes = BTreeMap::from([
            ("student_fee_id".to_string(), fee.id.to_string()),
            ("student_id".to_string(), fee.student_id.to_string()),
            ("fee_title".to_string(), fee.title.clone()),
        ]);
        let descriptor = OrderDescriptor {
            gateway: config.gateway.clone(),
            key_id: config.key_id.clone(),
            amount_minor,
            currency: config.currency.clone(),
            notes,
        };
        let order = self.gateway.create_order(&descriptor).map_err(|err| {
            tracing::warn!(fee_id = %fee.id, gateway = %config.gateway, error = %err, "order creation failed");
            ServiceError::Gateway(err.to_string())
        })?;

        tracing::info!(
            fee_id = %fee.id,
            gateway = %config.gateway,
            order_id = %order.order_id,
            amount_minor,
            "payment initiated"
        );
        Ok(PaymentInitiation {
            student_fee_id: fee.id,
            gateway: config.gateway,
            key_id: config.key_id,
            amount: charge,
            amount_minor,
            currency: config.currency,
            order,
        })
    }

    /// Stores a gateway config; activating it deactivates every other gateway.
    pub fn configure_gateway(
        &self,
        identity: &Identity,
        setup: GatewaySetup,
    ) -> Result<PaymentGatewayConfig, ServiceError> {
        self.authorizer
            .ensure(identity, Action::ConfigureGateway, Scope::Any)?;
        let setup = GatewaySetup {
            gateway: setup.gateway.trim().to_ascii_lowercase(),
            key_id: setup.key_id.trim().to_string(),
            currency: setup.currency.trim().to_ascii_uppercase(),
            activate: setup.activate,
        };
        let mut errors = Vec::new();
        if setup.gateway.is_empty() {
            errors.push(FieldError::new("gateway", "must not be blank"));
        }
        if setup.key_id.is_empty() {
            errors.push(FieldError::new("key_id", "must not be blank"));
        }
        if setup.currency.len() != 3 || !setup.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            errors.push(FieldError::new("currency", "must be a three-letter ISO code"));
        }
        if !errors.is_empty() {
            return Err(ServiceError::Validation(errors));
        }

        let config = self.db.write(|tx| {
            if setup.activate {
                ledger::deactivate_other_gateways(tx, &setup.gateway)?;
            }
            ledger::upsert_gateway(tx, &setup)
        })?;

        tracing::info!(
            gateway = %config.gateway,
            currency = %config.currency,
            active = config.is_active,
            "payment gateway configured"
        );
        Ok(config)
    }

    /// Appends the gateway notification and, for a first successful delivery, credits
    /// the fee and issues exactly one receipt. All of it commits or none of it does.
    pub fn record_callback(&self, callback: PaymentCallback) -> Result<CallbackOutcome, ServiceError> {
        let deadline = Deadline::start("payment callback", self.payment_timeout);
        let gateway = callback.gateway.trim().to_ascii_lowercase();
        let reference = callback.transaction_id.trim().to_string();
        validate_callback(&callback, &gateway, &reference)?;

        let outcome = self.db.write(|tx| {
            if !ledger::gateway_configured(tx, &gateway)? {
                return Err(ServiceError::validation(
                    "gateway",
                    format!("gateway '{gateway}' is not configured"),
                ));
            }
            let fee = ledger::find_fee(tx, callback.student_fee_id)?
                .ok_or_else(|| ServiceError::not_found("fee", callback.student_fee_id))?;

            if callback.status == TransactionStatus::Success {
                if let Some(original) = ledger::find_successful_transaction(tx, &gateway, &reference)? {
                    let receipt = ledger::receipt_for_transaction(tx, original.id)?;
                    let fee = ledger::find_fee(tx, original.student_fee_id)?
                        .ok_or_else(|| ServiceError::not_found("fee", original.student_fee_id))?;
                    return Ok(CallbackOutcome {
                        duplicate: true,
                        transaction: original,
                        receipt,
                        fee,
                    });
                }
            }

            let now = Utc::now();
            let transaction_id = ledger::insert_transaction(
                tx,
                &TransactionWrite {
                    student_fee_id: fee.id,
                    gateway: &gateway,
                    transaction_id: &reference,
                    amount: callback.amount,
                    status: callback.status,
                    payment_method: callback.payment_method.as_deref(),
                    paid_at: callback.paid_at,
                    recorded_at: now,
                },
            )
            .map_err(|err| {
                err.on_duplicate(|| format!("transaction '{reference}' was already credited"))
            })?;

            if callback.status == TransactionStatus::Success {
                let paid_amount = fee.paid_amount + callback.amount;
                let status = FeeStatus::for_balance(paid_amount, fee.amount);
                ledger::record_payment(tx, fee.id, paid_amount, status, now)?;

                let receipt_number = receipt_number(now, transaction_id.0);
                let receipt_id = ledger::insert_receipt(
                    tx,
                    &ReceiptWrite {
                        fee_transaction_id: transaction_id,
                        student_fee_id: fee.id,
                        receipt_number: &receipt_number,
                        amount: callback.amount,
                        issued_at: now,
                    },
                )?;
                ledger::link_receipt(tx, transaction_id, receipt_id)?;
            }

            deadline.check()?;
            let transaction = ledger::find_transaction(tx, transaction_id)?
                .ok_or_else(|| ServiceError::not_found("transaction", transaction_id))?;
            let receipt = ledger::receipt_for_transaction(tx, transaction_id)?;
            let fee = ledger::find_fee(tx, fee.id)?
                .ok_or_else(|| ServiceError::not_found("fee", fee.id))?;
            Ok(CallbackOutcome {
                duplicate: false,
                transaction,
                receipt,
                fee,
            })
        });

        match &outcome {
            Ok(outcome) if outcome.duplicate => tracing::warn!(
                gateway = %gateway,
                transaction_id = %reference,
                "duplicate success callback acknowledged without crediting"
            ),
            Ok(outcome) => tracing::info!(
                fee_id = %outcome.fee.id,
                transaction = %outcome.transaction.id,
                status = outcome.transaction.status.label(),
                fee_status = outcome.fee.status.label(),
                receipt = outcome.receipt.as_ref().map(|r| r.receipt_number.as_str()).unwrap_or("-"),
                "payment callback recorded"
            ),
            Err(err) => tracing::warn!(
                gateway = %gateway,
                transaction_id = %reference,
                error = %err,
                "payment callback rejected"
            ),
        }
        outcome
    }

    pub fn receipt(
        &self,
        identity: &Identity,
        receipt_number: &str,
    ) -> Result<FeeReceipt, ServiceError> {
        self.authorizer.ensure(identity, Action::ViewFee, Scope::Any)?;

        self.db.read(|conn| {
            let receipt = ledger::find_receipt_by_number(conn, receipt_number)?
                .ok_or_else(|| ServiceError::not_found("receipt", receipt_number))?;
            let fee = ledger::find_fee(conn, receipt.student_fee_id)?
                .ok_or_else(|| ServiceError::not_found("fee", receipt.student_fee_id))?;
            self.authorizer
                .ensure(identity, Action::ViewFee, Scope::Student(fee.student_id))?;
            Ok(receipt)
        })
    }
}

/// `RCPT-<YYYYMMDD>-<ledger transaction row id>`.
pub fn receipt_number(issued_at: chrono::DateTime<Utc>, transaction_row: i64) -> String {
    format!("RCPT-{}-{transaction_row}", issued_at.format("%Y%m%d"))
}

fn validate_callback(
    callback: &PaymentCallback,
    gateway: &str,
    reference: &str,
) -> Result<(), ServiceError> {
    let mut errors = Vec::new();
    if reference.is_empty() {
        errors.push(FieldError::new("transaction_id", "must not be blank"));
    }
    if gateway.is_empty() {
        errors.push(FieldError::new("gateway", "must not be blank"));
    }
    match callback.status {
        TransactionStatus::Success if callback.amount <= Decimal::ZERO => {
            errors.push(FieldError::new(
                "amount",
                "must be greater than zero for a successful payment",
            ));
        }
        _ if callback.amount < Decimal::ZERO => {
            errors.push(FieldError::new("amount", "must not be negative"));
        }
        _ => {}
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ServiceError::Validation(errors))
    }
}
