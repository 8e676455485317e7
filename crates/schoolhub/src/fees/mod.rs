//! Fee payment ledger: fee assignment, payment initiation, gateway callback
//! reconciliation and receipts.

pub mod domain;
pub mod gateway;
pub(crate) mod ledger;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use domain::{
    CallbackOutcome, FeeReceipt, FeeStatement, FeeStatus, FeeTransaction, NewFee,
    PaymentCallback, PaymentInitiation, StudentFee, StudentFeeId, TransactionStatus,
};
pub use gateway::{
    CallbackVerifier, GatewayError, GatewayOrder, GatewaySetup, OfflineCheckout, OrderDescriptor,
    PaymentGateway, PaymentGatewayConfig, SharedSecretVerifier, CALLBACK_TOKEN_HEADER,
};
pub use router::fees_router;
pub use service::FeeLedgerService;
