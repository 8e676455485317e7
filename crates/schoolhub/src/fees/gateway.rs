//! Payment gateway configuration and the order-creation seam.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::http::HeaderMap;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::domain::GatewayConfigId;

/// ISO 4217 currencies charged in whole units.
const ZERO_DECIMAL_CURRENCIES: &[&str] = &["JPY", "KRW", "VND", "CLP", "UGX"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentGatewayConfig {
    pub id: GatewayConfigId,
    pub gateway: String,
    pub key_id: String,
    pub currency: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewaySetup {
    pub gateway: String,
    pub key_id: String,
    pub currency: String,
    #[serde(default)]
    pub activate: bool,
}

/// What the gateway is asked to collect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderDescriptor {
    pub gateway: String,
    pub key_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub notes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub order_id: String,
    pub amount_minor: i64,
    pub currency: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("callback not verified: {0}")]
    Unverified(String),
}

pub trait PaymentGateway: Send + Sync {
    fn create_order(&self, order: &OrderDescriptor) -> Result<GatewayOrder, GatewayError>;
}

static ORDER_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Issues local order references; the payer completes payment out of band and the
/// gateway reports back through the callback route.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineCheckout;

impl PaymentGateway for OfflineCheckout {
    fn create_order(&self, order: &OrderDescriptor) -> Result<GatewayOrder, GatewayError> {
        if order.amount_minor <= 0 {
            return Err(GatewayError::Rejected(
                "amount must be positive".to_string(),
            ));
        }
        let sequence = ORDER_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Ok(GatewayOrder {
            order_id: format!("order_{}_{sequence:06}", order.gateway),
            amount_minor: order.amount_minor,
            currency: order.currency.clone(),
        })
    }
}

/// Header a gateway echoes the shared callback token in.
pub const CALLBACK_TOKEN_HEADER: &str = "x-callback-token";

/// Decides whether a callback delivery came from the gateway. Receives the raw body so
/// signature schemes can be plugged in next to the shared-token check.
pub trait CallbackVerifier: Send + Sync {
    fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), GatewayError>;
}

/// Accepts deliveries whose `x-callback-token` equals the configured secret.
pub struct SharedSecretVerifier {
    secret: String,
}

impl SharedSecretVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl CallbackVerifier for SharedSecretVerifier {
    fn verify(&self, headers: &HeaderMap, _body: &[u8]) -> Result<(), GatewayError> {
        let presented = headers
            .get(CALLBACK_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                GatewayError::Unverified(format!("missing {CALLBACK_TOKEN_HEADER} header"))
            })?;
        if constant_time_eq(presented.as_bytes(), self.secret.as_bytes()) {
            Ok(())
        } else {
            Err(GatewayError::Unverified("callback token mismatch".to_string()))
        }
    }
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .zip(right)
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
}

pub fn currency_exponent(currency: &str) -> u32 {
    if ZERO_DECIMAL_CURRENCIES
        .iter()
        .any(|code| code.eq_ignore_ascii_case(currency))
    {
        0
    } else {
        2
    }
}

/// Converts a major-unit amount to the gateway's integer minor units.
pub fn to_minor_units(amount: Decimal, currency: &str) -> Option<i64> {
    let factor = Decimal::from(10_i64.pow(currency_exponent(currency)));
    amount
        .checked_mul(factor)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}
