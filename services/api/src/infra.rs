use metrics_exporter_prometheus::PrometheusHandle;
use schoolhub::access::{Authorizer, RolePolicy};
use schoolhub::config::{OperationLimits, PaymentsConfig};
use schoolhub::fees::{FeeLedgerService, OfflineCheckout, SharedSecretVerifier};
use schoolhub::results::{DocumentRenderer, ResultService};
use schoolhub::roster::RosterService;
use schoolhub::store::Database;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// The three services sharing one database and one authorization policy.
pub(crate) struct Services<R> {
    pub(crate) roster: Arc<RosterService>,
    pub(crate) results: Arc<ResultService<R>>,
    pub(crate) fees: Arc<FeeLedgerService<OfflineCheckout>>,
}

impl<R> Services<R>
where
    R: DocumentRenderer + 'static,
{
    pub(crate) fn build(
        db: Arc<Database>,
        renderer: R,
        limits: OperationLimits,
        payments: &PaymentsConfig,
    ) -> Self {
        let policy: Arc<dyn Authorizer> = Arc::new(RolePolicy);
        let mut fees = FeeLedgerService::new(
            db.clone(),
            policy.clone(),
            Arc::new(OfflineCheckout),
            limits.payment_timeout,
        );
        match &payments.callback_secret {
            Some(secret) => {
                fees = fees.with_callback_verifier(Arc::new(SharedSecretVerifier::new(secret.clone())));
            }
            None => tracing::warn!("SCHOOLHUB_CALLBACK_SECRET is unset; payment callbacks are not verified"),
        }
        Self {
            roster: Arc::new(RosterService::new(db.clone(), policy.clone())),
            results: Arc::new(ResultService::new(
                db,
                policy,
                Arc::new(renderer),
                limits.generation_timeout,
            )),
            fees: Arc::new(fees),
        }
    }
}
