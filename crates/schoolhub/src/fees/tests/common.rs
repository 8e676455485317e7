use std::sync::{Arc, Mutex};
use std::time::Duration;

use rust_decimal::Decimal;

use crate::access::{Identity, Role, RolePolicy};
use crate::fees::domain::{NewFee, PaymentCallback, StudentFee, TransactionStatus};
use crate::fees::gateway::{
    GatewayError, GatewayOrder, GatewaySetup, OfflineCheckout, OrderDescriptor, PaymentGateway,
};
use crate::fees::service::FeeLedgerService;
use crate::roster::{NewClass, NewStudent, RosterService, StudentRecord};
use crate::store::{Database, StoreError};

/// Captures every order descriptor before delegating to the offline checkout.
#[derive(Default)]
pub(super) struct RecordingGateway {
    orders: Mutex<Vec<OrderDescriptor>>,
}

impl RecordingGateway {
    pub(super) fn orders(&self) -> Vec<OrderDescriptor> {
        self.orders.lock().expect("gateway mutex poisoned").clone()
    }
}

impl PaymentGateway for RecordingGateway {
    fn create_order(&self, order: &OrderDescriptor) -> Result<GatewayOrder, GatewayError> {
        self.orders
            .lock()
            .expect("gateway mutex poisoned")
            .push(order.clone());
        OfflineCheckout.create_order(order)
    }
}

pub(super) struct Fixture {
    pub db: Arc<Database>,
    pub service: Arc<FeeLedgerService<RecordingGateway>>,
    pub gateway: Arc<RecordingGateway>,
    pub student: StudentRecord,
    pub sibling: StudentRecord,
}

impl Fixture {
    pub(super) fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5))
    }

    pub(super) fn with_timeout(payment_timeout: Duration) -> Self {
        let db = Arc::new(Database::open_in_memory().expect("db opens"));
        let roster = RosterService::new(db.clone(), Arc::new(RolePolicy));
        let gateway = Arc::new(RecordingGateway::default());
        let service = Arc::new(FeeLedgerService::new(
            db.clone(),
            Arc::new(RolePolicy),
            gateway.clone(),
            payment_timeout,
        ));

        let class = roster
            .create_class(&admin(), NewClass { name: "Grade 3".to_string() })
            .expect("class");
        let enrol = |name: &str| {
            roster
                .enrol_student(
                    &admin(),
                    NewStudent {
                        class_id: class.id,
                        name: name.to_string(),
                        admission_no: None,
                        guardian_id: Some("parent-7".to_string()),
                    },
                )
                .expect("student")
        };
        let student = enrol("Mina");
        let sibling = enrol("Omar");

        Self {
            db,
            service,
            gateway,
            student,
            sibling,
        }
    }

    pub(super) fn fee(&self, amount: Decimal) -> StudentFee {
        self.service
            .assign_fee(
                &accountant(),
                NewFee {
                    student_id: self.student.id,
                    title: "Term 1 tuition".to_string(),
                    amount,
                    due_date: None,
                },
            )
            .expect("fee assigned")
    }

    pub(super) fn activate(&self, gateway: &str, currency: &str) {
        self.service
            .configure_gateway(
                &admin(),
                GatewaySetup {
                    gateway: gateway.to_string(),
                    key_id: format!("{gateway}_key"),
                    currency: currency.to_string(),
                    activate: true,
                },
            )
            .expect("gateway configured");
    }

    pub(super) fn count(&self, sql: &str) -> i64 {
        self.db
            .read(|conn| {
                conn.query_row(sql, [], |row| row.get(0))
                    .map_err(StoreError::from)
            })
            .expect("count query")
    }
}

pub(super) fn callback(
    fee: &StudentFee,
    transaction_id: &str,
    status: TransactionStatus,
    amount: Decimal,
) -> PaymentCallback {
    PaymentCallback {
        student_fee_id: fee.id,
        transaction_id: transaction_id.to_string(),
        gateway: "razorpay".to_string(),
        status,
        amount,
        payment_method: Some("upi".to_string()),
        paid_at: None,
    }
}

pub(super) fn admin() -> Identity {
    Identity::new("admin-1", Role::Admin)
}

pub(super) fn accountant() -> Identity {
    Identity::new("accounts-1", Role::Accountant)
}
