use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use schoolhub::access::{Identity, Role, RolePolicy};
use schoolhub::fees::{
    FeeLedgerService, FeeStatus, GatewaySetup, NewFee, OfflineCheckout, PaymentCallback,
    StudentFee, TransactionStatus,
};
use schoolhub::roster::{NewClass, NewStudent, RosterService, StudentRecord};
use schoolhub::store::Database;

fn admin() -> Identity {
    Identity::new("admin-1", Role::Admin)
}

fn ledger(db: Arc<Database>) -> FeeLedgerService<OfflineCheckout> {
    FeeLedgerService::new(
        db,
        Arc::new(RolePolicy),
        Arc::new(OfflineCheckout),
        Duration::from_secs(5),
    )
}

fn seed(db: &Arc<Database>, service: &FeeLedgerService<OfflineCheckout>) -> (StudentRecord, StudentFee) {
    let roster = RosterService::new(db.clone(), Arc::new(RolePolicy));
    let class = roster
        .create_class(&admin(), NewClass { name: "Grade 1".to_string() })
        .expect("class");
    let student = roster
        .enrol_student(
            &admin(),
            NewStudent {
                class_id: class.id,
                name: "Pia".to_string(),
                admission_no: Some("ADM-9".to_string()),
                guardian_id: None,
            },
        )
        .expect("student");
    service
        .configure_gateway(
            &admin(),
            GatewaySetup {
                gateway: "razorpay".to_string(),
                key_id: "rzp_test".to_string(),
                currency: "INR".to_string(),
                activate: true,
            },
        )
        .expect("gateway");
    let fee = service
        .assign_fee(
            &admin(),
            NewFee {
                student_id: student.id,
                title: "Annual fee".to_string(),
                amount: dec!(1500),
                due_date: None,
            },
        )
        .expect("fee");
    (student, fee)
}

fn success(fee: &StudentFee, reference: &str, amount: Decimal) -> PaymentCallback {
    PaymentCallback {
        student_fee_id: fee.id,
        transaction_id: reference.to_string(),
        gateway: "razorpay".to_string(),
        status: TransactionStatus::Success,
        amount,
        payment_method: None,
        paid_at: None,
    }
}

#[test]
fn concurrent_redeliveries_credit_the_fee_once() {
    let db = Arc::new(Database::open_in_memory().expect("db opens"));
    let service = Arc::new(ledger(db.clone()));
    let (_, fee) = seed(&db, &service);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            let delivery = success(&fee, "pay_race", dec!(500));
            thread::spawn(move || service.record_callback(delivery))
        })
        .collect();

    let mut fresh = 0;
    for handle in handles {
        let outcome = handle
            .join()
            .expect("callback thread")
            .expect("every delivery acknowledged");
        if !outcome.duplicate {
            fresh += 1;
        }
        assert_eq!(outcome.fee.paid_amount, dec!(500));
    }
    assert_eq!(fresh, 1);

    let statement = service.statement(&admin(), fee.id).expect("statement");
    assert_eq!(statement.transactions.len(), 1);
    assert_eq!(statement.receipts.len(), 1);
    assert_eq!(statement.fee.status, FeeStatus::Partial);
}

#[test]
fn ledger_state_persists_across_reopen() {
    let workdir = tempfile::tempdir().expect("tempdir");
    let path = workdir.path().join("ledger.sqlite3");

    let (student, fee, receipt_number) = {
        let db = Arc::new(Database::open(&path).expect("db opens"));
        let service = ledger(db.clone());
        let (student, fee) = seed(&db, &service);
        service
            .record_callback(success(&fee, "pay_a", dec!(1000)))
            .expect("first");
        let outcome = service
            .record_callback(success(&fee, "pay_b", dec!(500)))
            .expect("second");
        let receipt = outcome.receipt.expect("receipt");
        (student, fee, receipt.receipt_number)
    };

    let service = ledger(Arc::new(Database::open(&path).expect("db reopens")));
    let guardian = Identity::for_student("guardian-pia", Role::Guardian, student.id);

    let statement = service.statement(&guardian, fee.id).expect("statement");
    assert_eq!(statement.fee.paid_amount, dec!(1500));
    assert_eq!(statement.fee.status, FeeStatus::Paid);
    assert_eq!(statement.outstanding, Decimal::ZERO);
    assert_eq!(statement.receipts.len(), 2);

    let receipt = service
        .receipt(&guardian, &receipt_number)
        .expect("receipt lookup");
    assert_eq!(receipt.amount, dec!(500));

    // The gateway config survived too, so a replay is still recognised.
    let replay = service
        .record_callback(success(&fee, "pay_b", dec!(500)))
        .expect("replay");
    assert!(replay.duplicate);
    assert_eq!(replay.fee.paid_amount, dec!(1500));
}
