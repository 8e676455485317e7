use std::time::Duration;

use chrono::Utc;
use rust_decimal_macros::dec;

use super::common::*;
use crate::error::ServiceError;
use crate::fees::domain::{FeeStatus, StudentFeeId, TransactionStatus};

#[test]
fn partial_then_full_payment_issues_two_receipts() {
    let fx = Fixture::new();
    fx.activate("razorpay", "INR");
    let fee = fx.fee(dec!(1000));

    let first = fx
        .service
        .record_callback(callback(&fee, "pay_001", TransactionStatus::Success, dec!(400)))
        .expect("first instalment");
    assert!(!first.duplicate);
    assert_eq!(first.fee.paid_amount, dec!(400));
    assert_eq!(first.fee.status, FeeStatus::Partial);
    assert!(first.fee.paid_date.is_some());

    let second = fx
        .service
        .record_callback(callback(&fee, "pay_002", TransactionStatus::Success, dec!(600)))
        .expect("second instalment");
    assert_eq!(second.fee.paid_amount, dec!(1000));
    assert_eq!(second.fee.status, FeeStatus::Paid);

    let first_receipt = first.receipt.expect("first receipt");
    let second_receipt = second.receipt.expect("second receipt");
    assert_ne!(first_receipt.receipt_number, second_receipt.receipt_number);
    assert_eq!(first.transaction.receipt_id, Some(first_receipt.id));
    assert_eq!(second_receipt.amount, dec!(600));
    assert_eq!(fx.count("SELECT COUNT(*) FROM fee_receipts"), 2);
}

#[test]
fn receipt_number_embeds_date_and_transaction_row() {
    let fx = Fixture::new();
    fx.activate("razorpay", "INR");
    let fee = fx.fee(dec!(250));

    let outcome = fx
        .service
        .record_callback(callback(&fee, "pay_777", TransactionStatus::Success, dec!(250)))
        .expect("paid");
    let receipt = outcome.receipt.expect("receipt");
    let today = Utc::now().format("%Y%m%d").to_string();
    assert_eq!(
        receipt.receipt_number,
        format!("RCPT-{today}-{}", outcome.transaction.id)
    );
}

#[test]
fn duplicate_success_delivery_is_not_credited_twice() {
    let fx = Fixture::new();
    fx.activate("razorpay", "INR");
    let fee = fx.fee(dec!(1000));
    let delivery = callback(&fee, "pay_dup", TransactionStatus::Success, dec!(400));

    let original = fx
        .service
        .record_callback(delivery.clone())
        .expect("first delivery");
    let replay = fx
        .service
        .record_callback(delivery)
        .expect("replay acknowledged");

    assert!(replay.duplicate);
    assert_eq!(replay.transaction.id, original.transaction.id);
    assert_eq!(replay.receipt, original.receipt);
    assert_eq!(replay.fee.paid_amount, dec!(400));
    assert_eq!(fx.count("SELECT COUNT(*) FROM fee_transactions"), 1);
    assert_eq!(fx.count("SELECT COUNT(*) FROM fee_receipts"), 1);
}

#[test]
fn failed_and_pending_deliveries_are_audited_without_receipts() {
    let fx = Fixture::new();
    fx.activate("razorpay", "INR");
    let fee = fx.fee(dec!(500));

    for status in [TransactionStatus::Pending, TransactionStatus::Failed] {
        let outcome = fx
            .service
            .record_callback(callback(&fee, "pay_retry", status, dec!(500)))
            .expect("recorded");
        assert!(outcome.receipt.is_none());
        assert_eq!(outcome.fee.paid_amount, dec!(0));
        assert_eq!(outcome.fee.status, FeeStatus::Unpaid);
    }

    // The same gateway reference may still succeed afterwards.
    let settled = fx
        .service
        .record_callback(callback(&fee, "pay_retry", TransactionStatus::Success, dec!(500)))
        .expect("success");
    assert_eq!(settled.fee.status, FeeStatus::Paid);
    assert_eq!(fx.count("SELECT COUNT(*) FROM fee_transactions"), 3);
    assert_eq!(fx.count("SELECT COUNT(*) FROM fee_receipts"), 1);
}

#[test]
fn unknown_gateway_is_rejected_without_side_effects() {
    let fx = Fixture::new();
    fx.activate("razorpay", "INR");
    let fee = fx.fee(dec!(100));
    let mut delivery = callback(&fee, "pay_x", TransactionStatus::Success, dec!(100));
    delivery.gateway = "stripe".to_string();

    let err = fx
        .service
        .record_callback(delivery)
        .expect_err("unknown gateway");
    assert!(matches!(err, ServiceError::Validation(_)));
    assert_eq!(fx.count("SELECT COUNT(*) FROM fee_transactions"), 0);
}

#[test]
fn callbacks_for_unknown_fees_are_not_found() {
    let fx = Fixture::new();
    fx.activate("razorpay", "INR");
    let fee = fx.fee(dec!(100));
    let mut delivery = callback(&fee, "pay_y", TransactionStatus::Success, dec!(100));
    delivery.student_fee_id = StudentFeeId(9_999);

    let err = fx
        .service
        .record_callback(delivery)
        .expect_err("unknown fee");
    assert!(matches!(err, ServiceError::NotFound { entity: "fee", .. }));
}

#[test]
fn callback_payload_is_validated() {
    let fx = Fixture::new();
    fx.activate("razorpay", "INR");
    let fee = fx.fee(dec!(100));

    let mut delivery = callback(&fee, "  ", TransactionStatus::Success, dec!(0));
    delivery.gateway = String::new();
    let ServiceError::Validation(fields) = fx
        .service
        .record_callback(delivery)
        .expect_err("invalid")
    else {
        panic!("expected validation error");
    };
    let names: Vec<&str> = fields.iter().map(|field| field.field.as_str()).collect();
    assert_eq!(names, vec!["transaction_id", "gateway", "amount"]);

    // Zero is a legitimate amount on a failed notification.
    fx.service
        .record_callback(callback(&fee, "pay_z", TransactionStatus::Failed, dec!(0)))
        .expect("failed with zero amount");
}

#[test]
fn deadline_overrun_rolls_the_callback_back() {
    let fx = Fixture::with_timeout(Duration::ZERO);
    fx.activate("razorpay", "INR");
    let fee = fx.fee(dec!(100));

    let err = fx
        .service
        .record_callback(callback(&fee, "pay_slow", TransactionStatus::Success, dec!(100)))
        .expect_err("timed out");
    assert!(matches!(err, ServiceError::Timeout { .. }));
    assert_eq!(fx.count("SELECT COUNT(*) FROM fee_transactions"), 0);
    assert_eq!(
        fx.count("SELECT COUNT(*) FROM student_fees WHERE paid_amount = '0'"),
        1
    );
}
