use crate::infra::Services;
use chrono::Local;
use clap::Args;
use rust_decimal::Decimal;
use schoolhub::access::{Identity, Role};
use schoolhub::config::{OperationLimits, PaymentsConfig};
use schoolhub::error::AppError;
use schoolhub::fees::{GatewaySetup, NewFee, PaymentCallback, TransactionStatus};
use schoolhub::results::{
    GenerationRequest, MarkEntry, MarkIngestion, NewTemplate, PdfSnapshotRenderer, PublishRequest,
    PublishStatus, ResultCard, ResultFormat, SettingValue, TemplateSettings,
};
use schoolhub::roster::{NewClass, NewExam, NewStudent, NewSubject, StudentRecord};
use schoolhub::store::Database;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Write PDF result cards into this directory while generating.
    #[arg(long)]
    pub(crate) render_to: Option<PathBuf>,
    /// Skip the fee ledger portion of the demo.
    #[arg(long)]
    pub(crate) skip_fees: bool,
}

const MARKS: [(&str, [u32; 3]); 4] = [
    ("Asha", [92, 88, 79]),
    ("Bilal", [67, 74, 81]),
    ("Chen", [92, 88, 79]),
    ("Dara", [38, 45, 52]),
];

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let db = Arc::new(Database::open_in_memory()?);
    let render = args.render_to.is_some();
    let renderer = PdfSnapshotRenderer::new(
        args.render_to
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("schoolhub-demo")),
    );
    if let Some(dir) = &args.render_to {
        std::fs::create_dir_all(dir)?;
    }
    let services = Services::build(
        db,
        renderer,
        OperationLimits::default(),
        &PaymentsConfig::default(),
    );

    let admin = Identity::new("admin-1", Role::Admin);
    let teacher = Identity::new("teacher-1", Role::Teacher);

    let class = services.roster.create_class(
        &admin,
        NewClass {
            name: "Grade 6".to_string(),
        },
    )?;
    let mut subjects = Vec::new();
    for name in ["Mathematics", "Science", "English"] {
        subjects.push(services.roster.create_subject(
            &admin,
            NewSubject {
                class_id: class.id,
                name: name.to_string(),
            },
        )?);
    }
    let mut students = Vec::new();
    for (index, (name, _)) in MARKS.iter().enumerate() {
        students.push(services.roster.enrol_student(
            &admin,
            NewStudent {
                class_id: class.id,
                name: name.to_string(),
                admission_no: Some(format!("ADM-{:03}", index + 1)),
                guardian_id: Some(format!("guardian-{}", index + 1)),
            },
        )?);
    }
    let exam = services.roster.create_exam(
        &admin,
        NewExam {
            name: "Term 1 Finals".to_string(),
            held_on: Some(Local::now().date_naive()),
        },
    )?;

    println!("Result pipeline demo");
    println!(
        "Class: {} | Exam: {} | Students: {} | Subjects: {}",
        class.name,
        exam.name,
        students.len(),
        subjects.len()
    );

    for (position, subject) in subjects.iter().enumerate() {
        let marks = students
            .iter()
            .zip(MARKS.iter())
            .map(|(student, (_, scores))| MarkEntry {
                student_id: student.id,
                marks_obtained: Decimal::from(scores[position]),
                remarks: None,
            })
            .collect();
        let summary = services.results.ingest_marks(
            &teacher,
            MarkIngestion {
                exam_id: exam.id,
                class_id: class.id,
                subject_id: subject.id,
                total_marks: None,
                template_id: None,
                finalize: true,
                remarks: None,
                marks,
            },
        )?;
        println!(
            "  {}: {} marks ingested ({})",
            subject.name,
            summary.ingested,
            summary.status.label()
        );
    }

    let mut settings = TemplateSettings::new();
    settings.insert("weight.Mathematics".to_string(), SettingValue::Number(2.0));
    for (letter, minimum) in [("O", 90.0), ("A", 75.0), ("B", 60.0), ("C", 45.0)] {
        settings.insert(format!("grade.{letter}"), SettingValue::Number(minimum));
    }
    let weighted = services.results.create_template(
        &teacher,
        NewTemplate {
            name: "Maths-weighted".to_string(),
            format: ResultFormat::Custom,
            settings,
        },
    )?;

    let gpa = services.results.create_template(
        &teacher,
        NewTemplate {
            name: "GPA".to_string(),
            format: ResultFormat::Gpa,
            settings: TemplateSettings::new(),
        },
    )?;

    // Cards are keyed per template; the default template scores by percentage.
    for template_id in [None, Some(gpa.id), Some(weighted.id)] {
        let summary = services.results.generate(
            &teacher,
            GenerationRequest {
                exam_id: exam.id,
                class_id: class.id,
                template_id,
                format: None,
                generate_pdf: render,
            },
        )?;
        println!(
            "  Generated {} {} cards (skipped {}, documents {})",
            summary.generated,
            summary.format.label(),
            summary.skipped,
            summary.documents
        );
    }

    services.results.publish(
        &admin,
        PublishRequest {
            exam_id: exam.id,
            class_id: class.id,
            format: ResultFormat::Percentage,
            status: PublishStatus::Published,
        },
    )?;

    println!("\nClass summary");
    let summary = services.results.class_summary(&teacher, exam.id, class.id)?;
    for format in &summary.formats {
        let grades = format
            .grades
            .iter()
            .map(|count| format!("{}×{}", count.grade, count.students))
            .collect::<Vec<_>>()
            .join(" ");
        let status = format
            .publish_status
            .map(|status| status.label())
            .unwrap_or("unpublished");
        println!(
            "  {:<10} cards {} | average {} | {} | {}",
            format.format.label(),
            format.cards,
            format.average_score,
            grades,
            status
        );
    }

    println!("\nCards visible to guardians");
    for (index, student) in students.iter().enumerate() {
        let guardian =
            Identity::for_student(format!("guardian-{}", index + 1), Role::Guardian, student.id);
        match services.results.student_cards(&guardian, exam.id, student.id) {
            Ok(cards) => {
                for card in cards {
                    print_card(student, &card);
                }
            }
            Err(err) => println!("  {}: {}", student.name, err),
        }
    }

    if !args.skip_fees {
        run_fee_demo(&services, &admin, &students[0])?;
    }

    Ok(())
}

fn print_card(student: &StudentRecord, card: &ResultCard) {
    let rank = card
        .rank
        .map(|rank| rank.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  {:<6} {} score {} grade {} rank {}",
        student.name,
        card.format.label(),
        card.score,
        card.grade,
        rank
    );
    for subject in &card.subjects {
        println!(
            "           {:<12} {}/{} ({}%) {}",
            subject.subject_name,
            subject.marks_obtained,
            subject.total_marks,
            subject.percentage,
            subject.grade
        );
    }
    if let Some(path) = &card.pdf_path {
        println!("           document: {path}");
    }
}

fn run_fee_demo<R>(
    services: &Services<R>,
    admin: &Identity,
    student: &StudentRecord,
) -> Result<(), AppError>
where
    R: schoolhub::results::DocumentRenderer + 'static,
{
    let accountant = Identity::new("accounts-1", Role::Accountant);
    let guardian = Identity::for_student("guardian-1", Role::Guardian, student.id);

    println!("\nFee ledger demo");
    let fee = services.fees.assign_fee(
        &accountant,
        NewFee {
            student_id: student.id,
            title: "Term 1 tuition".to_string(),
            amount: Decimal::from(12_000),
            due_date: None,
        },
    )?;
    services.fees.configure_gateway(
        admin,
        GatewaySetup {
            gateway: "razorpay".to_string(),
            key_id: "rzp_test_demo".to_string(),
            currency: "INR".to_string(),
            activate: true,
        },
    )?;

    let initiation = services.fees.initiate_payment(&guardian, fee.id)?;
    println!(
        "  {} owes {} {}; order {} for {} minor units via {}",
        student.name,
        initiation.amount,
        initiation.currency,
        initiation.order.order_id,
        initiation.amount_minor,
        initiation.gateway
    );

    let deliveries = [
        ("pay_demo_001", TransactionStatus::Failed, 5_000),
        ("pay_demo_002", TransactionStatus::Success, 5_000),
        ("pay_demo_002", TransactionStatus::Success, 5_000),
        ("pay_demo_003", TransactionStatus::Success, 7_000),
    ];
    for (reference, status, amount) in deliveries {
        let outcome = services.fees.record_callback(PaymentCallback {
            student_fee_id: fee.id,
            transaction_id: reference.to_string(),
            gateway: "razorpay".to_string(),
            status,
            amount: Decimal::from(amount),
            payment_method: Some("upi".to_string()),
            paid_at: None,
        })?;
        let receipt = outcome
            .receipt
            .as_ref()
            .map(|receipt| receipt.receipt_number.as_str())
            .unwrap_or("-");
        println!(
            "  {reference} {:<7} {:>6} -> paid {} ({}) receipt {}{}",
            status.label(),
            amount,
            outcome.fee.paid_amount,
            outcome.fee.status.label(),
            receipt,
            if outcome.duplicate { " [duplicate]" } else { "" }
        );
    }

    let statement = services.fees.statement(&guardian, fee.id)?;
    println!(
        "  Statement: {} transactions, {} receipts, outstanding {}",
        statement.transactions.len(),
        statement.receipts.len(),
        statement.outstanding
    );
    Ok(())
}
