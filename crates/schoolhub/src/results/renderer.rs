//! Result card documents.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};
use rust_decimal::Decimal;

use super::domain::{ResultFormat, SubjectScore};
use crate::roster::{ClassId, ExamId, StudentId};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("unable to write document {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("unable to encode document: {0}")]
    Encode(String),
    #[error("{0}")]
    Rejected(String),
}

fn encode_error(err: impl fmt::Display) -> RenderError {
    RenderError::Encode(err.to_string())
}

/// Everything printed on one student's card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardDocument {
    pub exam_id: ExamId,
    pub exam_name: String,
    pub class_id: ClassId,
    pub class_name: String,
    pub student_id: StudentId,
    pub student_name: String,
    pub template_key: i64,
    /// Identifies the generation run; two runs never share a value.
    pub revision: String,
    pub format: ResultFormat,
    pub subjects: Vec<SubjectScore>,
    pub total_obtained: Decimal,
    pub total_possible: Decimal,
    pub score: Decimal,
    pub grade: String,
    pub rank: Option<u32>,
}

impl CardDocument {
    pub fn file_name(&self) -> String {
        format!(
            "exam{}-class{}-student{}-t{}-{}.pdf",
            self.exam_id, self.class_id, self.student_id, self.template_key, self.revision
        )
    }

    pub fn title(&self) -> String {
        format!("{}: {}", self.exam_name, self.student_name)
    }

    fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Result card: {}", self.exam_name),
            format!("Student: {} (#{})", self.student_name, self.student_id),
            format!("Class: {}", self.class_name),
            String::new(),
        ];
        for subject in &self.subjects {
            lines.push(format!(
                "{}: {} / {} ({}%) {}",
                subject.subject_name,
                subject.marks_obtained,
                subject.total_marks,
                subject.percentage,
                subject.grade
            ));
        }
        lines.push(String::new());
        lines.push(format!(
            "Total: {} / {}",
            self.total_obtained, self.total_possible
        ));
        let score = match self.format {
            ResultFormat::Percentage => format!("Percentage: {}%", self.score),
            ResultFormat::Gpa => format!("GPA: {}", self.score),
            ResultFormat::Custom => format!("Weighted score: {}", self.score),
        };
        lines.push(score);
        lines.push(format!("Grade: {}", self.grade));
        if let Some(rank) = self.rank {
            lines.push(format!("Class rank: {rank}"));
        }
        lines
    }
}

/// Turns a card into a stored document and returns where it was written.
///
/// `render` must never reuse a location: a card committed by an earlier run keeps
/// pointing at its own document until the run replacing it commits.
pub trait DocumentRenderer: Send + Sync {
    fn render(&self, document: &CardDocument) -> Result<String, RenderError>;

    /// Removes a document an earlier `render` returned. Missing documents are not an error.
    fn discard(&self, _location: &str) -> Result<(), RenderError> {
        Ok(())
    }
}

/// Writes single-page PDF snapshots into `output_dir`.
#[derive(Debug, Clone)]
pub struct PdfSnapshotRenderer {
    output_dir: PathBuf,
}

impl PdfSnapshotRenderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

impl DocumentRenderer for PdfSnapshotRenderer {
    fn render(&self, document: &CardDocument) -> Result<String, RenderError> {
        let path = self.output_dir.join(document.file_name());
        let location = path.display().to_string();
        let io_error = |source| RenderError::Io {
            path: location.clone(),
            source,
        };

        let mut pdf = card_pdf(document)?;
        let mut bytes = Vec::new();
        pdf.save_to(&mut bytes).map_err(encode_error)?;

        fs::create_dir_all(&self.output_dir).map_err(io_error)?;
        fs::write(&path, bytes).map_err(io_error)?;
        tracing::debug!(path = %location, "result card rendered");
        Ok(location)
    }

    fn discard(&self, location: &str) -> Result<(), RenderError> {
        let path = Path::new(location);
        if !path.starts_with(&self.output_dir) {
            return Err(RenderError::Rejected(format!(
                "{location} is outside {}",
                self.output_dir.display()
            )));
        }
        match fs::remove_file(path) {
            Ok(()) => {
                tracing::debug!(path = %location, "result card document removed");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(RenderError::Io {
                path: location.to_string(),
                source,
            }),
        }
    }
}

const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 56;
const FONT_SIZE: i64 = 12;
const LEADING: i64 = 16;

/// One A4 page of Helvetica text. The document info carries the exact title, since
/// the page text is limited to what WinAnsiEncoding can show.
fn card_pdf(document: &CardDocument) -> Result<Document, RenderError> {
    let mut doc = Document::with_version("1.4");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), FONT_SIZE.into()]),
        Operation::new("TL", vec![LEADING.into()]),
        Operation::new("Td", vec![MARGIN.into(), (PAGE_HEIGHT - MARGIN).into()]),
    ];
    for line in document.lines() {
        operations.push(Operation::new(
            "Tj",
            vec![Object::String(win_ansi(&line), StringFormat::Literal)],
        ));
        operations.push(Operation::new("T*", vec![]));
    }
    operations.push(Operation::new("ET", vec![]));
    let content = Content { operations }.encode().map_err(encode_error)?;
    let content_id = doc.add_object(Stream::new(dictionary! {}, content));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        "Contents" => content_id,
        "Resources" => resources_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => text_string(&document.title()),
        "Producer" => Object::string_literal("schoolhub"),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);
    Ok(doc)
}

/// WinAnsiEncoding bytes for the standard Helvetica font; unmapped characters become `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|ch| match ch as u32 {
            code @ (0x20..=0x7e | 0xa0..=0xff) => code as u8,
            0x20ac => 0x80,
            0x2018 => 0x91,
            0x2019 => 0x92,
            0x201c => 0x93,
            0x201d => 0x94,
            0x2022 => 0x95,
            0x2013 => 0x96,
            0x2014 => 0x97,
            _ => b'?',
        })
        .collect()
}

/// PDF text string in UTF-16BE with a byte order mark.
fn text_string(text: &str) -> Object {
    let mut bytes = vec![0xfe, 0xff];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::SubjectId;
    use rust_decimal_macros::dec;

    fn document() -> CardDocument {
        CardDocument {
            exam_id: ExamId(3),
            exam_name: "Midterm (Spring)".to_string(),
            class_id: ClassId(2),
            class_name: "Grade 6".to_string(),
            student_id: StudentId(11),
            student_name: "Zoë".to_string(),
            template_key: 0,
            revision: "r1".to_string(),
            format: ResultFormat::Percentage,
            subjects: vec![SubjectScore {
                subject_id: SubjectId(1),
                subject_name: "Maths".to_string(),
                marks_obtained: dec!(45),
                total_marks: dec!(50),
                percentage: dec!(90),
                grade: "A+".to_string(),
            }],
            total_obtained: dec!(45),
            total_possible: dec!(50),
            score: dec!(90),
            grade: "A+".to_string(),
            rank: Some(1),
        }
    }

    fn shown_lines(path: &str) -> Vec<Vec<u8>> {
        let pdf = Document::load(path).expect("pdf parses");
        let pages = pdf.get_pages();
        assert_eq!(pages.len(), 1);
        let page_id = *pages.values().next().expect("one page");
        let content = Content::decode(&pdf.get_page_content(page_id).expect("page content"))
            .expect("content stream decodes");
        content
            .operations
            .into_iter()
            .filter(|op| op.operator == "Tj")
            .filter_map(|op| match op.operands.into_iter().next() {
                Some(Object::String(bytes, _)) => Some(bytes),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn latin_text_keeps_its_accents() {
        assert_eq!(win_ansi("Zoë (A+)"), b"Zo\xeb (A+)".to_vec());
        assert_eq!(win_ansi("€5 – ok"), b"\x805 \x96 ok".to_vec());
        assert_eq!(win_ansi("李"), b"?".to_vec());
    }

    #[test]
    fn card_is_a_readable_single_page_pdf() {
        let dir = tempfile::tempdir().expect("tempdir");
        let renderer = PdfSnapshotRenderer::new(dir.path().join("cards"));

        let path = renderer.render(&document()).expect("rendered");
        assert!(path.ends_with("exam3-class2-student11-t0-r1.pdf"));

        let lines = shown_lines(&path);
        assert_eq!(lines[0], b"Result card: Midterm (Spring)".to_vec());
        assert_eq!(lines[1], b"Student: Zo\xeb (#11)".to_vec());
        assert!(lines.contains(&b"Maths: 45 / 50 (90%) A+".to_vec()));
        assert!(lines.contains(&b"Class rank: 1".to_vec()));

        let pdf = Document::load(&path).expect("pdf parses");
        let info = pdf
            .trailer
            .get(b"Info")
            .and_then(Object::as_reference)
            .and_then(|id| pdf.get_dictionary(id))
            .expect("info dictionary");
        let Object::String(expected, _) = text_string("Midterm (Spring): Zoë") else {
            unreachable!("text strings are string objects")
        };
        match info.get(b"Title").expect("title") {
            Object::String(title, _) => assert_eq!(title, &expected),
            other => panic!("unexpected title object {other:?}"),
        }
    }

    #[test]
    fn each_revision_gets_its_own_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let renderer = PdfSnapshotRenderer::new(dir.path());

        let first = renderer.render(&document()).expect("first");
        let second = renderer
            .render(&CardDocument {
                revision: "r2".to_string(),
                score: dec!(40),
                ..document()
            })
            .expect("second");
        assert_ne!(first, second);
        assert!(shown_lines(&first).contains(&b"Percentage: 90%".to_vec()));
        assert!(shown_lines(&second).contains(&b"Percentage: 40%".to_vec()));

        renderer.discard(&first).expect("discarded");
        assert!(!Path::new(&first).exists());
        assert!(Path::new(&second).exists());
        renderer.discard(&first).expect("second discard is a no-op");
    }

    #[test]
    fn discard_stays_inside_the_output_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let outside = dir.path().join("keep.pdf");
        fs::write(&outside, b"%PDF-").expect("written");
        let renderer = PdfSnapshotRenderer::new(dir.path().join("cards"));

        let err = renderer
            .discard(&outside.display().to_string())
            .expect_err("rejected");
        assert!(matches!(err, RenderError::Rejected(_)));
        assert!(outside.exists());
    }
}
