//! Scoring of finalized marks. Everything is `Decimal` so identical marks always give
//! identical cards.

use rust_decimal::{Decimal, RoundingStrategy};

use super::domain::{GradedMark, ResultFormat, SubjectScore};
use super::template::GradingScheme;

/// Points on the 4.0 table, highest band first.
const GPA_POINTS: &[(i64, Decimal)] = &[
    (90, Decimal::from_parts(40, 0, 0, false, 1)),
    (80, Decimal::from_parts(36, 0, 0, false, 1)),
    (70, Decimal::from_parts(32, 0, 0, false, 1)),
    (60, Decimal::from_parts(28, 0, 0, false, 1)),
    (50, Decimal::from_parts(24, 0, 0, false, 1)),
    (40, Decimal::from_parts(20, 0, 0, false, 1)),
];

const GPA_TABLE_MAX: Decimal = Decimal::from_parts(40, 0, 0, false, 1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scored {
    pub total_obtained: Decimal,
    pub total_possible: Decimal,
    pub score: Decimal,
    pub grade: String,
    pub subjects: Vec<SubjectScore>,
}

pub fn round(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero)
}

fn percentage(obtained: Decimal, total: Decimal) -> Decimal {
    obtained
        .checked_div(total)
        .map(|ratio| ratio * Decimal::ONE_HUNDRED)
        .unwrap_or(Decimal::ZERO)
}

pub fn gpa_point(percentage: Decimal) -> Decimal {
    GPA_POINTS
        .iter()
        .find(|(min, _)| percentage >= Decimal::from(*min))
        .map(|(_, point)| *point)
        .unwrap_or(Decimal::ZERO)
}

/// Scores one student's marks under `format`. `marks` must not be empty.
pub fn score(format: ResultFormat, scheme: &GradingScheme, marks: &[GradedMark]) -> Scored {
    let total_obtained: Decimal = marks.iter().map(|mark| mark.marks_obtained).sum();
    let total_possible: Decimal = marks.iter().map(|mark| mark.total_marks).sum();
    let overall = percentage(total_obtained, total_possible);

    let subjects = marks
        .iter()
        .map(|mark| {
            let pct = percentage(mark.marks_obtained, mark.total_marks);
            SubjectScore {
                subject_id: mark.subject_id,
                subject_name: mark.subject_name.clone(),
                marks_obtained: mark.marks_obtained,
                total_marks: mark.total_marks,
                percentage: round(pct, scheme.decimals),
                grade: scheme.letter_for(pct).to_string(),
            }
        })
        .collect();

    let (raw_score, grade) = match format {
        ResultFormat::Percentage => (overall, scheme.letter_for(overall).to_string()),
        ResultFormat::Gpa => {
            let points: Decimal = marks
                .iter()
                .map(|mark| gpa_point(percentage(mark.marks_obtained, mark.total_marks)))
                .sum();
            let average = points
                .checked_div(Decimal::from(marks.len()))
                .unwrap_or(Decimal::ZERO);
            let rescaled = average * scheme.gpa_scale / GPA_TABLE_MAX;
            (rescaled, scheme.letter_for(overall).to_string())
        }
        ResultFormat::Custom => {
            let mut weighted = Decimal::ZERO;
            let mut weights = Decimal::ZERO;
            for mark in marks {
                let weight = scheme.weight_for(mark.subject_id, &mark.subject_name);
                weighted += weight * percentage(mark.marks_obtained, mark.total_marks);
                weights += weight;
            }
            match weighted.checked_div(weights) {
                Some(mean) if !weights.is_zero() => (mean, scheme.letter_for(mean).to_string()),
                _ => (Decimal::ZERO, scheme.fail_grade.clone()),
            }
        }
    };

    Scored {
        total_obtained,
        total_possible,
        score: round(raw_score, scheme.decimals),
        grade,
        subjects,
    }
}

/// Competition ranking, highest score first: equal scores share a rank and the next
/// distinct score skips the tied places.
pub fn competition_ranks(scores: &[Decimal]) -> Vec<u32> {
    scores
        .iter()
        .map(|score| {
            let ahead = scores.iter().filter(|other| *other > score).count();
            ahead as u32 + 1
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::SubjectId;
    use rust_decimal_macros::dec;

    fn mark(subject: i64, name: &str, obtained: Decimal, total: Decimal) -> GradedMark {
        GradedMark {
            subject_id: SubjectId(subject),
            subject_name: name.to_string(),
            marks_obtained: obtained,
            total_marks: total,
        }
    }

    fn sample() -> Vec<GradedMark> {
        vec![
            mark(1, "Maths", dec!(92), dec!(100)),
            mark(2, "Science", dec!(61), dec!(80)),
            mark(3, "History", dec!(35), dec!(50)),
        ]
    }

    #[test]
    fn percentage_uses_overall_totals() {
        let scored = score(ResultFormat::Percentage, &GradingScheme::default(), &sample());
        assert_eq!(scored.total_obtained, dec!(188));
        assert_eq!(scored.total_possible, dec!(230));
        // 188 / 230 = 81.7391...
        assert_eq!(scored.score, dec!(81.74));
        assert_eq!(scored.grade, "A");
        assert_eq!(scored.subjects[1].percentage, dec!(76.25));
        assert_eq!(scored.subjects[1].grade, "B+");
    }

    #[test]
    fn gpa_averages_points_and_grades_on_overall_percentage() {
        let scored = score(ResultFormat::Gpa, &GradingScheme::default(), &sample());
        // points 4.0 + 3.2 + 3.2 = 10.4 over 3 subjects
        assert_eq!(scored.score, dec!(3.47));
        assert_eq!(scored.grade, "A");
    }

    #[test]
    fn gpa_rescales_to_template_scale() {
        let scheme = GradingScheme {
            gpa_scale: dec!(10),
            ..GradingScheme::default()
        };
        let scored = score(
            ResultFormat::Gpa,
            &scheme,
            &[mark(1, "Maths", dec!(85), dec!(100))],
        );
        assert_eq!(scored.score, dec!(9.00));
    }

    #[test]
    fn custom_weights_subjects() {
        let mut scheme = GradingScheme::default();
        scheme.weights.insert("Maths".to_string(), dec!(3));
        scheme.weights.insert("3".to_string(), dec!(0));
        let scored = score(ResultFormat::Custom, &scheme, &sample());
        // (3 * 92 + 1 * 76.25) / 4
        assert_eq!(scored.score, dec!(88.06));
        assert_eq!(scored.grade, "A");
    }

    #[test]
    fn custom_with_no_weight_fails() {
        let mut scheme = GradingScheme::default();
        for subject in ["Maths", "Science", "History"] {
            scheme.weights.insert(subject.to_string(), Decimal::ZERO);
        }
        let scored = score(ResultFormat::Custom, &scheme, &sample());
        assert_eq!(scored.score, Decimal::ZERO);
        assert_eq!(scored.grade, "F");
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round(dec!(2.345), 2), dec!(2.35));
        assert_eq!(round(dec!(2.5), 0), dec!(3));
        assert_eq!(round(dec!(-2.5), 0), dec!(-3));
    }

    #[test]
    fn scoring_is_deterministic() {
        let first = score(ResultFormat::Gpa, &GradingScheme::default(), &sample());
        let second = score(ResultFormat::Gpa, &GradingScheme::default(), &sample());
        assert_eq!(first, second);
    }

    #[test]
    fn ties_share_a_rank() {
        let ranks = competition_ranks(&[dec!(71), dec!(88.5), dec!(71), dec!(40)]);
        assert_eq!(ranks, vec![2, 1, 2, 4]);
    }
}
