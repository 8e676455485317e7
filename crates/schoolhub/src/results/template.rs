//! Result templates and the typed settings map that configures grading.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::domain::{ResultFormat, TemplateId};
use crate::error::FieldError;

/// A single template setting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Boolean(bool),
    Number(f64),
    Text(String),
}

impl SettingValue {
    fn kind(&self) -> &'static str {
        match self {
            SettingValue::Boolean(_) => "boolean",
            SettingValue::Number(_) => "number",
            SettingValue::Text(_) => "text",
        }
    }
}

pub type TemplateSettings = BTreeMap<String, SettingValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    pub format: ResultFormat,
    #[serde(default)]
    pub settings: TemplateSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultTemplate {
    pub id: TemplateId,
    pub name: String,
    pub format: ResultFormat,
    pub settings: TemplateSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradeBand {
    pub letter: String,
    pub min_percentage: Decimal,
}

impl GradeBand {
    fn new(letter: &str, min_percentage: i64) -> Self {
        Self {
            letter: letter.to_string(),
            min_percentage: Decimal::from(min_percentage),
        }
    }
}

pub const MAX_DECIMALS: u32 = 4;

/// Grading rules resolved from a template, or the built-in defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradingScheme {
    /// Sorted by `min_percentage`, highest first.
    pub bands: Vec<GradeBand>,
    pub fail_grade: String,
    pub gpa_scale: Decimal,
    /// Keyed by subject id or subject name.
    pub weights: BTreeMap<String, Decimal>,
    pub decimals: u32,
    pub rank: bool,
}

impl Default for GradingScheme {
    fn default() -> Self {
        Self {
            bands: vec![
                GradeBand::new("A+", 90),
                GradeBand::new("A", 80),
                GradeBand::new("B+", 70),
                GradeBand::new("B", 60),
                GradeBand::new("C", 50),
                GradeBand::new("D", 40),
            ],
            fail_grade: "F".to_string(),
            gpa_scale: Decimal::from(4),
            weights: BTreeMap::new(),
            decimals: 2,
            rank: true,
        }
    }
}

impl GradingScheme {
    /// Validates `settings` against what `format` accepts and folds them over the defaults.
    pub fn from_settings(
        format: ResultFormat,
        settings: &TemplateSettings,
    ) -> Result<Self, Vec<FieldError>> {
        let mut scheme = GradingScheme::default();
        let mut bands = Vec::new();
        let mut errors = Vec::new();

        for (key, value) in settings {
            let field = format!("settings.{key}");
            let outcome = if let Some(letter) = key.strip_prefix("grade.") {
                band(letter, value).map(|parsed| bands.push(parsed))
            } else if let Some(subject) = key.strip_prefix("weight.") {
                if format != ResultFormat::Custom {
                    Err("weights only apply to custom templates".to_string())
                } else if subject.trim().is_empty() {
                    Err("weight key must name a subject".to_string())
                } else {
                    number(value, |n| n >= Decimal::ZERO, "must be zero or positive")
                        .map(|weight| {
                            scheme.weights.insert(subject.to_string(), weight);
                        })
                }
            } else {
                match key.as_str() {
                    "fail_grade" => text(value).map(|letter| scheme.fail_grade = letter),
                    "gpa.scale" if format == ResultFormat::Gpa => {
                        number(value, |n| n > Decimal::ZERO, "must be greater than zero")
                            .map(|scale| scheme.gpa_scale = scale)
                    }
                    "gpa.scale" => Err("gpa.scale only applies to gpa templates".to_string()),
                    "decimals" => decimals(value).map(|places| scheme.decimals = places),
                    "rank" => match value {
                        SettingValue::Boolean(flag) => {
                            scheme.rank = *flag;
                            Ok(())
                        }
                        other => Err(format!("expected boolean, found {}", other.kind())),
                    },
                    _ => Err("unknown setting".to_string()),
                }
            };
            if let Err(message) = outcome {
                errors.push(FieldError::new(field, message));
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }
        if !bands.is_empty() {
            bands.sort_by(|a: &GradeBand, b: &GradeBand| {
                b.min_percentage
                    .cmp(&a.min_percentage)
                    .then_with(|| a.letter.cmp(&b.letter))
            });
            scheme.bands = bands;
        }
        Ok(scheme)
    }

    /// Letter for a percentage; below every band yields the fail grade.
    pub fn letter_for(&self, percentage: Decimal) -> &str {
        self.bands
            .iter()
            .find(|band| percentage >= band.min_percentage)
            .map(|band| band.letter.as_str())
            .unwrap_or(self.fail_grade.as_str())
    }

    /// Weight for a subject, looked up by id then by name; unlisted subjects weigh 1.
    pub fn weight_for(&self, subject_id: impl std::fmt::Display, subject_name: &str) -> Decimal {
        self.weights
            .get(&subject_id.to_string())
            .or_else(|| self.weights.get(subject_name))
            .copied()
            .unwrap_or(Decimal::ONE)
    }
}

fn band(letter: &str, value: &SettingValue) -> Result<GradeBand, String> {
    let letter = letter.trim();
    if letter.is_empty() {
        return Err("grade key must name a letter".to_string());
    }
    let min = number(
        value,
        |n| n >= Decimal::ZERO && n <= Decimal::ONE_HUNDRED,
        "must be between 0 and 100",
    )?;
    Ok(GradeBand {
        letter: letter.to_string(),
        min_percentage: min,
    })
}

fn number(
    value: &SettingValue,
    accept: impl Fn(Decimal) -> bool,
    requirement: &str,
) -> Result<Decimal, String> {
    let SettingValue::Number(raw) = value else {
        return Err(format!("expected number, found {}", value.kind()));
    };
    let parsed = Decimal::try_from(*raw).map_err(|_| "not a representable number".to_string())?;
    if accept(parsed) {
        Ok(parsed.normalize())
    } else {
        Err(requirement.to_string())
    }
}

fn text(value: &SettingValue) -> Result<String, String> {
    match value {
        SettingValue::Text(raw) if !raw.trim().is_empty() => Ok(raw.trim().to_string()),
        SettingValue::Text(_) => Err("must not be blank".to_string()),
        other => Err(format!("expected text, found {}", other.kind())),
    }
}

fn decimals(value: &SettingValue) -> Result<u32, String> {
    let places = number(
        value,
        |n| n.fract().is_zero() && n >= Decimal::ZERO && n <= Decimal::from(MAX_DECIMALS),
        "must be a whole number from 0 to 4",
    )?;
    Ok(places.mantissa() as u32)
}
