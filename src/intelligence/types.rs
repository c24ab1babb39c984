use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::enums::{AutoSource, FindingKind, SourceKind};
use crate::models::{MedicationEntry, PatientRecord};

/// Age assumed for an age-eligible patient whose exact age was not recorded.
pub const DEFAULT_ELIGIBLE_AGE: u32 = 70;

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    #[serde(rename = "baja")]
    Low,
    #[serde(rename = "moderada")]
    Moderate,
    #[serde(rename = "alta")]
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "baja",
            Self::Moderate => "moderada",
            Self::High => "alta",
        }
    }

    /// Lenient parse of reference-data severity text.
    pub fn from_text(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "alta" | "grave" | "mayor" | "high" => Some(Self::High),
            "moderada" | "media" | "moderate" => Some(Self::Moderate),
            "baja" | "leve" | "menor" | "low" => Some(Self::Low),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// A medication entry tagged with where it came from.
/// Rebuilt on every evaluation pass, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatedMedication {
    pub entry: MedicationEntry,
    pub source: SourceKind,
    /// Human label of the source kind.
    pub origin: String,
    /// Source kind plus container id; two entries share a key only when
    /// they live in the same container.
    pub source_key: String,
}

impl AggregatedMedication {
    /// Upper-cased grouping key.
    pub fn ingredient(&self) -> String {
        self.entry.base_ingredient.trim().to_uppercase()
    }
}

/// One ingredient present in two or more source containers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DuplicateGroup {
    pub base_ingredient: String,
    pub members: Vec<AggregatedMedication>,
    pub origins: BTreeSet<String>,
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Patient facts the rules are gated on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientProfile {
    pub age: Option<u32>,
    pub egfr: Option<f64>,
    /// Flagged as 65 or older.
    pub age_eligible: bool,
    pub chronic_kidney_disease: bool,
}

impl PatientProfile {
    pub fn from_record(record: &PatientRecord) -> Self {
        let age = record
            .age
            .or(record.age65.then_some(DEFAULT_ELIGIBLE_AGE));
        Self {
            age,
            egfr: record.egfr,
            age_eligible: record.age65,
            chronic_kidney_disease: record.has_chronic_kidney_disease(),
        }
    }
}

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

/// Ingredients that satisfied one named group of an interaction rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMatch {
    pub group: String,
    /// Display names of the matched ingredients.
    pub ingredients: Vec<String>,
}

/// One clinical observation produced by an evaluation pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub kind: FindingKind,
    pub title: String,
    /// Composed human text, also the sort key.
    pub description: String,
    pub severity: Option<Severity>,
    /// Display names of the ingredients involved.
    pub ingredients: Vec<String>,
    pub groups: Vec<GroupMatch>,
    pub recommendation: Option<String>,
}

impl Finding {
    pub fn new(kind: FindingKind, title: &str, description: String) -> Self {
        Self {
            kind,
            title: title.to_string(),
            description,
            severity: None,
            ingredients: Vec::new(),
            groups: Vec::new(),
            recommendation: None,
        }
    }

    pub fn auto_source(&self) -> AutoSource {
        self.kind.auto_source()
    }
}

/// Sort findings by description for stable rendering.
pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        a.description
            .cmp(&b.description)
            .then_with(|| a.kind.cmp(&b.kind))
    });
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("Reference data load failed ({0}): {1}")]
    Load(String, String),

    #[error("Reference data parse failed ({0}): {1}")]
    Parse(String, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn profile_defaults_age_when_only_flagged() {
        let mut record = PatientRecord::new("ABC", Utc::now());
        record.age65 = true;
        let profile = PatientProfile::from_record(&record);
        assert_eq!(profile.age, Some(DEFAULT_ELIGIBLE_AGE));
        assert!(profile.age_eligible);

        record.age = Some(82);
        assert_eq!(PatientProfile::from_record(&record).age, Some(82));

        record.age65 = false;
        record.age = None;
        assert_eq!(PatientProfile::from_record(&record).age, None);
    }

    #[test]
    fn severity_text_is_lenient() {
        assert_eq!(Severity::from_text(" ALTA "), Some(Severity::High));
        assert_eq!(Severity::from_text("leve"), Some(Severity::Low));
        assert_eq!(Severity::from_text("?"), None);
    }

    #[test]
    fn findings_sort_by_description() {
        let mut findings = vec![
            Finding::new(FindingKind::Interaction, "t", "b".into()),
            Finding::new(FindingKind::Criterion, "t", "a".into()),
        ];
        sort_findings(&mut findings);
        assert_eq!(findings[0].description, "a");
        assert_eq!(findings[1].auto_source(), AutoSource::Interaction);
    }
}
