use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::AutoSource;

/// A medication-related problem attached to a patient record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrmEntry {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub prm_type: String,
    pub detail: String,
    pub date: NaiveDateTime,
    /// True when produced by the rules pass rather than typed by the pharmacist.
    pub auto: bool,
    pub auto_source: Option<AutoSource>,
}

impl PrmEntry {
    pub fn manual(prm_type: &str, detail: &str, date: NaiveDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            prm_type: prm_type.to_string(),
            detail: detail.to_string(),
            date,
            auto: false,
            auto_source: None,
        }
    }

    pub fn automatic(
        source: AutoSource,
        prm_type: &str,
        detail: &str,
        date: NaiveDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            prm_type: prm_type.to_string(),
            detail: detail.to_string(),
            date,
            auto: true,
            auto_source: Some(source),
        }
    }

    /// Same problem, ignoring identity and timestamp.
    pub fn same_problem(&self, other: &PrmEntry) -> bool {
        self.prm_type == other.prm_type
            && self.detail == other.detail
            && self.auto == other.auto
            && self.auto_source == other.auto_source
    }
}
