use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Application-level constants
pub const APP_NAME: &str = "QFPro";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable overriding the reference data directory.
pub const DATA_DIR_ENV: &str = "QFPRO_DATA_DIR";

/// Reference data file names (inside the data directory).
pub const CATALOG_FILE: &str = "medicamentos.json";
pub const CRITERIA_FILE: &str = "criterios.json";
pub const INTERACTIONS_FILE: &str = "interacciones.json";

/// Default `tracing` filter when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "qfpro_lib=info,warn"
}

/// Directory holding the catalog and rule reference documents.
/// `$QFPRO_DATA_DIR` when set, otherwise `<data dir>/QFPro/data`.
pub fn reference_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
        .join("data")
}

// ═══════════════════════════════════════════════════════════
// ImportConfig
// ═══════════════════════════════════════════════════════════

/// Knobs for the two hospital-export importers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImportConfig {
    /// Recipe duration when a Format-A block carries no duration phrase.
    pub format_a_default_months: u32,
    /// Recipe duration when a Format-B document has neither header nor line durations.
    pub format_b_default_months: u32,
    /// Base ingredients (lowercase) that must be dispensed strictly monthly.
    pub monthly_dispensing_ingredients: Vec<String>,
    /// Quantity injected when a monthly-dispensing line has no posology.
    pub monthly_default_quantity: String,
    /// Posology text injected alongside `monthly_default_quantity`.
    pub monthly_default_posology: String,
    /// Upper-cased facility keyword → canonical label (Format-B `Establecimiento`).
    pub facility_labels: BTreeMap<String, String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        let facility_labels = [
            ("HERNAN HENRIQUEZ", "HOSPITAL HERNÁN HENRÍQUEZ ARAVENA"),
            ("VILLARRICA", "HOSPITAL DE VILLARRICA"),
            ("PITRUFQUEN", "HOSPITAL DE PITRUFQUÉN"),
            ("NUEVA IMPERIAL", "HOSPITAL INTERCULTURAL NUEVA IMPERIAL"),
            ("LAUTARO", "HOSPITAL DE LAUTARO"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            format_a_default_months: 12,
            format_b_default_months: 12,
            monthly_dispensing_ingredients: vec!["ketoprofeno".into()],
            monthly_default_quantity: "5".into(),
            monthly_default_posology: "CADA 1 MES".into(),
            facility_labels,
        }
    }
}

impl ImportConfig {
    /// Parse a (possibly partial) JSON document; missing keys keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn requires_monthly_dispensing(&self, base_ingredient: &str) -> bool {
        let lower = base_ingredient.to_lowercase();
        self.monthly_dispensing_ingredients
            .iter()
            .any(|i| i.to_lowercase() == lower)
    }
}

// ═══════════════════════════════════════════════════════════
// StoreConfig
// ═══════════════════════════════════════════════════════════

/// Limits of the in-memory patient record store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Records older than this (by creation time) are evicted.
    pub ttl_hours: i64,
    /// Maximum number of simultaneously open records.
    pub max_records: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 72,
            max_records: 5,
        }
    }
}

impl StoreConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
