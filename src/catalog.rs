//! Catalog Index: read-only drug catalog built once per session.
//!
//! Loads the raw drug records exported as `medicamentos.json`, projects
//! each into a [`CatalogEntry`] and keeps lookups by SKU id and by base
//! ingredient. Catalog order is preserved because the matcher's tie-break
//! depends on it.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

use crate::models::catalog::{RawActive, RawPrograms, RawRenalAdjustment};
use crate::models::{CatalogEntry, CatalogRecord};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog load failed ({0}): {1}")]
    Load(String, String),

    #[error("Catalog parse failed ({0}): {1}")]
    Parse(String, String),
}

#[derive(Debug, Clone, Default)]
pub struct CatalogIndex {
    entries: Vec<CatalogEntry>,
    by_id: HashMap<String, usize>,
    by_base: HashMap<String, Vec<usize>>,
}

impl CatalogIndex {
    pub fn from_records(records: &[CatalogRecord]) -> Self {
        Self::from_entries(records.iter().map(CatalogEntry::from_record).collect())
    }

    pub fn from_entries(entries: Vec<CatalogEntry>) -> Self {
        let mut by_id = HashMap::new();
        let mut by_base: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, entry) in entries.iter().enumerate() {
            by_id.entry(entry.id.clone()).or_insert(idx);
            by_base
                .entry(entry.base_ingredient.clone())
                .or_default()
                .push(idx);
        }
        Self {
            entries,
            by_id,
            by_base,
        }
    }

    /// Parse a catalog document. The top level must be an array of records.
    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let records: Vec<CatalogRecord> = serde_json::from_str(json)
            .map_err(|e| CatalogError::Parse("catalog".into(), e.to_string()))?;
        Ok(Self::from_records(&records))
    }

    /// Load the catalog from a JSON file.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Load(path.display().to_string(), e.to_string()))?;
        let records: Vec<CatalogRecord> = serde_json::from_str(&json)
            .map_err(|e| CatalogError::Parse(path.display().to_string(), e.to_string()))?;
        let index = Self::from_records(&records);
        tracing::info!(skus = index.len(), path = %path.display(), "Catalog loaded");
        Ok(index)
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, sku_id: &str) -> Option<&CatalogEntry> {
        self.by_id.get(sku_id).map(|&i| &self.entries[i])
    }

    /// All SKUs of one base ingredient (case-insensitive).
    pub fn by_base(&self, base_ingredient: &str) -> Vec<&CatalogEntry> {
        self.by_base
            .get(&base_ingredient.trim().to_lowercase())
            .map(|idxs| idxs.iter().map(|&i| &self.entries[i]).collect())
            .unwrap_or_default()
    }

    pub fn contains_base(&self, base_ingredient: &str) -> bool {
        self.by_base
            .contains_key(&base_ingredient.trim().to_lowercase())
    }

    /// Display-name substring search, optionally limited to primary-care SKUs.
    pub fn search(&self, query: &str, primary_care_only: bool, limit: usize) -> Vec<&CatalogEntry> {
        let needle = query.trim().to_uppercase();
        if needle.chars().count() < 2 {
            return Vec::new();
        }
        self.entries
            .iter()
            .filter(|e| !primary_care_only || e.programs.primary_care)
            .filter(|e| e.display_name.contains(&needle))
            .take(limit)
            .collect()
    }

    /// Small fixed catalog for tests (no file I/O).
    pub fn load_test() -> Self {
        fn record(id: &str, base: &str, strength: &str, form: &str) -> CatalogRecord {
            CatalogRecord {
                id: id.into(),
                base_name: base.into(),
                strength: strength.into(),
                form: form.into(),
                programs: RawPrograms {
                    aps: true,
                    ..Default::default()
                },
                ..Default::default()
            }
        }
        fn ppi(mut r: CatalogRecord) -> CatalogRecord {
            r.flags.ppi = true;
            r
        }
        fn chronic(mut r: CatalogRecord) -> CatalogRecord {
            r.programs.cronico = true;
            r
        }

        let mut ketoprofen = ppi(record("KTP100", "ketoprofeno", "100mg", "capsula"));
        ketoprofen.programs = RawPrograms {
            secundario: true,
            ..Default::default()
        };
        let mut metformin = chronic(record("MET850", "metformina", "850mg", "comprimido"));
        metformin.flags.ajuste_renal = Some(RawRenalAdjustment {
            requerido: true,
            detalle: Some("Suspender si TFG < 30".into()),
        });
        let mut spironolactone = record("ESP25", "espironolactona", "25mg", "comprimido");
        spironolactone.flags.contraindicado_renal = Some(RawActive { activo: true });

        Self::from_records(&[
            record("PCT500", "paracetamol", "500mg", "comprimido"),
            record("PCT100S", "paracetamol", "120mg/5ml", "suspension"),
            ppi(record("IBU400", "ibuprofeno", "400mg", "comprimido")),
            ppi(record("IBU600", "ibuprofeno", "600mg", "comprimido")),
            ketoprofen,
            chronic(record("ENA10", "enalapril", "10mg", "comprimido")),
            chronic(record("LOS50", "losartan", "50mg", "comprimido")),
            metformin,
            spironolactone,
            record("LVT0025", "levotiroxina", "0,025mg", "comprimido"),
            record("SAL100", "salbutamol", "100mcg", "aerosol para inhalacion"),
            record("NPH100", "insulina nph", "100ui/ml", "insulina"),
            record("OMP20", "omeprazol", "20mg", "capsula"),
            record("ASA100", "acido acetilsalicilico", "100mg", "comprimido"),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_by_id_and_base() {
        let catalog = CatalogIndex::load_test();
        assert_eq!(catalog.get("IBU400").unwrap().base_ingredient, "ibuprofeno");
        assert_eq!(catalog.by_base("IBUPROFENO").len(), 2);
        assert!(catalog.contains_base("Metformina"));
        assert!(!catalog.contains_base("warfarina"));
        assert!(catalog.get("NOPE").is_none());
    }

    #[test]
    fn catalog_order_is_preserved() {
        let catalog = CatalogIndex::load_test();
        let ids: Vec<&str> = catalog.by_base("paracetamol").iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["PCT500", "PCT100S"]);
    }

    #[test]
    fn search_filters_primary_care() {
        let catalog = CatalogIndex::load_test();
        assert_eq!(catalog.search("keto", false, 60).len(), 1);
        assert!(catalog.search("keto", true, 60).is_empty());
        assert!(catalog.search("k", false, 60).is_empty());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medicamentos.json");
        std::fs::write(
            &path,
            r#"[{"id": "A1", "base_name": "amoxicilina", "fuerza": "500mg", "forma": "capsula"}]"#,
        )
        .unwrap();
        let catalog = CatalogIndex::load(&path).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.entries()[0].display_name, "AMOXICILINA 500MG CAPSULA");
    }

    #[test]
    fn load_rejects_non_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medicamentos.json");
        std::fs::write(&path, r#"{"id": "A1"}"#).unwrap();
        assert!(matches!(CatalogIndex::load(&path), Err(CatalogError::Parse(_, _))));
    }

    #[test]
    fn json_flags_match_fixture_projection() {
        let parsed = CatalogIndex::from_json_str(
            r#"[{"id": "MET850", "base_name": "metformina", "fuerza": "850mg", "forma": "comprimido",
                 "programas": {"aps": true, "cronico": true},
                 "flags": {"ajuste_renal": {"requerido": true, "detalle": "Suspender si TFG < 30"}}},
                {"id": "KTP100", "base_name": "ketoprofeno", "fuerza": "100mg", "forma": "capsula",
                 "programas": {"secundario": true}, "flags": {"ppi": true}}]"#,
        )
        .unwrap();
        let fixture = CatalogIndex::load_test();
        for id in ["MET850", "KTP100"] {
            assert_eq!(parsed.get(id), fixture.get(id));
        }
        assert!(CatalogIndex::from_json_str("{}").is_err());
    }

    #[test]
    fn load_missing_file() {
        let result = CatalogIndex::load(Path::new("/nonexistent/medicamentos.json"));
        assert!(matches!(result, Err(CatalogError::Load(_, _))));
    }
}
