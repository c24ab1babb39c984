use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config;
use crate::models::enums::FindingKind;

use super::helpers::{ingredient_key, IngredientSet};
use super::types::ReferenceError;

// ---------------------------------------------------------------------------
// Class map
// ---------------------------------------------------------------------------

/// Drug class name → member ingredient names (`mapas_clases`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ClassMap(pub BTreeMap<String, Vec<String>>);

impl ClassMap {
    pub fn members(&self, class: &str) -> &[String] {
        self.0.get(class.trim()).map(Vec::as_slice).unwrap_or_default()
    }

    /// Keys of the class members present in `set`, in class-list order.
    pub fn present(&self, class: &str, set: &IngredientSet) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for key in self.members(class).iter().map(|m| ingredient_key(m)) {
            if set.keys.contains(&key) && !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    pub fn has_class(&self, class: &str, set: &IngredientSet) -> bool {
        self.members(class)
            .iter()
            .any(|m| set.keys.contains(&ingredient_key(m)))
    }
}

// ---------------------------------------------------------------------------
// Criteria (criterios.json)
// ---------------------------------------------------------------------------

/// Gate of a criterion row. Every present field must hold.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CriterionCondition {
    #[serde(rename = "edad_min")]
    pub min_age: Option<u32>,
    #[serde(rename = "egfr_max")]
    pub max_egfr: Option<f64>,
    #[serde(rename = "clases_meds_incluye")]
    pub required_classes: Vec<String>,
    #[serde(rename = "clases_meds_excluye")]
    pub excluded_classes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CriterionRule {
    pub id: Option<String>,
    #[serde(rename = "nombre")]
    pub name: Option<String>,
    #[serde(rename = "descripcion")]
    pub description: Option<String>,
    #[serde(rename = "recomendacion")]
    pub recommendation: Option<String>,
    /// No condition means the rule always fires.
    #[serde(rename = "condicion")]
    pub condition: Option<CriterionCondition>,
}

impl CriterionRule {
    pub fn title(&self) -> &str {
        self.name
            .as_deref()
            .or(self.description.as_deref())
            .filter(|t| !t.trim().is_empty())
            .unwrap_or("Criterio")
    }
}

/// The three criteria lists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum CriteriaList {
    Beers,
    Stopp,
    Start,
}

impl CriteriaList {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Beers => "BEERS",
            Self::Stopp => "STOPP",
            Self::Start => "START",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CriteriaSet {
    #[serde(rename = "mapas_clases")]
    pub class_map: ClassMap,
    pub beers: Vec<CriterionRule>,
    pub stopp: Vec<CriterionRule>,
    pub start: Vec<CriterionRule>,
}

impl CriteriaSet {
    /// All rows in list order: Beers, then STOPP, then START.
    pub fn rules(&self) -> impl Iterator<Item = (CriteriaList, &CriterionRule)> {
        self.beers
            .iter()
            .map(|r| (CriteriaList::Beers, r))
            .chain(self.stopp.iter().map(|r| (CriteriaList::Stopp, r)))
            .chain(self.start.iter().map(|r| (CriteriaList::Start, r)))
    }

    pub fn len(&self) -> usize {
        self.beers.len() + self.stopp.len() + self.start.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Interactions (interacciones.json)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PairRule {
    pub a: String,
    pub b: String,
    #[serde(rename = "descripcion")]
    pub description: Option<String>,
    #[serde(rename = "severidad")]
    pub severity: Option<String>,
    #[serde(rename = "recomendacion")]
    pub recommendation: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassPairRule {
    #[serde(rename = "claseA")]
    pub class_a: String,
    #[serde(rename = "claseB")]
    pub class_b: String,
    #[serde(rename = "descripcion")]
    pub description: Option<String>,
    #[serde(rename = "severidad")]
    pub severity: Option<String>,
    #[serde(rename = "recomendacion")]
    pub recommendation: Option<String>,
}

/// Fires when at least two of the listed classes are present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompoundRisk {
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "incluye_clases")]
    pub classes: Vec<String>,
    #[serde(rename = "descripcion")]
    pub description: Option<String>,
    /// Defaults to high when absent.
    #[serde(rename = "severidad")]
    pub severity: Option<String>,
    #[serde(rename = "recomendacion")]
    pub recommendation: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InteractionGroup {
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "ingredientes")]
    pub ingredients: Vec<String>,
}

/// An interaction between 2 or 3 named groups. Fires only when every
/// group has at least one of its ingredients present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InteractionRule {
    pub id: Option<String>,
    #[serde(rename = "descripcion")]
    pub description: Option<String>,
    #[serde(rename = "severidad")]
    pub severity: Option<String>,
    #[serde(rename = "recomendacion")]
    pub recommendation: Option<String>,
    #[serde(rename = "grupos")]
    pub groups: Vec<InteractionGroup>,
    pub triple: bool,
}

impl InteractionRule {
    pub const MIN_GROUPS: usize = 2;
    pub const MAX_GROUPS: usize = 3;

    pub fn is_well_formed(&self) -> bool {
        (Self::MIN_GROUPS..=Self::MAX_GROUPS).contains(&self.groups.len())
            && (!self.triple || self.groups.len() == 3)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InteractionSet {
    #[serde(rename = "mapas_clases")]
    pub class_map: ClassMap,
    #[serde(rename = "pares")]
    pub pairs: Vec<PairRule>,
    #[serde(rename = "clases")]
    pub class_pairs: Vec<ClassPairRule>,
    #[serde(rename = "riesgos_compuestos")]
    pub compound_risks: Vec<CompoundRisk>,
    #[serde(rename = "grupos")]
    pub group_rules: Vec<InteractionRule>,
}

impl InteractionSet {
    /// Pairs, class pairs and explicit group rules, all in group form.
    pub fn rules(&self) -> Vec<(FindingKind, InteractionRule)> {
        let pairs = self.pairs.iter().map(|p| {
            (
                FindingKind::Interaction,
                InteractionRule {
                    id: None,
                    description: p.description.clone(),
                    severity: p.severity.clone(),
                    recommendation: p.recommendation.clone(),
                    groups: vec![
                        InteractionGroup {
                            name: p.a.clone(),
                            ingredients: vec![p.a.clone()],
                        },
                        InteractionGroup {
                            name: p.b.clone(),
                            ingredients: vec![p.b.clone()],
                        },
                    ],
                    triple: false,
                },
            )
        });

        let classes = self.class_pairs.iter().map(|c| {
            let group = |class: &str| InteractionGroup {
                name: class.to_string(),
                ingredients: self.class_map.members(class).to_vec(),
            };
            (
                FindingKind::ClassInteraction,
                InteractionRule {
                    id: None,
                    description: c.description.clone(),
                    severity: c.severity.clone(),
                    recommendation: c.recommendation.clone(),
                    groups: vec![group(&c.class_a), group(&c.class_b)],
                    triple: false,
                },
            )
        });

        let explicit = self
            .group_rules
            .iter()
            .map(|r| (FindingKind::Interaction, r.clone()));

        pairs.chain(classes).chain(explicit).collect()
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, ReferenceError> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| ReferenceError::Load(path.display().to_string(), e.to_string()))?;
    serde_json::from_str(&json).map_err(|e| {
        ReferenceError::Parse(
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            e.to_string(),
        )
    })
}

pub fn load_criteria(path: &Path) -> Result<CriteriaSet, ReferenceError> {
    load_json(path)
}

pub fn load_interactions(path: &Path) -> Result<InteractionSet, ReferenceError> {
    load_json(path)
}

/// Rule reference data. Either document may be missing; the matching
/// evaluator then produces nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceData {
    pub criteria: Option<CriteriaSet>,
    pub interactions: Option<InteractionSet>,
}

impl ReferenceData {
    /// Load `criterios.json` and `interacciones.json` from a directory,
    /// tolerating either being unavailable.
    pub fn load(dir: &Path) -> Self {
        let criteria = match load_criteria(&dir.join(config::CRITERIA_FILE)) {
            Ok(set) => {
                tracing::info!(rules = set.len(), "Criteria reference loaded");
                Some(set)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Criteria reference unavailable");
                None
            }
        };
        let interactions = match load_interactions(&dir.join(config::INTERACTIONS_FILE)) {
            Ok(set) => {
                tracing::info!(
                    pairs = set.pairs.len(),
                    classes = set.class_pairs.len(),
                    compound = set.compound_risks.len(),
                    groups = set.group_rules.len(),
                    "Interaction reference loaded"
                );
                Some(set)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Interaction reference unavailable");
                None
            }
        };
        Self {
            criteria,
            interactions,
        }
    }

    /// Create reference data for tests (no file I/O).
    pub fn load_test() -> Self {
        fn names(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }
        fn class_map(entries: &[(&str, &[&str])]) -> ClassMap {
            ClassMap(
                entries
                    .iter()
                    .map(|(class, members)| (class.to_string(), names(members)))
                    .collect(),
            )
        }
        fn group(name: &str, ingredients: &[&str]) -> InteractionGroup {
            InteractionGroup {
                name: name.into(),
                ingredients: names(ingredients),
            }
        }

        let criteria = CriteriaSet {
            class_map: class_map(&[
                ("AINE", &["ibuprofeno", "ketoprofeno"]),
                ("IBP", &["omeprazol"]),
                ("BIGUANIDA", &["metformina"]),
            ]),
            beers: vec![CriterionRule {
                id: Some("B1".into()),
                name: Some("AINE sin gastroprotección".into()),
                condition: Some(CriterionCondition {
                    min_age: Some(65),
                    required_classes: names(&["AINE"]),
                    excluded_classes: names(&["IBP"]),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            stopp: vec![CriterionRule {
                id: Some("S1".into()),
                name: Some("Metformina con TFG menor a 30".into()),
                condition: Some(CriterionCondition {
                    max_egfr: Some(30.0),
                    required_classes: names(&["BIGUANIDA"]),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            start: vec![CriterionRule {
                id: Some("ST1".into()),
                name: Some("Revisar esquema de vacunación".into()),
                ..Default::default()
            }],
        };

        let interactions = InteractionSet {
            class_map: class_map(&[
                ("IECA", &["enalapril"]),
                ("ARA2", &["losartan"]),
                ("DIURETICO", &["espironolactona"]),
                ("AINE", &["ibuprofeno", "ketoprofeno"]),
            ]),
            pairs: vec![PairRule {
                a: "enalapril".into(),
                b: "espironolactona".into(),
                description: Some("Riesgo de hiperkalemia".into()),
                severity: Some("alta".into()),
                recommendation: None,
            }],
            class_pairs: vec![ClassPairRule {
                class_a: "IECA".into(),
                class_b: "AINE".into(),
                description: Some("AINE reduce el efecto antihipertensivo".into()),
                severity: Some("moderada".into()),
                recommendation: None,
            }],
            compound_risks: vec![CompoundRisk {
                name: "Triple whammy".into(),
                classes: names(&["IECA", "ARA2", "DIURETICO", "AINE"]),
                description: Some("Riesgo de falla renal aguda".into()),
                ..Default::default()
            }],
            group_rules: vec![InteractionRule {
                id: Some("G1".into()),
                description: Some("Riesgo de sangrado".into()),
                severity: Some("alta".into()),
                recommendation: None,
                groups: vec![
                    group("AINE", &["ibuprofeno", "ketoprofeno"]),
                    group("Antiagregante", &["acido acetilsalicilico"]),
                    group("Anticoagulante", &["warfarina"]),
                ],
                triple: true,
            }],
        };

        Self {
            criteria: Some(criteria),
            interactions: Some(interactions),
        }
    }
}
