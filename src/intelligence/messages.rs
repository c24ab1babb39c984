use crate::models::enums::{FindingKind, SourceKind};

use super::reference::{CriteriaList, CriterionRule};
use super::types::GroupMatch;

/// Message template builder for finding and PRM texts.
/// Plain clinical Spanish, one line per finding.
pub struct MessageTemplates;

impl MessageTemplates {
    /// PRM type label for a finding kind.
    pub fn prm_type(kind: FindingKind) -> &'static str {
        match kind {
            FindingKind::Criterion => "Criterio de prescripción",
            FindingKind::Interaction | FindingKind::ClassInteraction => "Interacción",
            FindingKind::CompoundRisk => "Riesgo compuesto",
            FindingKind::PpiAlert => "Gastroprotección",
            FindingKind::RenalAdjustment => "Ajuste renal",
            FindingKind::DuplicateTherapy => "Duplicidad terapéutica",
        }
    }

    /// Human label of a medication source.
    pub fn origin_label(source: SourceKind) -> &'static str {
        match source {
            SourceKind::PrimaryCare => "APS",
            SourceKind::SecondaryCare => "Nivel secundario",
            SourceKind::OutOfSystem => "Fuera de sistema",
            SourceKind::SelfMedicated => "Automedicación",
        }
    }

    /// CRITERION: `[STOPP] Metformina con TFG menor a 30`.
    pub fn criterion(list: CriteriaList, rule: &CriterionRule) -> String {
        format!("[{}] {}", list.label(), rule.title())
    }

    /// INTERACTION: `IBUPROFENO / KETOPROFENO + ENALAPRIL: descripción`.
    pub fn interaction(matches: &[GroupMatch], description: Option<&str>) -> String {
        let names = matches
            .iter()
            .map(|g| g.ingredients.join(" / "))
            .collect::<Vec<_>>()
            .join(" + ");
        match description.filter(|d| !d.trim().is_empty()) {
            Some(d) => format!("{}: {}", names, d.trim()),
            None => names,
        }
    }

    /// COMPOUND risk over several classes.
    pub fn compound(name: &str, classes: &[String], description: Option<&str>) -> String {
        let mut text = format!("{} ({})", name.trim(), classes.join(" + "));
        if let Some(d) = description.filter(|d| !d.trim().is_empty()) {
            text.push_str(": ");
            text.push_str(d.trim());
        }
        text
    }

    /// PPI: drug with gastrointestinal risk in an older patient.
    pub fn ppi(ingredient: &str) -> String {
        format!(
            "{}: riesgo gastrointestinal en paciente de 65 años o más, evaluar gastroprotección con IBP",
            ingredient,
        )
    }

    /// RENAL: adjustment or contraindication in chronic kidney disease.
    pub fn renal(ingredient: &str, detail: Option<&str>, contraindicated: bool) -> String {
        match (contraindicated, detail.filter(|d| !d.trim().is_empty())) {
            (true, _) => format!("{}: contraindicado en enfermedad renal crónica", ingredient),
            (false, Some(d)) => format!("{}: requiere ajuste renal ({})", ingredient, d.trim()),
            (false, None) => format!("{}: requiere ajuste renal", ingredient),
        }
    }

    /// DUPLICATE therapy across sources.
    pub fn duplicate(ingredient: &str, origins: &[&str]) -> String {
        format!(
            "{}: duplicidad terapéutica entre {}",
            ingredient,
            origins.join(", "),
        )
    }
}
