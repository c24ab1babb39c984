use std::collections::{BTreeMap, BTreeSet};

use crate::models::enums::FindingKind;

use super::helpers::{ingredient_key, IngredientSet};
use super::messages::MessageTemplates;
use super::reference::{CriteriaSet, CriterionCondition, InteractionRule, InteractionSet};
use super::types::*;

// ---------------------------------------------------------------------------
// [1] CRITERIA evaluation
// ---------------------------------------------------------------------------

/// Evaluate every Beers/STOPP/START row against the patient.
/// Absent reference data yields no findings.
pub fn evaluate_criteria(
    profile: &PatientProfile,
    ingredients: &IngredientSet,
    criteria: Option<&CriteriaSet>,
) -> Vec<Finding> {
    let Some(criteria) = criteria else {
        return Vec::new();
    };

    let mut findings = Vec::new();
    for (list, rule) in criteria.rules() {
        let holds = match &rule.condition {
            None => true,
            Some(condition) => condition_holds(condition, profile, ingredients, criteria),
        };
        if !holds {
            continue;
        }

        let mut finding = Finding::new(
            FindingKind::Criterion,
            rule.title(),
            MessageTemplates::criterion(list, rule),
        );
        finding.recommendation = rule.recommendation.clone();
        if let Some(condition) = &rule.condition {
            finding.ingredients = condition
                .required_classes
                .iter()
                .flat_map(|class| criteria.class_map.present(class, ingredients))
                .map(|key| ingredients.display_name(&key))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
        }
        findings.push(finding);
    }

    sort_findings(&mut findings);
    findings
}

/// Conjunction of every present field. The eGFR bound is only checked when
/// the profile carries an eGFR value.
fn condition_holds(
    condition: &CriterionCondition,
    profile: &PatientProfile,
    ingredients: &IngredientSet,
    criteria: &CriteriaSet,
) -> bool {
    if let Some(min_age) = condition.min_age {
        if !profile.age.is_some_and(|age| age >= min_age) {
            return false;
        }
    }
    if let (Some(max_egfr), Some(egfr)) = (condition.max_egfr, profile.egfr) {
        if egfr > max_egfr {
            return false;
        }
    }
    let map = &criteria.class_map;
    condition
        .required_classes
        .iter()
        .all(|class| map.has_class(class, ingredients))
        && !condition
            .excluded_classes
            .iter()
            .any(|class| map.has_class(class, ingredients))
}

// ---------------------------------------------------------------------------
// [2] INTERACTION evaluation
// ---------------------------------------------------------------------------

/// Evaluate pairs, class pairs, explicit group rules and compound risks.
pub fn evaluate_interactions(
    ingredients: &IngredientSet,
    interactions: Option<&InteractionSet>,
) -> Vec<Finding> {
    let Some(interactions) = interactions else {
        return Vec::new();
    };

    let mut findings: Vec<Finding> = interactions
        .rules()
        .iter()
        .filter_map(|(kind, rule)| evaluate_group_rule(*kind, rule, ingredients))
        .collect();

    for risk in &interactions.compound_risks {
        let present: Vec<String> = risk
            .classes
            .iter()
            .filter(|class| interactions.class_map.has_class(class, ingredients))
            .cloned()
            .collect();
        if present.len() < 2 {
            continue;
        }

        let mut finding = Finding::new(
            FindingKind::CompoundRisk,
            risk.name.trim(),
            MessageTemplates::compound(&risk.name, &present, risk.description.as_deref()),
        );
        finding.severity = Some(
            risk.severity
                .as_deref()
                .and_then(Severity::from_text)
                .unwrap_or(Severity::High),
        );
        finding.recommendation = risk.recommendation.clone();
        finding.groups = present
            .iter()
            .map(|class| GroupMatch {
                group: class.clone(),
                ingredients: interactions
                    .class_map
                    .present(class, ingredients)
                    .iter()
                    .map(|key| ingredients.display_name(key))
                    .collect(),
            })
            .collect();
        finding.ingredients = collect_ingredients(&finding.groups);
        findings.push(finding);
    }

    sort_findings(&mut findings);
    findings
}

/// A rule fires only when every group has at least one present ingredient.
fn evaluate_group_rule(
    kind: FindingKind,
    rule: &InteractionRule,
    ingredients: &IngredientSet,
) -> Option<Finding> {
    if !rule.is_well_formed() {
        tracing::debug!(
            id = rule.id.as_deref().unwrap_or("-"),
            groups = rule.groups.len(),
            "Skipping malformed interaction rule"
        );
        return None;
    }

    let mut matches = Vec::with_capacity(rule.groups.len());
    for group in &rule.groups {
        let mut keys: Vec<String> = Vec::new();
        for key in group.ingredients.iter().map(|i| ingredient_key(i)) {
            if ingredients.keys.contains(&key) && !keys.contains(&key) {
                keys.push(key);
            }
        }
        if keys.is_empty() {
            return None;
        }
        matches.push(GroupMatch {
            group: group.name.trim().to_string(),
            ingredients: keys.iter().map(|k| ingredients.display_name(k)).collect(),
        });
    }

    let title = rule
        .groups
        .iter()
        .map(|g| g.name.trim())
        .collect::<Vec<_>>()
        .join(" + ");
    let mut finding = Finding::new(
        kind,
        &title,
        MessageTemplates::interaction(&matches, rule.description.as_deref()),
    );
    finding.severity = rule.severity.as_deref().and_then(Severity::from_text);
    finding.recommendation = rule.recommendation.clone();
    finding.ingredients = collect_ingredients(&matches);
    finding.groups = matches;
    Some(finding)
}

fn collect_ingredients(groups: &[GroupMatch]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in groups.iter().flat_map(|g| g.ingredients.iter()) {
        if !out.contains(name) {
            out.push(name.clone());
        }
    }
    out
}

// ---------------------------------------------------------------------------
// [3] PPI alert
// ---------------------------------------------------------------------------

/// One alert per gastro-risk ingredient for an age-eligible patient.
pub fn ppi_alerts(profile: &PatientProfile, meds: &[AggregatedMedication]) -> Vec<Finding> {
    if !profile.age_eligible {
        return Vec::new();
    }

    let mut by_key: BTreeMap<String, String> = BTreeMap::new();
    for med in meds.iter().filter(|m| m.entry.clinical_flags.ppi_risk) {
        let name = med.ingredient();
        by_key.entry(ingredient_key(&name)).or_insert(name);
    }

    let mut findings: Vec<Finding> = by_key
        .into_values()
        .map(|name| {
            let mut finding = Finding::new(
                FindingKind::PpiAlert,
                MessageTemplates::prm_type(FindingKind::PpiAlert),
                MessageTemplates::ppi(&name),
            );
            finding.severity = Some(Severity::Moderate);
            finding.ingredients = vec![name];
            finding
        })
        .collect();
    sort_findings(&mut findings);
    findings
}

// ---------------------------------------------------------------------------
// [4] RENAL alert
// ---------------------------------------------------------------------------

struct RenalFlag {
    name: String,
    detail: Option<String>,
    contraindicated: bool,
}

/// One alert per renally-flagged ingredient for a patient with CKD.
/// Contraindication on any entry of an ingredient wins over adjustment.
pub fn renal_alerts(profile: &PatientProfile, meds: &[AggregatedMedication]) -> Vec<Finding> {
    if !profile.chronic_kidney_disease {
        return Vec::new();
    }

    let mut by_key: BTreeMap<String, RenalFlag> = BTreeMap::new();
    for med in meds {
        let flags = &med.entry.clinical_flags;
        if !flags.renal_adjustment_required && !flags.renal_contraindicated {
            continue;
        }
        let name = med.ingredient();
        let slot = by_key.entry(ingredient_key(&name)).or_insert(RenalFlag {
            name,
            detail: None,
            contraindicated: false,
        });
        slot.contraindicated |= flags.renal_contraindicated;
        if slot.detail.is_none() {
            slot.detail = flags.renal_adjustment_detail.clone();
        }
    }

    let mut findings: Vec<Finding> = by_key
        .into_values()
        .map(|flag| {
            let mut finding = Finding::new(
                FindingKind::RenalAdjustment,
                MessageTemplates::prm_type(FindingKind::RenalAdjustment),
                MessageTemplates::renal(&flag.name, flag.detail.as_deref(), flag.contraindicated),
            );
            finding.severity = Some(if flag.contraindicated {
                Severity::High
            } else {
                Severity::Moderate
            });
            finding.recommendation = flag.detail;
            finding.ingredients = vec![flag.name];
            finding
        })
        .collect();
    sort_findings(&mut findings);
    findings
}

// ---------------------------------------------------------------------------
// [5] DUPLICATE therapy
// ---------------------------------------------------------------------------

/// One finding per duplicate group, naming each source container.
pub fn duplicate_findings(groups: &[DuplicateGroup]) -> Vec<Finding> {
    let mut findings: Vec<Finding> = groups
        .iter()
        .map(|group| {
            let mut seen = BTreeSet::new();
            let origins: Vec<&str> = group
                .members
                .iter()
                .filter(|m| seen.insert(m.source_key.as_str()))
                .map(|m| MessageTemplates::origin_label(m.source))
                .collect();
            let mut finding = Finding::new(
                FindingKind::DuplicateTherapy,
                MessageTemplates::prm_type(FindingKind::DuplicateTherapy),
                MessageTemplates::duplicate(&group.base_ingredient, &origins),
            );
            finding.severity = Some(Severity::Moderate);
            finding.ingredients = vec![group.base_ingredient.clone()];
            finding
        })
        .collect();
    sort_findings(&mut findings);
    findings
}
