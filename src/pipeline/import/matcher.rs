//! Candidate Matcher: resolves a parsed drug name to one catalog entry.
//!
//! The pool is narrowed in three preference steps (token overlap, dosage
//! form hint, strength) where a step that would empty the pool is skipped.
//! An exact display-name hit wins outright; otherwise candidates are scored
//! and the highest score wins, ties going to the earliest catalog entry.

use crate::models::enums::DosageForm;
use crate::models::CatalogEntry;

use super::normalize::{
    normalize_name, presentation_has_strength, strip_accents, tokenize, DoseUnit, StrengthToken,
};

const SCORE_FORM: u32 = 10;
const SCORE_TOKEN_IN_NAME: u32 = 2;
const SCORE_TOKEN_IN_PRESENTATION: u32 = 1;
const SCORE_STRENGTH: u32 = 5;
const SCORE_UNIT: u32 = 1;

/// Facts parsed from the line that help pick a formulation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchDetail {
    pub strengths: Vec<StrengthToken>,
    /// Unit detected in the posology (`1 COMPRIMIDO ...`).
    pub unit: Option<DoseUnit>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate<'a> {
    pub entry: &'a CatalogEntry,
    pub score: u32,
}

/// Guess the dosage form from keywords in a drug name.
pub fn detect_form_hint(name: &str) -> Option<DosageForm> {
    let text = strip_accents(&name.to_uppercase());
    let has_token = |t: &str| text.split(' ').any(|w| w == t);

    if text.contains("INHAL") || text.contains("AEROSOL") {
        Some(DosageForm::Inhaler)
    } else if text.contains("INSULINA") {
        Some(DosageForm::Insulin)
    } else if text.contains("SUSP") || text.contains("JARABE") {
        Some(DosageForm::Suspension)
    } else if text.contains("CAPSULA") || has_token("CAPS") {
        Some(DosageForm::Capsule)
    } else if text.contains("COMPRIMIDO")
        || text.contains("TABLETA")
        || has_token("COMP")
        || has_token("CP")
    {
        Some(DosageForm::Tablet)
    } else {
        None
    }
}

/// Every token of `source` appears somewhere in `haystack`.
fn all_tokens_present(source: &str, haystack: &str) -> bool {
    let tokens: Vec<String> = tokenize(source).iter().map(|t| strip_accents(t)).collect();
    !tokens.is_empty() && tokens.iter().all(|t| haystack.contains(t.as_str()))
}

fn prefer<'a, F>(pool: Vec<&'a CatalogEntry>, keep: F) -> Vec<&'a CatalogEntry>
where
    F: Fn(&CatalogEntry) -> bool,
{
    let subset: Vec<&CatalogEntry> = pool.iter().copied().filter(|e| keep(e)).collect();
    if subset.is_empty() {
        pool
    } else {
        subset
    }
}

/// Narrow `candidates` to the pool the scorer works on (steps 1-4).
fn narrow<'a>(
    candidates: &'a [CatalogEntry],
    name: &str,
    form_hint: Option<DosageForm>,
    detail: &MatchDetail,
) -> Vec<&'a CatalogEntry> {
    let haystack = strip_accents(name);

    let mut pool: Vec<&CatalogEntry> = candidates
        .iter()
        .filter(|e| {
            all_tokens_present(&e.base_ingredient, &haystack)
                || all_tokens_present(&e.display_name, &haystack)
        })
        .collect();

    if let Some(hint) = form_hint {
        pool = prefer(pool, |e| e.dosage_form == hint);
    }

    if !detail.strengths.is_empty() {
        pool = prefer(pool, |e| {
            detail
                .strengths
                .iter()
                .any(|s| presentation_has_strength(&e.presentation, s))
        });
    }

    pool
}

fn score(
    entry: &CatalogEntry,
    tokens: &[String],
    form_hint: Option<DosageForm>,
    detail: &MatchDetail,
) -> u32 {
    let mut total = 0;
    if form_hint == Some(entry.dosage_form) {
        total += SCORE_FORM;
    }

    let display = strip_accents(&entry.display_name);
    let presentation = strip_accents(&entry.presentation);
    for token in tokens.iter().filter(|t| t.chars().count() >= 3) {
        let token = strip_accents(token);
        if display.contains(&token) {
            total += SCORE_TOKEN_IN_NAME;
        }
        if presentation.contains(&token) {
            total += SCORE_TOKEN_IN_PRESENTATION;
        }
    }

    total += SCORE_STRENGTH
        * detail
            .strengths
            .iter()
            .filter(|s| presentation_has_strength(&entry.presentation, s))
            .count() as u32;

    if let Some(unit) = detail.unit {
        if presentation.contains(unit.presentation_token()) {
            total += SCORE_UNIT;
        }
    }

    total
}

/// Score every candidate left after narrowing, in catalog order.
pub fn rank_candidates<'a>(
    candidates: &'a [CatalogEntry],
    normalized_name: &str,
    detail: &MatchDetail,
) -> Vec<ScoredCandidate<'a>> {
    let name = normalize_name(normalized_name);
    let tokens = tokenize(&name);
    let form_hint = detect_form_hint(&name);

    narrow(candidates, &name, form_hint, detail)
        .into_iter()
        .map(|entry| ScoredCandidate {
            entry,
            score: score(entry, &tokens, form_hint, detail),
        })
        .collect()
}

/// Best catalog entry for a drug name, or `None` when nothing qualifies.
pub fn match_candidate<'a>(
    candidates: &'a [CatalogEntry],
    normalized_name: &str,
    detail: &MatchDetail,
) -> Option<&'a CatalogEntry> {
    let name = normalize_name(normalized_name);
    let tokens = tokenize(&name);
    let form_hint = detect_form_hint(&name);

    let pool = narrow(candidates, &name, form_hint, detail);

    if let Some(exact) = pool
        .iter()
        .find(|e| normalize_name(&e.display_name) == name)
    {
        return Some(exact);
    }

    let mut best: Option<(&CatalogEntry, u32)> = None;
    for entry in pool {
        let s = score(entry, &tokens, form_hint, detail);
        match best {
            Some((_, top)) if s <= top => {}
            _ => best = Some((entry, s)),
        }
    }
    best.map(|(entry, _)| entry)
}
