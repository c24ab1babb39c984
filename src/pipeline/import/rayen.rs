//! Hospital-Export-A ("Rayen") parser.
//!
//! ```text
//! 12-03-2024
//! (1) LOSARTAN 50 MG: 1 COMPRIMIDO CADA 12 HORAS POR 3 MESES
//! (2) KETOPROFENO 100 MG: 1 CAPSULA CADA 8 HORAS
//! ```
//!
//! An optional leading `dd-mm-yyyy` line sets the issue date. Every other
//! line of the form `(<seq>) <name>: <posology>` is one medication.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::models::enums::ErrorStage;
use crate::models::{CatalogEntry, MedicationError, Recipe};

use super::importer::{build_entry, recipe_duration_months, resolve_sku, ImportContext, ParsedRecipe};
use super::normalize::{
    mentions_hourly_frequency, mentions_monthly_frequency, normalize_name, parse_posology,
    ParsedPosology,
};

static RE_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{2})-(\d{2})-(\d{4})").unwrap());

static RE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\(\d+\)\s*(.+?):\s*(.*)$").unwrap());

/// `dd-mm-yyyy` anywhere in the line.
fn find_date(line: &str) -> Option<NaiveDate> {
    let caps = RE_DATE.captures(line)?;
    let day = caps.get(1)?.as_str().parse().ok()?;
    let month = caps.get(2)?.as_str().parse().ok()?;
    let year = caps.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Split a block into `(name, posology)` pairs, plus the issue date if present.
pub fn split_lines(raw: &str) -> (Option<NaiveDate>, Vec<(String, String)>) {
    let lines: Vec<&str> = raw.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    let mut issue_date = None;
    let mut body = lines.as_slice();
    if let Some(first) = lines.first() {
        if RE_DATE.is_match(first) && !RE_LINE.is_match(first) {
            issue_date = find_date(first);
            body = &lines[1..];
        }
    }

    let pairs = body
        .iter()
        .filter_map(|line| {
            let caps = RE_LINE.captures(line)?;
            Some((
                caps.get(1)?.as_str().trim().to_string(),
                caps.get(2).map_or("", |m| m.as_str()).trim().to_string(),
            ))
        })
        .collect();

    (issue_date, pairs)
}

/// Monthly-dispensing ingredients: flag hourly posologies and fill in an
/// empty one with the canonical monthly default.
fn apply_monthly_rule(
    ctx: &ImportContext<'_>,
    sku: &CatalogEntry,
    raw_posology: &str,
    parsed: &mut ParsedPosology,
    errors: &mut Vec<MedicationError>,
) {
    if !ctx.config.requires_monthly_dispensing(&sku.base_ingredient) {
        return;
    }

    if mentions_hourly_frequency(raw_posology) && !mentions_monthly_frequency(raw_posology) {
        tracing::info!(sku = %sku.id, "Monthly-dispensing drug prescribed with hourly frequency");
        errors.push(MedicationError {
            stage: ErrorStage::Prescription,
            description: format!(
                "{}: dispensación mensual, la posología indica frecuencia horaria ({})",
                sku.display_name,
                raw_posology.trim().to_uppercase()
            ),
            date: ctx.now,
        });
    }

    if parsed.is_empty() {
        parsed.quantity = Some(ctx.config.monthly_default_quantity.clone());
        parsed.posology_text = ctx.config.monthly_default_posology.to_uppercase();
    }
}

/// Parse a Format-A block into a primary-care recipe.
pub fn parse(raw: &str, ctx: &ImportContext<'_>) -> ParsedRecipe {
    let (issue_date, pairs) = split_lines(raw);

    let mut entries = Vec::new();
    let mut skipped_lines = Vec::new();
    let mut errors = Vec::new();

    for (name, posology) in &pairs {
        let mut parsed = parse_posology(posology);
        let Some(sku) = resolve_sku(ctx, name, parsed.unit) else {
            skipped_lines.push(normalize_name(name));
            continue;
        };
        apply_monthly_rule(ctx, sku, posology, &mut parsed, &mut errors);
        entries.push(build_entry(sku, &parsed));
    }

    let months = recipe_duration_months(&entries, None, ctx.config.format_a_default_months);
    let mut recipe = Recipe::new(issue_date.unwrap_or(ctx.today), months);
    recipe.entries = entries;

    tracing::debug!(
        lines = pairs.len(),
        matched = recipe.entries.len(),
        months,
        "Format-A block parsed"
    );

    ParsedRecipe {
        recipe,
        skipped_lines,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogIndex;
    use crate::config::ImportConfig;
    use crate::models::Dosage;

    fn ctx<'a>(catalog: &'a CatalogIndex, config: &'a ImportConfig) -> ImportContext<'a> {
        let today = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        ImportContext {
            catalog,
            config,
            today,
            now: today.and_hms_opt(10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn paracetamol_line_is_fully_parsed() {
        let catalog = CatalogIndex::load_test();
        let config = ImportConfig::default();
        let parsed = parse(
            "(1) PARACETAMOL 500 MG: 1 COMPRIMIDO CADA 8 HORAS POR 5 DIAS",
            &ctx(&catalog, &config),
        );

        assert_eq!(parsed.recipe.entries.len(), 1);
        let entry = &parsed.recipe.entries[0];
        assert_eq!(entry.sku_ref.as_deref(), Some("PCT500"));
        assert_eq!(
            entry.dosage,
            Dosage::Units {
                quantity: "1".into(),
                unit: "COMPRIMIDO(S)".into()
            }
        );
        assert_eq!(entry.posology_text, "CADA 8 HORAS");
        let months = entry.duration_months.unwrap();
        assert!((months - 0.167).abs() < 0.001);
        assert_eq!(parsed.recipe.duration_months, 1);
    }

    #[test]
    fn leading_date_sets_issue_date() {
        let catalog = CatalogIndex::load_test();
        let config = ImportConfig::default();
        let parsed = parse(
            "12-03-2024\n(1) LOSARTAN 50 MG: 1 COMPRIMIDO AL DIA",
            &ctx(&catalog, &config),
        );
        assert_eq!(
            parsed.recipe.issue_date,
            NaiveDate::from_ymd_opt(2024, 3, 12).unwrap()
        );
        assert_eq!(parsed.recipe.duration_months, 12);
    }

    #[test]
    fn missing_date_uses_today() {
        let catalog = CatalogIndex::load_test();
        let config = ImportConfig::default();
        let parsed = parse("(1) LOSARTAN 50 MG: 1 COMPRIMIDO AL DIA", &ctx(&catalog, &config));
        assert_eq!(parsed.recipe.issue_date, NaiveDate::from_ymd_opt(2024, 5, 10).unwrap());
    }

    #[test]
    fn duration_phrases_round_at_recipe_level() {
        let catalog = CatalogIndex::load_test();
        let config = ImportConfig::default();
        let three = parse(
            "(1) ENALAPRIL 10 MG: 1 COMPRIMIDO CADA 12 HORAS 3 MESES",
            &ctx(&catalog, &config),
        );
        assert_eq!(three.recipe.duration_months, 3);

        let two_weeks = parse(
            "(1) ENALAPRIL 10 MG: 1 COMPRIMIDO CADA 12 HORAS POR 2 SEMANAS",
            &ctx(&catalog, &config),
        );
        assert_eq!(two_weeks.recipe.duration_months, 1);
    }

    #[test]
    fn unmatched_and_malformed_lines_are_dropped() {
        let catalog = CatalogIndex::load_test();
        let config = ImportConfig::default();
        let raw = "Receta electrónica\n\
                   (1) WARFARINA 5 MG: 1 COMPRIMIDO\n\
                   (2) ENALAPRIL 10 MG: 1 COMPRIMIDO CADA 12 HORAS\n\
                   texto suelto sin formato";
        let parsed = parse(raw, &ctx(&catalog, &config));
        assert_eq!(parsed.recipe.entries.len(), 1);
        assert_eq!(parsed.skipped_lines, vec!["WARFARINA 5 MG".to_string()]);
    }

    #[test]
    fn hourly_ketoprofen_raises_prescription_error() {
        let catalog = CatalogIndex::load_test();
        let config = ImportConfig::default();
        let parsed = parse(
            "(1) KETOPROFENO 100 MG: 1 CAPSULA CADA 8 HORAS",
            &ctx(&catalog, &config),
        );
        assert_eq!(parsed.recipe.entries.len(), 1);
        assert_eq!(parsed.errors.len(), 1);
        assert_eq!(parsed.errors[0].stage, ErrorStage::Prescription);
        assert!(parsed.errors[0].description.contains("CADA 8 HORAS"));
    }

    #[test]
    fn monthly_ketoprofen_is_accepted() {
        let catalog = CatalogIndex::load_test();
        let config = ImportConfig::default();
        let parsed = parse(
            "(1) KETOPROFENO 100 MG: 5 CAPSULAS CADA 1 MES",
            &ctx(&catalog, &config),
        );
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.recipe.entries[0].posology_text, "CADA 1 MES");
    }

    #[test]
    fn empty_ketoprofen_posology_gets_monthly_default() {
        let catalog = CatalogIndex::load_test();
        let config = ImportConfig::default();
        let parsed = parse("(1) KETOPROFENO 100 MG:", &ctx(&catalog, &config));
        assert!(parsed.errors.is_empty());
        let entry = &parsed.recipe.entries[0];
        assert_eq!(entry.posology_text, "CADA 1 MES");
        assert_eq!(
            entry.dosage,
            Dosage::Units {
                quantity: "5".into(),
                unit: "CAPSULA(S)".into()
            }
        );
    }

    #[test]
    fn split_lines_keeps_colon_inside_posology() {
        let (date, pairs) = split_lines("(3) OMEPRAZOL 20 MG: 1 CAPSULA: EN AYUNAS");
        assert!(date.is_none());
        assert_eq!(
            pairs,
            vec![("OMEPRAZOL 20 MG".to_string(), "1 CAPSULA: EN AYUNAS".to_string())]
        );
    }
}
