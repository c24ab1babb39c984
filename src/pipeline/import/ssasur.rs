//! Hospital-Export-B ("SSASUR") parser.
//!
//! ```text
//! Establecimiento HOSPITAL DR. HERNAN HENRIQUEZ ARAVENA
//! Fecha emisión: 12-03-2024 (1/3)
//! PACIENTE
//! Nombre: ...
//! PRESCRIPCIÓN
//! 1.- LOSARTAN 50 MG COMPRIMIDO 30
//! 1 COMPRIMIDO CADA 12 HORAS
//! 2.- PARACETAMOL 500 MG COMPRIMIDO.
//! OBSERVACIÓN: SOS DOLOR
//! ```
//!
//! Header lines carry the issue date, the `(n/d)` dispensing fraction whose
//! denominator is the recipe duration in months, and the issuing facility.
//! The patient section is ignored. Each numbered product in the
//! prescription section collects the following lines as its posology.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::config::ImportConfig;
use crate::models::Recipe;

use super::importer::{build_entry, recipe_duration_months, resolve_sku, ImportContext, ParsedRecipe};
use super::matcher::detect_form_hint;
use super::normalize::{
    extract_strength_tokens, normalize_name, parse_posology, signals_as_needed, strip_accents,
    DoseUnit,
};

/// Posology used when an observation only says "as needed".
pub const AS_NEEDED_POSOLOGY: &str = "SEGÚN INDICACIÓN";

static RE_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{2})[-/](\d{2})[-/](\d{4})").unwrap());

static RE_FRACTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\s*(\d+)\s*/\s*(\d+)\s*\)").unwrap());

static RE_FACILITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^ESTABLECIMIENTO\s*:?\s*(.+)$").unwrap());

static RE_PRODUCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s*\.-\s*(.+)$").unwrap());

static RE_TRAILING_NUMBERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\s+[\d.,;:/()*#\-]+)+\s*$").unwrap());

static RE_TRAILING_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.,;:*#\-]+\s*$").unwrap());

static RE_OBSERVATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)OBSERVACI[OÓ]N\s*:?").unwrap());

#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    Header,
    Patient,
    Prescription,
}

/// Header facts of one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    pub issue_date: Option<NaiveDate>,
    pub duration_months: Option<u32>,
    pub facility: Option<String>,
}

/// One numbered product and the lines that follow it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductBlock {
    pub product: String,
    pub posology: String,
    pub observation: Option<String>,
}

/// Map a facility name onto its canonical label; unknown names pass through.
pub fn canonical_facility(name: &str, config: &ImportConfig) -> String {
    let key = strip_accents(&name.to_uppercase());
    config
        .facility_labels
        .iter()
        .find(|(keyword, _)| key.contains(&strip_accents(&keyword.to_uppercase())))
        .map(|(_, label)| label.clone())
        .unwrap_or_else(|| name.trim().to_string())
}

/// Drop trailing quantities and punctuation from a product line.
///
/// A trailing number is only a pack quantity when the name already carries
/// a strength or ends in a unit or form word. `ENALAPRIL 10` keeps its `10`.
pub fn clean_product_name(product: &str) -> String {
    let mut current = product.trim().to_string();
    loop {
        let next = RE_TRAILING_PUNCT.replace(&current, "").trim().to_string();
        if next != current {
            current = next;
            continue;
        }
        match RE_TRAILING_NUMBERS.find(&current) {
            Some(m) if trailing_numbers_are_quantity(&current[..m.start()]) => {
                current = current[..m.start()].trim().to_string();
            }
            _ => return current,
        }
    }
}

fn trailing_numbers_are_quantity(head: &str) -> bool {
    if !extract_strength_tokens(head).is_empty() {
        return true;
    }
    head.split_whitespace()
        .last()
        .is_some_and(|word| DoseUnit::from_word(word).is_some() || detect_form_hint(word).is_some())
}

fn section_marker(line: &str) -> Option<Section> {
    let key = strip_accents(&line.to_uppercase());
    let key = key.trim_end_matches(':').trim();
    if key.starts_with("PRESCRIPCION") {
        Some(Section::Prescription)
    } else if key == "PACIENTE" || key.starts_with("PACIENTE:") {
        Some(Section::Patient)
    } else {
        None
    }
}

fn split_observation(text: &str) -> (String, Option<String>) {
    match RE_OBSERVATION.find(text) {
        Some(m) => {
            let before = text[..m.start()].trim().to_string();
            let after = text[m.end()..].trim().to_string();
            (before, (!after.is_empty()).then_some(after))
        }
        None => (text.trim().to_string(), None),
    }
}

/// Split a document into its header and product blocks.
pub fn split_document(raw: &str, config: &ImportConfig) -> (Header, Vec<ProductBlock>) {
    let mut header = Header::default();
    let mut blocks: Vec<(String, Vec<String>)> = Vec::new();
    let mut section = Section::Header;

    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(next) = section_marker(line) {
            section = next;
            continue;
        }
        match section {
            Section::Header => {
                if let Some(caps) = RE_FACILITY.captures(line) {
                    if let Some(name) = caps.get(1) {
                        header.facility = Some(canonical_facility(name.as_str(), config));
                    }
                    continue;
                }
                if header.issue_date.is_none() {
                    header.issue_date = find_date(line);
                }
                if header.duration_months.is_none() {
                    header.duration_months = RE_FRACTION
                        .captures(line)
                        .and_then(|c| c.get(2)?.as_str().parse().ok())
                        .filter(|m: &u32| *m > 0);
                }
            }
            Section::Patient => {}
            Section::Prescription => {
                if let Some(caps) = RE_PRODUCT.captures(line) {
                    let product = caps.get(2).map_or("", |m| m.as_str());
                    blocks.push((product.to_string(), Vec::new()));
                } else if let Some((_, rest)) = blocks.last_mut() {
                    rest.push(line.to_string());
                }
            }
        }
    }

    let blocks = blocks
        .into_iter()
        .map(|(product, rest)| {
            let (posology, observation) = split_observation(&rest.join(" "));
            ProductBlock {
                product: clean_product_name(&product),
                posology,
                observation,
            }
        })
        .collect();

    (header, blocks)
}

fn find_date(line: &str) -> Option<NaiveDate> {
    let caps = RE_DATE.captures(line)?;
    let day = caps.get(1)?.as_str().parse().ok()?;
    let month = caps.get(2)?.as_str().parse().ok()?;
    let year = caps.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Parse a Format-B document into a secondary-care recipe.
pub fn parse(raw: &str, ctx: &ImportContext<'_>) -> ParsedRecipe {
    let (header, blocks) = split_document(raw, ctx.config);

    let mut entries = Vec::new();
    let mut skipped_lines = Vec::new();

    for block in &blocks {
        let mut parsed = parse_posology(&block.posology);
        if parsed.is_empty() {
            if let Some(observation) = &block.observation {
                parsed.posology_text = if signals_as_needed(observation) {
                    AS_NEEDED_POSOLOGY.to_string()
                } else {
                    observation.to_uppercase()
                };
            }
        }

        let Some(sku) = resolve_sku(ctx, &block.product, parsed.unit) else {
            skipped_lines.push(normalize_name(&block.product));
            continue;
        };
        entries.push(build_entry(sku, &parsed));
    }

    let months = recipe_duration_months(
        &entries,
        header.duration_months,
        ctx.config.format_b_default_months,
    );
    let mut recipe = Recipe::new(header.issue_date.unwrap_or(ctx.today), months);
    recipe.entries = entries;
    recipe.origin_label = header.facility;

    tracing::debug!(
        products = blocks.len(),
        matched = recipe.entries.len(),
        months,
        facility = ?recipe.origin_label,
        "Format-B document parsed"
    );

    ParsedRecipe {
        recipe,
        skipped_lines,
        errors: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogIndex;
    use crate::models::Dosage;

    const DOCUMENT: &str = "\
RECETA MÉDICA
Establecimiento HOSPITAL DR. HERNAN HENRIQUEZ ARAVENA
Fecha emisión: 12-03-2024 (1/3)
PACIENTE
Nombre: JUAN PÉREZ
Fecha nacimiento: 01-01-1950
PRESCRIPCIÓN
1.- LOSARTAN 50 MG COMPRIMIDO 30
1 COMPRIMIDO CADA 12 HORAS
2.- PARACETAMOL 500 MG COMPRIMIDO.
OBSERVACIÓN: SOS DOLOR
3.- WARFARINA 5 MG
1 COMPRIMIDO AL DIA
4.- OMEPRAZOL 20 MG
OBSERVACIÓN: tomar en ayunas
";

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
    fn header_is_read_and_patient_section_ignored() {
        let config = ImportConfig::default();
        let (header, blocks) = split_document(DOCUMENT, &config);
        assert_eq!(header.issue_date, NaiveDate::from_ymd_opt(2024, 3, 12));
        assert_eq!(header.duration_months, Some(3));
        assert_eq!(
            header.facility.as_deref(),
            Some("HOSPITAL HERNÁN HENRÍQUEZ ARAVENA")
        );
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].product, "LOSARTAN 50 MG COMPRIMIDO");
        assert_eq!(blocks[0].posology, "1 COMPRIMIDO CADA 12 HORAS");
        assert_eq!(blocks[1].product, "PARACETAMOL 500 MG COMPRIMIDO");
        assert_eq!(blocks[1].observation.as_deref(), Some("SOS DOLOR"));
    }

    #[test]
    fn full_document_builds_recipe() {
        let catalog = CatalogIndex::load_test();
        let config = ImportConfig::default();
        let parsed = parse(DOCUMENT, &ctx(&catalog, &config));

        let recipe = &parsed.recipe;
        assert_eq!(recipe.duration_months, 3);
        assert_eq!(recipe.issue_date, NaiveDate::from_ymd_opt(2024, 3, 12).unwrap());
        assert_eq!(
            recipe.origin_label.as_deref(),
            Some("HOSPITAL HERNÁN HENRÍQUEZ ARAVENA")
        );

        let skus: Vec<&str> = recipe
            .entries
            .iter()
            .filter_map(|e| e.sku_ref.as_deref())
            .collect();
        assert_eq!(skus, vec!["LOS50", "PCT500", "OMP20"]);
        assert_eq!(parsed.skipped_lines, vec!["WARFARINA 5 MG".to_string()]);

        assert_eq!(recipe.entries[0].posology_text, "CADA 12 HORAS");
        assert_eq!(
            recipe.entries[0].dosage,
            Dosage::Units {
                quantity: "1".into(),
                unit: "COMPRIMIDO(S)".into()
            }
        );
        assert_eq!(recipe.entries[1].posology_text, AS_NEEDED_POSOLOGY);
        assert_eq!(recipe.entries[2].posology_text, "TOMAR EN AYUNAS");
    }

    #[test]
    fn line_durations_apply_without_header_fraction() {
        let catalog = CatalogIndex::load_test();
        let config = ImportConfig::default();
        let raw = "PRESCRIPCIÓN\n1.- ENALAPRIL 10 MG\n1 COMPRIMIDO CADA 12 HORAS POR 2 MESES";
        let parsed = parse(raw, &ctx(&catalog, &config));
        assert_eq!(parsed.recipe.duration_months, 2);
        assert!(parsed.recipe.origin_label.is_none());
    }

    #[test]
    fn fallback_duration_without_any_hint() {
        let catalog = CatalogIndex::load_test();
        let config = ImportConfig::default();
        let raw = "PRESCRIPCION:\n1.- ENALAPRIL 10 MG\n1 COMPRIMIDO AL DIA";
        let parsed = parse(raw, &ctx(&catalog, &config));
        assert_eq!(parsed.recipe.duration_months, 12);
        assert_eq!(parsed.recipe.issue_date, NaiveDate::from_ymd_opt(2024, 5, 10).unwrap());
    }

    #[test]
    fn inline_observation_suffix() {
        let config = ImportConfig::default();
        let raw = "PRESCRIPCIÓN\n1.- IBUPROFENO 400 MG\nCADA 8 HORAS OBSERVACIÓN: con comida";
        let (_, blocks) = split_document(raw, &config);
        assert_eq!(blocks[0].posology, "CADA 8 HORAS");
        assert_eq!(blocks[0].observation.as_deref(), Some("con comida"));
    }

    #[test]
    fn unknown_facility_passes_through() {
        let config = ImportConfig::default();
        assert_eq!(
            canonical_facility("  Cesfam Santa Rosa ", &config),
            "Cesfam Santa Rosa"
        );
        assert_eq!(
            canonical_facility("Hospital de Pitrufquén", &config),
            "HOSPITAL DE PITRUFQUÉN"
        );
    }

    #[test]
    fn product_noise_is_stripped() {
        assert_eq!(clean_product_name("LOSARTAN 50 MG COMPRIMIDO 30"), "LOSARTAN 50 MG COMPRIMIDO");
        assert_eq!(clean_product_name("PARACETAMOL 500 MG. "), "PARACETAMOL 500 MG");
        assert_eq!(clean_product_name("OMEPRAZOL 20 MG (28) -"), "OMEPRAZOL 20 MG");
        assert_eq!(clean_product_name("VITAMINA B12"), "VITAMINA B12");
    }

    #[test]
    fn bare_strength_survives_cleanup() {
        assert_eq!(clean_product_name("ENALAPRIL 10"), "ENALAPRIL 10");
        assert_eq!(clean_product_name("ENALAPRIL 10."), "ENALAPRIL 10");
        assert_eq!(clean_product_name("ENALAPRIL 10 MG 30"), "ENALAPRIL 10 MG");
        assert_eq!(clean_product_name("LOSARTAN COMPRIMIDO 30"), "LOSARTAN COMPRIMIDO");
    }
}
