//! Text Normalizer shared by both hospital-export importers.
//!
//! Turns inconsistently formatted clinical text into comparable tokens and
//! numeric facts. Posology parsing is an ordered sequence of stages, each
//! taking the residual text of the previous one:
//!
//! 1. [`strip_duration`]: `POR 5 DIAS`, `3 MESES`, `2 SEMANAS DE TRATAMIENTO`
//! 2. [`strip_reference_numbers`]: `Nº 12345`, `RECETA 991`, `#77`
//! 3. [`take_quantity_and_unit`]: leading `1`, `1/2`, `0,5` plus a unit word
//! 4. [`clean_remainder`]: what is left is the free-text instruction

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static RE_NAME_PUNCT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[(),.:/+\-]").unwrap());
static RE_SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

static RE_STRENGTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(\d+(?:[.,]\d+)?)\s*(MCG|UG|[µΜ]G|MMOL|MEQ|MG|ML|UI|IU|G|%)(?:[^A-Z0-9ÁÉÍÓÚÑ]|$)",
    )
    .unwrap()
});

static RE_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(CADA\s+|C/\s*)?(?:\b(?:POR|DURANTE)\s+)?\b(\d+(?:[.,]\d+)?)\s*(MESES|MES|SEMANAS|SEMANA|DÍAS|DIAS|DÍA|DIA)\b(?:\s+DE\s+TRATAMIENTO)?",
    )
    .unwrap()
});

static RE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\bRECETA\s*(?:N[º°]\.?|NRO\.?)?|\bFOLIO\s*:?|\bN[º°]\.?|\bNRO\.?|#)\s*\d+").unwrap()
});

static RE_QUANTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\d+/\d+|\d+(?:[.,]\d+)?)$").unwrap());

static RE_HOURLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+\s*(?:HORAS|HORA|HRS|HR|H)\b").unwrap());

static RE_MONTHLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bCADA\s+(?:1\s+|UN\s+)?MES\b|\bMENSUAL|\bCADA\s+30\s+D[IÍ]AS\b").unwrap()
});

static RE_AS_NEEDED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bS\.?O\.?S\b|\bSEG[UÚ]N\s+NECESIDAD|\bEN\s+CASO\s+DE\b|\bSI\s+PRECISA\b").unwrap()
});

// ═══════════════════════════════════════════════════════════
// Names and tokens
// ═══════════════════════════════════════════════════════════

/// Upper-case, drop `(),.:/+-`, collapse whitespace.
pub fn normalize_name(text: &str) -> String {
    let upper = text.to_uppercase();
    let stripped = RE_NAME_PUNCT.replace_all(&upper, " ");
    RE_SPACES.replace_all(stripped.trim(), " ").into_owned()
}

/// Normalized tokens longer than two characters that are not pure numbers.
pub fn tokenize(text: &str) -> Vec<String> {
    normalize_name(text)
        .split(' ')
        .filter(|t| t.chars().count() > 2)
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
        .collect()
}

/// Remove Spanish accents from upper-case text (`CÁPSULA` → `CAPSULA`).
pub fn strip_accents(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'Á' => 'A',
            'É' => 'E',
            'Í' => 'I',
            'Ó' => 'O',
            'Ú' | 'Ü' => 'U',
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' | 'ü' => 'u',
            other => other,
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════
// Numbers
// ═══════════════════════════════════════════════════════════

/// Render a number without trailing zeros or scientific notation.
pub fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return "0".into();
    }
    let fixed = format!("{value:.6}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "" | "-0" => "0".into(),
        other => other.to_string(),
    }
}

/// `0,50` → `0.5`, `0500` → `500`.
pub fn canonical_decimal(raw: &str) -> String {
    let dotted = raw.trim().replace(',', ".");
    match dotted.parse::<f64>() {
        Ok(v) => format_number(v),
        Err(_) => dotted,
    }
}

fn parse_decimal(raw: &str) -> Option<f64> {
    raw.trim().replace(',', ".").parse::<f64>().ok()
}

// ═══════════════════════════════════════════════════════════
// Strength tokens
// ═══════════════════════════════════════════════════════════

/// A strength such as `500 MG`, with canonical value and unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrengthToken {
    pub value: String,
    pub unit: String,
}

impl StrengthToken {
    pub fn new(value: &str, unit: &str) -> Self {
        Self {
            value: canonical_decimal(value),
            unit: canonical_strength_unit(unit),
        }
    }
}

fn canonical_strength_unit(unit: &str) -> String {
    let upper = unit.to_uppercase();
    match upper.as_str() {
        "UG" | "µG" | "ΜG" => "MCG".into(),
        "IU" => "UI".into(),
        _ => upper,
    }
}

/// Every `<number><unit>` pair in the text, in order of appearance.
pub fn extract_strength_tokens(text: &str) -> Vec<StrengthToken> {
    let upper = text.to_uppercase();
    RE_STRENGTH
        .captures_iter(&upper)
        .filter_map(|caps| {
            let value = caps.get(1)?.as_str();
            let unit = caps.get(2)?.as_str();
            Some(StrengthToken::new(value, unit))
        })
        .collect()
}

/// Whether a presentation string carries this strength, under unit aliasing
/// and decimal/comma notation.
pub fn presentation_has_strength(presentation: &str, token: &StrengthToken) -> bool {
    extract_strength_tokens(presentation)
        .iter()
        .any(|t| t == token)
}

// ═══════════════════════════════════════════════════════════
// Dose units
// ═══════════════════════════════════════════════════════════

/// Administration unit named in a posology (`1 COMPRIMIDO ...`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DoseUnit {
    Tablet,
    Capsule,
    Ampoule,
    Drop,
    Sachet,
    Patch,
    Millilitre,
    InternationalUnit,
    Puff,
}

impl DoseUnit {
    /// Recognize a unit word; accents, plural and `(S)` suffixes are ignored.
    pub fn from_word(word: &str) -> Option<Self> {
        let upper = strip_accents(&word.to_uppercase());
        let cleaned = upper
            .trim_matches(|c: char| !c.is_alphanumeric() && c != '(' && c != ')')
            .replace("(S)", "")
            .replace("(ES)", "");
        let unit = match cleaned.as_str() {
            "COMPRIMIDO" | "COMPRIMIDOS" | "COMP" | "CP" | "TABLETA" | "TABLETAS" => Self::Tablet,
            "CAPSULA" | "CAPSULAS" | "CAPS" => Self::Capsule,
            "AMPOLLA" | "AMPOLLAS" | "AMP" => Self::Ampoule,
            "GOTA" | "GOTAS" => Self::Drop,
            "SOBRE" | "SOBRES" => Self::Sachet,
            "PARCHE" | "PARCHES" => Self::Patch,
            "ML" | "MLS" | "CC" => Self::Millilitre,
            "UI" | "U" | "UNIDAD" | "UNIDADES" => Self::InternationalUnit,
            "PUFF" | "PUFFS" | "INHALACION" | "INHALACIONES" => Self::Puff,
            _ => return None,
        };
        Some(unit)
    }

    /// Label stored on medication entries.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Tablet => "COMPRIMIDO(S)",
            Self::Capsule => "CAPSULA(S)",
            Self::Ampoule => "AMPOLLA(S)",
            Self::Drop => "GOTA(S)",
            Self::Sachet => "SOBRE(S)",
            Self::Patch => "PARCHE(S)",
            Self::Millilitre => "ML",
            Self::InternationalUnit => "UI",
            Self::Puff => "PUFF",
        }
    }

    /// Stem looked up in catalog presentations when scoring candidates.
    pub fn presentation_token(&self) -> &'static str {
        match self {
            Self::Tablet => "COMPRIMIDO",
            Self::Capsule => "CAPSULA",
            Self::Ampoule => "AMPOLLA",
            Self::Drop => "GOTA",
            Self::Sachet => "SOBRE",
            Self::Patch => "PARCHE",
            Self::Millilitre => "ML",
            Self::InternationalUnit => "UI",
            Self::Puff => "INHAL",
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Posology stages
// ═══════════════════════════════════════════════════════════

/// Treatment duration found in a posology.
#[derive(Debug, Clone, PartialEq)]
pub struct DurationPhrase {
    /// Unrounded month figure (5 days → 0.1667).
    pub months: f64,
    pub text: String,
}

/// Stage 1: remove the first duration phrase and convert it to months.
/// A `CADA 1 MES` or `C/2 DIAS` frequency is not a duration and is left in place.
pub fn strip_duration(text: &str) -> (String, Option<DurationPhrase>) {
    for caps in RE_DURATION.captures_iter(text) {
        if caps.get(1).is_some() {
            continue;
        }
        let (Some(whole), Some(amount), Some(unit)) = (caps.get(0), caps.get(2), caps.get(3))
        else {
            continue;
        };
        let Some(n) = parse_decimal(amount.as_str()) else {
            continue;
        };
        let months = match strip_accents(unit.as_str()).as_str() {
            "MES" | "MESES" => n,
            "SEMANA" | "SEMANAS" => n * 7.0 / 30.0,
            _ => n / 30.0,
        };
        let mut residual = String::with_capacity(text.len());
        residual.push_str(&text[..whole.start()]);
        residual.push(' ');
        residual.push_str(&text[whole.end()..]);
        return (
            collapse(&residual),
            Some(DurationPhrase {
                months,
                text: whole.as_str().trim().to_string(),
            }),
        );
    }
    (text.to_string(), None)
}

/// Stage 2: remove reference / recipe-number noise.
pub fn strip_reference_numbers(text: &str) -> String {
    collapse(&RE_REFERENCE.replace_all(text, " "))
}

/// Stage 3: consume a leading quantity and, after it, a known unit word.
pub fn take_quantity_and_unit(text: &str) -> (String, Option<String>, Option<DoseUnit>) {
    let trimmed = text.trim_start();
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default();

    if !RE_QUANTITY.is_match(first) {
        return (text.to_string(), None, None);
    }
    let quantity = if first.contains('/') {
        first.to_string()
    } else {
        canonical_decimal(first)
    };

    let rest = rest.trim_start();
    let mut rest_parts = rest.splitn(2, char::is_whitespace);
    let next = rest_parts.next().unwrap_or_default();
    match DoseUnit::from_word(next) {
        Some(unit) => (
            rest_parts.next().unwrap_or_default().to_string(),
            Some(quantity),
            Some(unit),
        ),
        None => (rest.to_string(), Some(quantity), None),
    }
}

/// Stage 4: trim punctuation and whitespace off the free-text remainder.
pub fn clean_remainder(text: &str) -> String {
    collapse(text)
        .trim_matches(|c: char| c.is_whitespace() || ",.;:-".contains(c))
        .to_string()
}

fn collapse(text: &str) -> String {
    RE_SPACES.replace_all(text.trim(), " ").into_owned()
}

/// Structured facts extracted from one posology text.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedPosology {
    pub posology_text: String,
    pub quantity: Option<String>,
    pub unit: Option<DoseUnit>,
    pub duration_months: Option<f64>,
    pub duration_text: Option<String>,
}

impl ParsedPosology {
    /// Nothing usable was recognized.
    pub fn is_empty(&self) -> bool {
        self.posology_text.is_empty() && self.quantity.is_none()
    }
}

/// Run the four posology stages over raw text.
pub fn parse_posology(text: &str) -> ParsedPosology {
    let upper = collapse(&text.to_uppercase());
    let (residual, duration) = strip_duration(&upper);
    let residual = strip_reference_numbers(&residual);
    let (residual, quantity, unit) = take_quantity_and_unit(&residual);
    let posology_text = clean_remainder(&residual);

    ParsedPosology {
        posology_text,
        quantity,
        unit,
        duration_months: duration.as_ref().map(|d| d.months),
        duration_text: duration.map(|d| d.text),
    }
}

// ═══════════════════════════════════════════════════════════
// Frequency signals
// ═══════════════════════════════════════════════════════════

/// `CADA 8 HORAS`, `12 HRS`.
pub fn mentions_hourly_frequency(text: &str) -> bool {
    RE_HOURLY.is_match(&text.to_uppercase())
}

/// `CADA 1 MES`, `MENSUAL`, `CADA 30 DIAS`.
pub fn mentions_monthly_frequency(text: &str) -> bool {
    RE_MONTHLY.is_match(&text.to_uppercase())
}

/// `SOS`, `SEGÚN NECESIDAD`, `EN CASO DE DOLOR`.
pub fn signals_as_needed(text: &str) -> bool {
    RE_AS_NEEDED.is_match(&text.to_uppercase())
}
