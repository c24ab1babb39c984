use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ModelError {
    #[error("Invalid value for {field}: {value}")]
    InvalidEnum { field: String, value: String },
}

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(ModelError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(DosageForm {
    Tablet => "tablet",
    Capsule => "capsule",
    Suspension => "suspension",
    Inhaler => "inhaler",
    Insulin => "insulin",
    Other => "other",
    Manual => "manual",
});

impl DosageForm {
    /// Map free catalog form text ("COMPRIMIDO RECUBIERTO", "AEROSOL") to a form.
    pub fn from_catalog_text(text: &str) -> Self {
        let lower = text.to_lowercase();
        if lower.contains("comprimido") {
            Self::Tablet
        } else if lower.contains("capsula") || lower.contains("cápsula") {
            Self::Capsule
        } else if lower.contains("susp") {
            Self::Suspension
        } else if lower.contains("aerosol") || lower.contains("inhal") {
            Self::Inhaler
        } else if lower.contains("insulina") {
            Self::Insulin
        } else {
            Self::Other
        }
    }
}

str_enum!(RecipeKind {
    PrimaryCare => "primary-care",
    SecondaryCare => "secondary-care",
});

str_enum!(SourceKind {
    PrimaryCare => "primary-care",
    SecondaryCare => "secondary-care",
    OutOfSystem => "out-of-system",
    SelfMedicated => "self-medicated",
});

impl From<RecipeKind> for SourceKind {
    fn from(kind: RecipeKind) -> Self {
        match kind {
            RecipeKind::PrimaryCare => Self::PrimaryCare,
            RecipeKind::SecondaryCare => Self::SecondaryCare,
        }
    }
}

str_enum!(ErrorStage {
    Prescription => "prescription",
    Transcription => "transcription",
    Dispensing => "dispensing",
    Administration => "administration",
});

str_enum!(Sex {
    Female => "F",
    Male => "M",
    Unspecified => "",
});

str_enum!(FindingKind {
    Criterion => "criterion",
    Interaction => "interaction",
    ClassInteraction => "class_interaction",
    CompoundRisk => "compound_risk",
    PpiAlert => "ppi_alert",
    RenalAdjustment => "renal_adjustment",
    DuplicateTherapy => "duplicate_therapy",
});

impl FindingKind {
    /// The automatic PRM source a finding of this kind is synchronized under.
    pub fn auto_source(&self) -> AutoSource {
        match self {
            Self::Criterion => AutoSource::Criteria,
            Self::Interaction | Self::ClassInteraction | Self::CompoundRisk => {
                AutoSource::Interaction
            }
            Self::PpiAlert => AutoSource::Ppi,
            Self::RenalAdjustment => AutoSource::Renal,
            Self::DuplicateTherapy => AutoSource::Duplicates,
        }
    }
}

str_enum!(AutoSource {
    Duplicates => "duplicates",
    Criteria => "criteria",
    Interaction => "interaction",
    Ppi => "ppi",
    Renal => "renal",
});

impl AutoSource {
    pub const ALL: [AutoSource; 5] = [
        Self::Duplicates,
        Self::Criteria,
        Self::Interaction,
        Self::Ppi,
        Self::Renal,
    ];
}
