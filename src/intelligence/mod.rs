pub mod aggregate;
pub mod detection;
pub mod engine;
pub mod helpers;
pub mod messages;
pub mod prm;
pub mod reference;
pub mod types;

pub use engine::{Detection, EvaluationReport, RulesEngine};
pub use reference::ReferenceData;
pub use types::*;
