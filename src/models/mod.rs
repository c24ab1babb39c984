pub mod catalog;
pub mod enums;
pub mod medication;
pub mod patient;
pub mod prm;

pub use catalog::*;
pub use medication::*;
pub use patient::*;
pub use prm::*;
