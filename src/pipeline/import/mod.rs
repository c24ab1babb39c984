pub mod importer;
pub mod matcher;
pub mod normalize;
pub mod rayen;
pub mod ssasur;

pub use importer::*;

use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("No text to import")]
    EmptyInput,

    #[error("Drug catalog is not available")]
    CatalogUnavailable,

    #[error("No medication in the text was recognized")]
    NothingRecognized,

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),
}
