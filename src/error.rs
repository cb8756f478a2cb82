//! Error types

use thiserror::Error;

use crate::domain::aggregates::AssociationError;
use crate::domain::value_objects::{ClassificationId, ItemRef, TaxonId};

#[derive(Error, Debug)]
pub enum ClassificationError {
    #[error("{item} is already classified under taxon {taxon_id}")]
    ConstraintViolation { item: ItemRef, taxon_id: TaxonId },

    #[error("{0} not found")]
    NotFound(String),

    #[error("Positions under taxon {taxon_id} are not dense: {positions:?}")]
    InvariantFailure { taxon_id: TaxonId, positions: Vec<u32> },

    #[error("Invalid request: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl ClassificationError {
    pub fn classification_not_found(id: ClassificationId) -> Self {
        Self::NotFound(format!("Classification {id}"))
    }

    pub fn not_in_taxon(item: ItemRef, taxon_id: TaxonId) -> Self {
        Self::NotFound(format!("{item} under taxon {taxon_id}"))
    }

    /// Lifts an aggregate error into the store's error, naming what it was about.
    pub(crate) fn from_association(err: AssociationError, item: ItemRef, taxon_id: TaxonId, id: ClassificationId) -> Self {
        match err {
            AssociationError::Duplicate => Self::ConstraintViolation { item, taxon_id },
            AssociationError::MemberNotFound => Self::classification_not_found(id),
            AssociationError::NotDense { positions } => Self::InvariantFailure { taxon_id, positions },
        }
    }
}

pub type Result<T> = std::result::Result<T, ClassificationError>;
