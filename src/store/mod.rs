//! Classification stores.
//!
//! [`ClassificationStore`] is the engine's surface: every mutation is scoped
//! to one taxon at a time, serialized against other mutations of that taxon,
//! and leaves the taxon's positions dense before it returns. Catalog item and
//! taxon collaborators call the `replace_*` and `remove_*` operations
//! explicitly when their associations change.

use async_trait::async_trait;
use tracing::error;

use crate::domain::aggregates::{AssociationError, TaxonClassifications};
use crate::domain::{Classification, ClassificationId, ItemRef, TaxonId};
use crate::error::{ClassificationError, Result};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryClassificationStore;
pub use postgres::PgClassificationStore;

#[async_trait]
pub trait ClassificationStore: Send + Sync {
    /// Files `item` under `taxon_id`. Appends at the end unless `position`
    /// (1-based, clamped to `1..=N + 1`) is given.
    async fn create(&self, item: ItemRef, taxon_id: TaxonId, position: Option<u32>) -> Result<Classification>;

    async fn get(&self, id: ClassificationId) -> Result<Classification>;

    async fn find(&self, item: ItemRef, taxon_id: TaxonId) -> Result<Option<Classification>>;

    /// Moves a classification to `new_position`, clamped to `1..=N`.
    async fn reposition(&self, id: ClassificationId, new_position: u32) -> Result<Classification>;

    /// Removes a classification and closes the gap it leaves.
    async fn delete(&self, id: ClassificationId) -> Result<Classification>;

    /// Makes `taxon_ids` the exact set of taxons `item` is filed under.
    /// Returns the item's classifications afterwards.
    async fn replace_item_taxons(&self, item: ItemRef, taxon_ids: &[TaxonId]) -> Result<Vec<Classification>>;

    /// Makes `items` the exact ordered contents of `taxon_id`.
    /// Returns the taxon's classifications afterwards.
    async fn replace_taxon_items(&self, taxon_id: TaxonId, items: &[ItemRef]) -> Result<Vec<Classification>>;

    /// The taxon's classifications in position order.
    async fn taxon_classifications(&self, taxon_id: TaxonId) -> Result<Vec<Classification>>;

    /// The item's classifications ordered by position, then taxon.
    async fn item_classifications(&self, item: ItemRef) -> Result<Vec<Classification>>;

    /// Drops every classification of a taxon that is going away.
    async fn remove_taxon(&self, taxon_id: TaxonId) -> Result<Vec<Classification>>;

    /// Drops every classification of an item that is going away. Returns
    /// exactly the classifications this call removed.
    async fn remove_item(&self, item: ItemRef) -> Result<Vec<Classification>>;

    /// Callers that speak 0-indexed positions (the admin sortable UI) go through here.
    async fn reposition_external(&self, id: ClassificationId, zero_indexed_position: u32) -> Result<Classification> {
        self.reposition(id, zero_indexed_position.saturating_add(1)).await
    }

}

/// Orders an item's classifications the way callers see its taxon list.
pub(crate) fn sort_for_item(classifications: &mut [Classification]) {
    classifications.sort_by_key(|c| (c.position, c.taxon_id));
}

/// Runs `f` on a copy of `list` and commits it only if positions stay dense.
pub(crate) fn apply<T>(list: &mut TaxonClassifications, f: impl FnOnce(&mut TaxonClassifications) -> Result<T>) -> Result<T> {
    let mut working = list.clone();
    let out = f(&mut working)?;
    if let Err(AssociationError::NotDense { positions }) = working.check_density() {
        let taxon_id = *list.scope();
        error!(taxon_id = %taxon_id, ?positions, "classification positions lost density, rolled back");
        return Err(ClassificationError::InvariantFailure { taxon_id, positions });
    }
    *list = working;
    Ok(out)
}
