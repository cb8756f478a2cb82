//! Taxon previews: the first few items a storefront shows for a taxon.

use crate::domain::{ItemKind, ItemRef, TaxonId};
use crate::error::Result;
use crate::store::ClassificationStore;

pub const DEFAULT_PREVIEW_SIZE: usize = 4;

/// Up to `max` active items of `kind`, taken from the taxon in position order
/// and then topped up from `descendants` in the order given. The taxon tree
/// and item activity belong to the callers, so both come in as arguments.
pub async fn taxon_preview<F>(
    store: &dyn ClassificationStore,
    taxon_id: TaxonId,
    descendants: &[TaxonId],
    kind: ItemKind,
    max: usize,
    is_active: F,
) -> Result<Vec<ItemRef>>
where
    F: Fn(&ItemRef) -> bool,
{
    let mut picked: Vec<ItemRef> = Vec::with_capacity(max);
    for scope in std::iter::once(taxon_id).chain(descendants.iter().copied()) {
        if picked.len() >= max { break; }
        for c in store.taxon_classifications(scope).await? {
            if picked.len() >= max { break; }
            if c.item.kind == kind && is_active(&c.item) && !picked.contains(&c.item) { picked.push(c.item); }
        }
    }
    Ok(picked)
}
