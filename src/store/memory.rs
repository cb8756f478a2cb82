//! In-memory classification store.
//!
//! Each taxon's list sits behind its own async mutex, held for the whole
//! read-modify-write of a mutation. Mutations run against a working copy that
//! only replaces the live list once its positions check out dense, so a failed
//! operation leaves nothing behind. The id and item indexes are only touched
//! while the owning taxon is locked, and never held across an await.
//!
//! Wholesale replacement of an item's taxons is additionally serialized per
//! item, so two replaces of the same item cannot both act on a stale view of
//! its taxon set. Lock order is item, then taxon, then the map and indexes.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use super::{apply, sort_for_item, ClassificationStore};
use crate::domain::aggregates::TaxonClassifications;
use crate::domain::{Classification, ClassificationId, ItemRef, TaxonId};
use crate::error::{ClassificationError, Result};

type TaxonSlot = Arc<Mutex<TaxonClassifications>>;
type ItemLock = Arc<Mutex<()>>;

#[derive(Default)]
pub struct InMemoryClassificationStore {
    taxons: RwLock<HashMap<TaxonId, TaxonSlot>>,
    items: Mutex<HashMap<ItemRef, ItemLock>>,
    by_id: RwLock<HashMap<ClassificationId, TaxonId>>,
    by_item: RwLock<HashMap<ItemRef, BTreeSet<TaxonId>>>,
}

impl InMemoryClassificationStore {
    pub fn new() -> Self { Self::default() }

    async fn slot(&self, taxon_id: TaxonId) -> TaxonSlot {
        if let Some(slot) = self.taxons.read().await.get(&taxon_id) { return slot.clone(); }
        self.taxons.write().await.entry(taxon_id).or_insert_with(|| Arc::new(Mutex::new(TaxonClassifications::new(taxon_id)))).clone()
    }

    async fn existing_slot(&self, taxon_id: TaxonId) -> Option<TaxonSlot> {
        self.taxons.read().await.get(&taxon_id).cloned()
    }

    /// Slot of the taxon a classification lives in.
    async fn slot_of(&self, id: ClassificationId) -> Result<(TaxonId, TaxonSlot)> {
        let taxon_id = self.by_id.read().await.get(&id).copied().ok_or_else(|| ClassificationError::classification_not_found(id))?;
        let slot = self.existing_slot(taxon_id).await.ok_or_else(|| ClassificationError::classification_not_found(id))?;
        Ok((taxon_id, slot))
    }

    /// Drops an emptied taxon from the map. Slots are only cloned under the map
    /// lock, so a count of two (map and caller) means nobody else can reach it.
    async fn evict_if_empty(&self, taxon_id: TaxonId, slot: &TaxonSlot, list: &TaxonClassifications) {
        if !list.is_empty() { return; }
        let mut taxons = self.taxons.write().await;
        let ours = taxons.get(&taxon_id).is_some_and(|s| Arc::ptr_eq(s, slot));
        if ours && Arc::strong_count(slot) == 2 {
            taxons.remove(&taxon_id);
            debug!(taxon_id = %taxon_id, "empty taxon evicted");
        }
    }

    async fn item_lock(&self, item: ItemRef) -> ItemLock {
        self.items.lock().await.entry(item).or_default().clone()
    }

    /// Same reachability argument as [`evict_if_empty`](Self::evict_if_empty).
    async fn release_item_lock(&self, item: ItemRef, lock: ItemLock) {
        let mut items = self.items.lock().await;
        if Arc::strong_count(&lock) == 2 { items.remove(&item); }
    }

    async fn track(&self, c: &Classification) {
        self.by_id.write().await.insert(c.id, c.taxon_id);
        self.by_item.write().await.entry(c.item).or_default().insert(c.taxon_id);
    }

    async fn untrack(&self, c: &Classification) {
        self.by_id.write().await.remove(&c.id);
        let mut by_item = self.by_item.write().await;
        if let Some(taxons) = by_item.get_mut(&c.item) {
            taxons.remove(&c.taxon_id);
            if taxons.is_empty() { by_item.remove(&c.item); }
        }
    }

    /// Files `item` under exactly `taxon_ids`, returning what was removed.
    async fn swap_item_taxons(&self, item: ItemRef, taxon_ids: &[TaxonId]) -> Result<Vec<Classification>> {
        let lock = self.item_lock(item).await;
        let result = {
            let _guard = lock.lock().await;
            self.swap_item_taxons_locked(item, taxon_ids).await
        };
        self.release_item_lock(item, lock).await;
        result
    }

    async fn swap_item_taxons_locked(&self, item: ItemRef, taxon_ids: &[TaxonId]) -> Result<Vec<Classification>> {
        let wanted: BTreeSet<TaxonId> = taxon_ids.iter().copied().collect();
        let current = self.by_item.read().await.get(&item).cloned().unwrap_or_default();
        let mut removed = vec![];

        // Ascending taxon order, one taxon locked at a time.
        for taxon_id in current.union(&wanted).copied() {
            let slot = self.slot(taxon_id).await;
            let mut list = slot.lock().await;
            match (wanted.contains(&taxon_id), list.find_child(&item).map(|m| m.id)) {
                (true, None) => {
                    let id = Uuid::now_v7();
                    let member = apply(&mut list, |l| l.insert(id, item, None).map_err(|e| ClassificationError::from_association(e, item, taxon_id, id)))?;
                    self.track(&Classification::from_member(taxon_id, &member)).await;
                }
                (false, Some(id)) => {
                    let member = apply(&mut list, |l| l.remove(id).map_err(|e| ClassificationError::from_association(e, item, taxon_id, id)))?;
                    let classification = Classification::from_member(taxon_id, &member);
                    self.untrack(&classification).await;
                    removed.push(classification);
                }
                _ => {}
            }
            self.evict_if_empty(taxon_id, &slot, &list).await;
        }
        info!(item = %item, taxons = wanted.len(), removed = removed.len(), "item taxons replaced");
        Ok(removed)
    }
}

#[async_trait]
impl ClassificationStore for InMemoryClassificationStore {
    async fn create(&self, item: ItemRef, taxon_id: TaxonId, position: Option<u32>) -> Result<Classification> {
        let slot = self.slot(taxon_id).await;
        let mut list = slot.lock().await;
        let id = Uuid::now_v7();
        let member = apply(&mut list, |l| l.insert(id, item, position).map_err(|e| ClassificationError::from_association(e, item, taxon_id, id)))?;
        let classification = Classification::from_member(taxon_id, &member);
        self.track(&classification).await;
        info!(taxon_id = %taxon_id, item = %item, position = classification.position, "classification created");
        Ok(classification)
    }

    async fn get(&self, id: ClassificationId) -> Result<Classification> {
        let (taxon_id, slot) = self.slot_of(id).await?;
        let list = slot.lock().await;
        list.get(id).map(|m| Classification::from_member(taxon_id, m)).ok_or_else(|| ClassificationError::classification_not_found(id))
    }

    async fn find(&self, item: ItemRef, taxon_id: TaxonId) -> Result<Option<Classification>> {
        let Some(slot) = self.existing_slot(taxon_id).await else { return Ok(None) };
        let list = slot.lock().await;
        Ok(list.find_child(&item).map(|m| Classification::from_member(taxon_id, m)))
    }

    async fn reposition(&self, id: ClassificationId, new_position: u32) -> Result<Classification> {
        let (taxon_id, slot) = self.slot_of(id).await?;
        let mut list = slot.lock().await;
        let item = list.get(id).map(|m| m.child).ok_or_else(|| ClassificationError::classification_not_found(id))?;
        let (from, to) = apply(&mut list, |l| l.move_to(id, new_position).map_err(|e| ClassificationError::from_association(e, item, taxon_id, id)))?;
        debug!(taxon_id = %taxon_id, item = %item, from, to, "classification repositioned");
        list.get(id).map(|m| Classification::from_member(taxon_id, m)).ok_or_else(|| ClassificationError::classification_not_found(id))
    }

    async fn delete(&self, id: ClassificationId) -> Result<Classification> {
        let (taxon_id, slot) = self.slot_of(id).await?;
        let mut list = slot.lock().await;
        let item = list.get(id).map(|m| m.child).ok_or_else(|| ClassificationError::classification_not_found(id))?;
        let member = apply(&mut list, |l| l.remove(id).map_err(|e| ClassificationError::from_association(e, item, taxon_id, id)))?;
        let classification = Classification::from_member(taxon_id, &member);
        self.untrack(&classification).await;
        self.evict_if_empty(taxon_id, &slot, &list).await;
        info!(taxon_id = %taxon_id, item = %item, position = classification.position, "classification deleted");
        Ok(classification)
    }

    async fn replace_item_taxons(&self, item: ItemRef, taxon_ids: &[TaxonId]) -> Result<Vec<Classification>> {
        self.swap_item_taxons(item, taxon_ids).await?;
        self.item_classifications(item).await
    }

    async fn replace_taxon_items(&self, taxon_id: TaxonId, items: &[ItemRef]) -> Result<Vec<Classification>> {
        let slot = self.slot(taxon_id).await;
        let mut list = slot.lock().await;
        let changes = apply(&mut list, |l| Ok(l.reorder(items, Uuid::now_v7)))?;
        for member in &changes.removed { self.untrack(&Classification::from_member(taxon_id, member)).await; }
        for member in &changes.added { self.track(&Classification::from_member(taxon_id, member)).await; }
        self.evict_if_empty(taxon_id, &slot, &list).await;
        info!(taxon_id = %taxon_id, removed = changes.removed.len(), added = changes.added.len(), "taxon items replaced");
        Ok(list.classifications())
    }

    async fn taxon_classifications(&self, taxon_id: TaxonId) -> Result<Vec<Classification>> {
        let Some(slot) = self.existing_slot(taxon_id).await else { return Ok(vec![]) };
        let list = slot.lock().await;
        Ok(list.classifications())
    }

    async fn item_classifications(&self, item: ItemRef) -> Result<Vec<Classification>> {
        let taxons = self.by_item.read().await.get(&item).cloned().unwrap_or_default();
        let mut out = Vec::with_capacity(taxons.len());
        for taxon_id in taxons {
            if let Some(c) = self.find(item, taxon_id).await? { out.push(c); }
        }
        sort_for_item(&mut out);
        Ok(out)
    }

    async fn remove_taxon(&self, taxon_id: TaxonId) -> Result<Vec<Classification>> {
        let Some(slot) = self.existing_slot(taxon_id).await else { return Ok(vec![]) };
        let mut list = slot.lock().await;
        let changes = apply(&mut list, |l| Ok(l.reorder(&[], Uuid::now_v7)))?;
        let removed: Vec<Classification> = changes.removed.iter().map(|m| Classification::from_member(taxon_id, m)).collect();
        for c in &removed { self.untrack(c).await; }
        self.evict_if_empty(taxon_id, &slot, &list).await;
        info!(taxon_id = %taxon_id, removed = removed.len(), "taxon classifications removed");
        Ok(removed)
    }

    async fn remove_item(&self, item: ItemRef) -> Result<Vec<Classification>> {
        self.swap_item_taxons(item, &[]).await
    }
}
