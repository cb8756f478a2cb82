//! Classification Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ordered_association::{Member, OrderedAssociation};
use crate::domain::value_objects::{ClassificationId, ItemRef, TaxonId};

/// The ordered list of items filed under one taxon.
pub type TaxonClassifications = OrderedAssociation<TaxonId, ItemRef>;

/// A catalog item filed under a taxon at a 1-based position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub id: ClassificationId,
    pub item: ItemRef,
    pub taxon_id: TaxonId,
    pub position: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Classification {
    pub fn from_member(taxon_id: TaxonId, member: &Member<ItemRef>) -> Self {
        Self { id: member.id, item: member.child, taxon_id, position: member.position, created_at: member.created_at, updated_at: member.updated_at }
    }

    pub fn member(&self) -> Member<ItemRef> {
        Member { id: self.id, child: self.item, position: self.position, created_at: self.created_at, updated_at: self.updated_at }
    }
}

impl TaxonClassifications {
    /// Snapshot of the list as classification records, in position order.
    pub fn classifications(&self) -> Vec<Classification> {
        let taxon_id = *self.scope();
        self.members().iter().map(|m| Classification::from_member(taxon_id, m)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_snapshot_carries_taxon_and_positions() {
        let taxon = Uuid::now_v7();
        let mut list = TaxonClassifications::new(taxon);
        let a = ItemRef::product(Uuid::now_v7());
        let b = ItemRef::greetingcard(Uuid::now_v7());
        list.insert(Uuid::now_v7(), a, None).unwrap();
        list.insert(Uuid::now_v7(), b, None).unwrap();
        let snapshot = list.classifications();
        assert_eq!(snapshot.iter().map(|c| (c.item, c.position)).collect::<Vec<_>>(), vec![(a, 1), (b, 2)]);
        assert!(snapshot.iter().all(|c| c.taxon_id == taxon));
        assert_eq!(snapshot[1].member().child, b);
    }
}
