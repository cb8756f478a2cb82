//! Domain events
use serde::Serialize;

use crate::domain::aggregates::Classification;
use crate::domain::value_objects::{ItemRef, TaxonId};

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClassificationEvent {
    Created { classification: Classification },
    Repositioned { classification: Classification, from: u32 },
    Removed { classification: Classification },
    TaxonItemsReplaced { taxon_id: TaxonId, items: Vec<ItemRef> },
    ItemTaxonsReplaced { item: ItemRef, taxon_ids: Vec<TaxonId> },
}

impl ClassificationEvent {
    /// NATS subject the event is published on.
    pub fn subject(&self) -> String {
        let name = match self {
            Self::Created { .. } => "created",
            Self::Repositioned { .. } => "repositioned",
            Self::Removed { .. } => "removed",
            Self::TaxonItemsReplaced { .. } => "taxon_items_replaced",
            Self::ItemTaxonsReplaced { .. } => "item_taxons_replaced",
        };
        format!("catalog.classifications.{name}")
    }
}
