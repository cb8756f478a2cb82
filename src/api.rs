//! HTTP surface for classification ordering.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, put},
    Json, Router,
};
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;
use validator::Validate;

use crate::domain::{Classification, ClassificationEvent, ItemKind, ItemRef, TaxonId};
use crate::error::{ClassificationError, Result};
use crate::store::ClassificationStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ClassificationStore>,
    pub nats: Option<async_nats::Client>,
}

impl AppState {
    pub fn new(store: Arc<dyn ClassificationStore>) -> Self { Self { store, nats: None } }

    /// Fire-and-forget: a failed publish is logged, never surfaced.
    async fn publish(&self, event: ClassificationEvent) {
        let Some(nats) = &self.nats else { return };
        let subject = event.subject();
        match serde_json::to_vec(&event) {
            Ok(payload) => {
                if let Err(e) = nats.publish(subject.clone(), payload.into()).await {
                    warn!(subject = %subject, error = %e, "failed to publish classification event");
                }
            }
            Err(e) => warn!(subject = %subject, error = %e, "failed to encode classification event"),
        }
    }
}

impl IntoResponse for ClassificationError {
    fn into_response(self) -> Response {
        let status = match &self {
            ClassificationError::ConstraintViolation { .. } | ClassificationError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ClassificationError::NotFound(_) => StatusCode::NOT_FOUND,
            ClassificationError::InvariantFailure { .. } | ClassificationError::Storage(_) => {
                error!(error = %self, "classification request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "opensase-classifications"})) }))
        .route("/api/v1/classifications", put(update_classification).post(create_classification))
        .route("/api/v1/classifications/:id", get(get_classification).delete(delete_classification))
        .route("/api/v1/taxons/:id", delete(remove_taxon))
        .route("/api/v1/taxons/:id/items", get(taxon_items).put(replace_taxon_items))
        .route("/api/v1/items/:kind/:id", delete(remove_item))
        .route("/api/v1/items/:kind/:id/taxons", get(item_taxons).put(replace_item_taxons))
        .with_state(state)
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateClassificationRequest {
    pub item_kind: ItemKind,
    pub item_id: Uuid,
    pub taxon_id: TaxonId,
    #[validate(range(min = 0))]
    pub position: i64,
}

async fn update_classification(State(s): State<AppState>, Json(r): Json<UpdateClassificationRequest>) -> Result<StatusCode> {
    r.validate()?;
    let item = ItemRef::new(r.item_kind, r.item_id);
    let current = s.store.find(item, r.taxon_id).await?.ok_or_else(|| ClassificationError::not_in_taxon(item, r.taxon_id))?;
    // The sortable list posts 0-indexed positions; storage is 1-indexed.
    let position = u32::try_from(r.position).unwrap_or(u32::MAX);
    let moved = s.store.reposition_external(current.id, position).await?;
    if moved.position != current.position {
        s.publish(ClassificationEvent::Repositioned { classification: moved, from: current.position }).await;
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateClassificationRequest {
    pub item_kind: ItemKind,
    pub item_id: Uuid,
    pub taxon_id: TaxonId,
    #[validate(range(min = 1))]
    pub position: Option<u32>,
}

async fn create_classification(State(s): State<AppState>, Json(r): Json<CreateClassificationRequest>) -> Result<(StatusCode, Json<Classification>)> {
    r.validate()?;
    let c = s.store.create(ItemRef::new(r.item_kind, r.item_id), r.taxon_id, r.position).await?;
    s.publish(ClassificationEvent::Created { classification: c.clone() }).await;
    Ok((StatusCode::CREATED, Json(c)))
}

async fn get_classification(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Classification>> {
    s.store.get(id).await.map(Json)
}

async fn delete_classification(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode> {
    let removed = s.store.delete(id).await?;
    s.publish(ClassificationEvent::Removed { classification: removed }).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn taxon_items(State(s): State<AppState>, Path(taxon_id): Path<TaxonId>) -> Result<Json<Vec<Classification>>> {
    s.store.taxon_classifications(taxon_id).await.map(Json)
}

#[derive(Debug, Deserialize)]
pub struct ReplaceTaxonItemsRequest { pub items: Vec<ItemRef> }

async fn replace_taxon_items(State(s): State<AppState>, Path(taxon_id): Path<TaxonId>, Json(r): Json<ReplaceTaxonItemsRequest>) -> Result<Json<Vec<Classification>>> {
    let after = s.store.replace_taxon_items(taxon_id, &r.items).await?;
    s.publish(ClassificationEvent::TaxonItemsReplaced { taxon_id, items: after.iter().map(|c| c.item).collect() }).await;
    Ok(Json(after))
}

async fn remove_taxon(State(s): State<AppState>, Path(taxon_id): Path<TaxonId>) -> Result<StatusCode> {
    for classification in s.store.remove_taxon(taxon_id).await? {
        s.publish(ClassificationEvent::Removed { classification }).await;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn item_taxons(State(s): State<AppState>, Path((kind, id)): Path<(ItemKind, Uuid)>) -> Result<Json<Vec<Classification>>> {
    s.store.item_classifications(ItemRef::new(kind, id)).await.map(Json)
}

#[derive(Debug, Deserialize)]
pub struct ReplaceItemTaxonsRequest { pub taxon_ids: Vec<TaxonId> }

async fn replace_item_taxons(State(s): State<AppState>, Path((kind, id)): Path<(ItemKind, Uuid)>, Json(r): Json<ReplaceItemTaxonsRequest>) -> Result<Json<Vec<Classification>>> {
    let item = ItemRef::new(kind, id);
    let after = s.store.replace_item_taxons(item, &r.taxon_ids).await?;
    s.publish(ClassificationEvent::ItemTaxonsReplaced { item, taxon_ids: after.iter().map(|c| c.taxon_id).collect() }).await;
    Ok(Json(after))
}

async fn remove_item(State(s): State<AppState>, Path((kind, id)): Path<(ItemKind, Uuid)>) -> Result<StatusCode> {
    for classification in s.store.remove_item(ItemRef::new(kind, id)).await? {
        s.publish(ClassificationEvent::Removed { classification }).await;
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryClassificationStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct TestApp { app: Router, store: Arc<InMemoryClassificationStore> }

    impl TestApp {
        fn new() -> Self {
            let store = Arc::new(InMemoryClassificationStore::new());
            Self { app: router(AppState::new(store.clone())), store }
        }

        async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
            let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);
            let req = Request::builder().method(method).uri(uri).header("content-type", "application/json").body(body).unwrap();
            let res = self.app.clone().oneshot(req).await.unwrap();
            let status = res.status();
            (status, to_bytes(res.into_body(), usize::MAX).await.unwrap().to_vec())
        }

        async fn order(&self, taxon: TaxonId) -> Vec<ItemRef> {
            self.store.taxon_classifications(taxon).await.unwrap().into_iter().map(|c| c.item).collect()
        }
    }

    fn cards(n: usize) -> Vec<ItemRef> { (0..n).map(|_| ItemRef::greetingcard(Uuid::now_v7())).collect() }

    #[tokio::test]
    async fn test_update_uses_zero_indexed_position_and_returns_no_content() {
        let t = TestApp::new();
        let taxon = Uuid::now_v7();
        let all = cards(5);
        t.store.replace_taxon_items(taxon, &all).await.unwrap();

        let body = json!({"item_kind": "greetingcard", "item_id": all[4].id, "taxon_id": taxon, "position": 1});
        let (status, bytes) = t.send("PUT", "/api/v1/classifications", Some(body)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(bytes.is_empty());
        assert_eq!(t.order(taxon).await, vec![all[0], all[4], all[1], all[2], all[3]]);

        let body = json!({"item_kind": "greetingcard", "item_id": all[0].id, "taxon_id": taxon, "position": 99});
        assert_eq!(t.send("PUT", "/api/v1/classifications", Some(body)).await.0, StatusCode::NO_CONTENT);
        assert_eq!(t.order(taxon).await.last(), Some(&all[0]));
    }

    #[tokio::test]
    async fn test_update_rejects_unknown_pair_and_negative_position() {
        let t = TestApp::new();
        let taxon = Uuid::now_v7();
        let all = cards(2);
        t.store.replace_taxon_items(taxon, &all).await.unwrap();

        let stranger = json!({"item_kind": "product", "item_id": all[0].id, "taxon_id": taxon, "position": 0});
        assert_eq!(t.send("PUT", "/api/v1/classifications", Some(stranger)).await.0, StatusCode::NOT_FOUND);

        let negative = json!({"item_kind": "greetingcard", "item_id": all[1].id, "taxon_id": taxon, "position": -1});
        assert_eq!(t.send("PUT", "/api/v1/classifications", Some(negative)).await.0, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(t.order(taxon).await, all);
    }

    #[tokio::test]
    async fn test_create_then_duplicate() {
        let t = TestApp::new();
        let taxon = Uuid::now_v7();
        t.store.replace_taxon_items(taxon, &cards(3)).await.unwrap();
        let item_id = Uuid::now_v7();
        let body = json!({"item_kind": "product", "item_id": item_id, "taxon_id": taxon});

        let (status, bytes) = t.send("POST", "/api/v1/classifications", Some(body.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let created: Classification = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(created.position, 4);

        assert_eq!(t.send("POST", "/api/v1/classifications", Some(body)).await.0, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(t.order(taxon).await.len(), 4);

        let (status, bytes) = t.send("GET", &format!("/api/v1/classifications/{}", created.id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_slice::<Classification>(&bytes).unwrap(), created);
    }

    #[tokio::test]
    async fn test_delete_classification_renumbers() {
        let t = TestApp::new();
        let taxon = Uuid::now_v7();
        let all = cards(3);
        let before = t.store.replace_taxon_items(taxon, &all).await.unwrap();

        let (status, _) = t.send("DELETE", &format!("/api/v1/classifications/{}", before[0].id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let after = t.store.taxon_classifications(taxon).await.unwrap();
        assert_eq!(after.iter().map(|c| (c.item, c.position)).collect::<Vec<_>>(), vec![(all[1], 1), (all[2], 2)]);
        assert_eq!(t.send("DELETE", &format!("/api/v1/classifications/{}", before[0].id), None).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_replace_and_read_taxon_items() {
        let t = TestApp::new();
        let taxon = Uuid::now_v7();
        let all = cards(3);
        let items: Vec<Value> = all.iter().rev().map(|i| json!({"kind": "greetingcard", "id": i.id})).collect();

        let (status, _) = t.send("PUT", &format!("/api/v1/taxons/{taxon}/items"), Some(json!({"items": items}))).await;
        assert_eq!(status, StatusCode::OK);
        let (_, bytes) = t.send("GET", &format!("/api/v1/taxons/{taxon}/items"), None).await;
        let listed: Vec<Classification> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(listed.iter().map(|c| c.item).collect::<Vec<_>>(), vec![all[2], all[1], all[0]]);
        assert_eq!(listed.iter().map(|c| c.position).collect::<Vec<_>>(), vec![1, 2, 3]);

        assert_eq!(t.send("DELETE", &format!("/api/v1/taxons/{taxon}"), None).await.0, StatusCode::NO_CONTENT);
        assert!(t.order(taxon).await.is_empty());
    }

    #[tokio::test]
    async fn test_item_taxons_endpoints() {
        let t = TestApp::new();
        let (t1, t2) = (Uuid::now_v7(), Uuid::now_v7());
        let others = cards(2);
        t.store.replace_taxon_items(t1, &others).await.unwrap();
        let card = ItemRef::greetingcard(Uuid::now_v7());
        let path = format!("/api/v1/items/greetingcard/{}/taxons", card.id);

        let (status, bytes) = t.send("PUT", &path, Some(json!({"taxon_ids": [t1, t2]}))).await;
        assert_eq!(status, StatusCode::OK);
        let after: Vec<Classification> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(after.iter().map(|c| (c.taxon_id, c.position)).collect::<Vec<_>>(), vec![(t2, 1), (t1, 3)]);

        let (_, bytes) = t.send("GET", &path, None).await;
        assert_eq!(serde_json::from_slice::<Vec<Classification>>(&bytes).unwrap(), after);

        let (status, _) = t.send("DELETE", &format!("/api/v1/items/greetingcard/{}", card.id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(t.order(t1).await, others);
        assert!(t.order(t2).await.is_empty());
    }

    #[tokio::test]
    async fn test_health() {
        let t = TestApp::new();
        let (status, bytes) = t.send("GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_slice::<Value>(&bytes).unwrap()["status"], "healthy");
    }
}
