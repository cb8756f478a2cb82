//! PostgreSQL classification store.
//!
//! Every mutation runs in its own transaction and first takes a
//! transaction-scoped advisory lock keyed by the taxon id, so writers on the
//! same taxon queue up while other taxons proceed. The taxon's rows are then
//! loaded into the same ordered association the in-memory store uses, mutated,
//! and written back as a diff. A final read checks the stored positions are
//! dense; any error drops the transaction and rolls everything back.
//!
//! Replacing an item's taxons also takes an item-keyed advisory lock before it
//! reads which taxons the item is filed under. Item locks live in the
//! two-key advisory space, taxon locks in the single bigint space.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use tracing::{error, info};
use uuid::Uuid;

use super::{apply, sort_for_item, ClassificationStore};
use crate::config::Config;
use crate::domain::aggregates::{Member, TaxonClassifications};
use crate::domain::{Classification, ClassificationId, ItemKind, ItemRef, TaxonId};
use crate::error::{ClassificationError, Result};

const COLUMNS: &str = "id, item_kind, item_id, taxon_id, position, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct ClassificationRow {
    id: Uuid,
    item_kind: String,
    item_id: Uuid,
    taxon_id: Uuid,
    position: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ClassificationRow> for Classification {
    type Error = ClassificationError;
    fn try_from(row: ClassificationRow) -> Result<Self> {
        let kind = row.item_kind.parse::<ItemKind>().map_err(|e| ClassificationError::Storage(sqlx::Error::Decode(Box::new(e))))?;
        Ok(Self {
            id: row.id,
            item: ItemRef::new(kind, row.item_id),
            taxon_id: row.taxon_id,
            position: row.position.max(0) as u32,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_classifications(rows: Vec<ClassificationRow>) -> Result<Vec<Classification>> {
    rows.into_iter().map(Classification::try_from).collect()
}

/// Reports a unique-key hit on insert as the duplicate it is.
fn unique_violation(err: sqlx::Error, item: ItemRef, taxon_id: TaxonId) -> ClassificationError {
    let duplicate = err.as_database_error().and_then(|e| e.code()).is_some_and(|code| code == "23505");
    if duplicate { ClassificationError::ConstraintViolation { item, taxon_id } } else { ClassificationError::Storage(err) }
}

#[derive(Clone)]
pub struct PgClassificationStore {
    pool: PgPool,
}

impl PgClassificationStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn connect(database_url: &str, config: &Config) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(config.max_connections).connect(database_url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool { &self.pool }

    /// Files `item` under exactly `taxon_ids` in one transaction, returning
    /// what was removed.
    async fn swap_item_taxons(&self, item: ItemRef, taxon_ids: &[TaxonId]) -> Result<Vec<Classification>> {
        let wanted: BTreeSet<TaxonId> = taxon_ids.iter().copied().collect();
        let mut tx = self.pool.begin().await?;
        lock_item(&mut tx, item).await?;
        let current: Vec<Uuid> = sqlx::query_scalar("SELECT taxon_id FROM classifications WHERE item_kind = $1 AND item_id = $2")
            .bind(item.kind.as_str())
            .bind(item.id)
            .fetch_all(&mut *tx)
            .await?;

        // BTreeSet order keeps advisory locks ascending across concurrent callers.
        let touched: BTreeSet<TaxonId> = current.into_iter().chain(wanted.iter().copied()).collect();
        let mut removed = vec![];
        for taxon_id in touched {
            let keep = wanted.contains(&taxon_id);
            let dropped = mutate(&mut tx, taxon_id, |l| {
                match (keep, l.find_child(&item).map(|m| m.id)) {
                    (true, None) => {
                        let id = Uuid::now_v7();
                        l.insert(id, item, None).map_err(|e| ClassificationError::from_association(e, item, taxon_id, id))?;
                        Ok(None)
                    }
                    (false, Some(id)) => l.remove(id).map(Some).map_err(|e| ClassificationError::from_association(e, item, taxon_id, id)),
                    _ => Ok(None),
                }
            })
            .await?;
            removed.extend(dropped.map(|m| Classification::from_member(taxon_id, &m)));
        }
        tx.commit().await?;
        info!(item = %item, taxons = wanted.len(), removed = removed.len(), "item taxons replaced");
        Ok(removed)
    }

    async fn taxon_of(&self, id: ClassificationId) -> Result<TaxonId> {
        sqlx::query_scalar::<_, Uuid>("SELECT taxon_id FROM classifications WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ClassificationError::classification_not_found(id))
    }
}

async fn lock_taxon(conn: &mut PgConnection, taxon_id: TaxonId) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::uuid::text, 0))")
        .bind(taxon_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn lock_item(conn: &mut PgConnection, item: ItemRef) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext('classification_item'), hashtext($1))")
        .bind(item.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn load(conn: &mut PgConnection, taxon_id: TaxonId) -> Result<TaxonClassifications> {
    let rows = sqlx::query_as::<_, ClassificationRow>(&format!("SELECT {COLUMNS} FROM classifications WHERE taxon_id = $1 ORDER BY position, id"))
        .bind(taxon_id)
        .fetch_all(&mut *conn)
        .await?;
    let members = into_classifications(rows)?.iter().map(Classification::member).collect();
    Ok(TaxonClassifications::from_members(taxon_id, members))
}

/// Writes the difference between two snapshots of one taxon.
async fn persist(conn: &mut PgConnection, before: &TaxonClassifications, after: &TaxonClassifications) -> Result<()> {
    let taxon_id = *after.scope();
    let old: HashMap<ClassificationId, &Member<ItemRef>> = before.members().iter().map(|m| (m.id, m)).collect();
    let kept: BTreeSet<ClassificationId> = after.members().iter().map(|m| m.id).collect();

    let removed: Vec<Uuid> = old.keys().filter(|id| !kept.contains(id)).copied().collect();
    if !removed.is_empty() {
        sqlx::query("DELETE FROM classifications WHERE id = ANY($1)").bind(&removed).execute(&mut *conn).await?;
    }

    let (mut moved_ids, mut moved_positions, mut moved_at) = (Vec::<Uuid>::new(), Vec::<i32>::new(), Vec::<DateTime<Utc>>::new());
    for m in after.members() {
        match old.get(&m.id) {
            Some(prev) if prev.position != m.position => {
                moved_ids.push(m.id);
                moved_positions.push(m.position as i32);
                moved_at.push(m.updated_at);
            }
            Some(_) => {}
            None => {
                sqlx::query("INSERT INTO classifications (id, item_kind, item_id, taxon_id, position, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7)")
                    .bind(m.id).bind(m.child.kind.as_str()).bind(m.child.id).bind(taxon_id).bind(m.position as i32)
                    .bind(m.created_at).bind(m.updated_at)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| unique_violation(e, m.child, taxon_id))?;
            }
        }
    }
    if !moved_ids.is_empty() {
        sqlx::query(
            "UPDATE classifications AS c SET position = moved.position, updated_at = moved.updated_at \
             FROM UNNEST($1::uuid[], $2::int4[], $3::timestamptz[]) AS moved(id, position, updated_at) WHERE c.id = moved.id",
        )
        .bind(&moved_ids)
        .bind(&moved_positions)
        .bind(&moved_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn verify(conn: &mut PgConnection, taxon_id: TaxonId) -> Result<()> {
    let positions: Vec<i32> = sqlx::query_scalar("SELECT position FROM classifications WHERE taxon_id = $1 ORDER BY position")
        .bind(taxon_id)
        .fetch_all(&mut *conn)
        .await?;
    if positions.iter().enumerate().all(|(idx, p)| *p == idx as i32 + 1) { return Ok(()); }
    let positions: Vec<u32> = positions.into_iter().map(|p| p.max(0) as u32).collect();
    error!(taxon_id = %taxon_id, ?positions, "stored classification positions are not dense");
    Err(ClassificationError::InvariantFailure { taxon_id, positions })
}

/// Lock, load, change, write back, verify. The caller owns the transaction.
async fn mutate<T, F>(conn: &mut PgConnection, taxon_id: TaxonId, f: F) -> Result<T>
where
    T: Send,
    F: FnOnce(&mut TaxonClassifications) -> Result<T> + Send,
{
    lock_taxon(conn, taxon_id).await?;
    let before = load(conn, taxon_id).await?;
    let mut after = before.clone();
    let out = apply(&mut after, f)?;
    persist(conn, &before, &after).await?;
    verify(conn, taxon_id).await?;
    Ok(out)
}

#[async_trait]
impl ClassificationStore for PgClassificationStore {
    async fn create(&self, item: ItemRef, taxon_id: TaxonId, position: Option<u32>) -> Result<Classification> {
        let mut tx = self.pool.begin().await?;
        let id = Uuid::now_v7();
        let member = mutate(&mut tx, taxon_id, |l| l.insert(id, item, position).map_err(|e| ClassificationError::from_association(e, item, taxon_id, id))).await?;
        tx.commit().await?;
        info!(taxon_id = %taxon_id, item = %item, position = member.position, "classification created");
        Ok(Classification::from_member(taxon_id, &member))
    }

    async fn get(&self, id: ClassificationId) -> Result<Classification> {
        let row = sqlx::query_as::<_, ClassificationRow>(&format!("SELECT {COLUMNS} FROM classifications WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ClassificationError::classification_not_found(id))?;
        row.try_into()
    }

    async fn find(&self, item: ItemRef, taxon_id: TaxonId) -> Result<Option<Classification>> {
        let row = sqlx::query_as::<_, ClassificationRow>(&format!("SELECT {COLUMNS} FROM classifications WHERE item_kind = $1 AND item_id = $2 AND taxon_id = $3"))
            .bind(item.kind.as_str())
            .bind(item.id)
            .bind(taxon_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Classification::try_from).transpose()
    }

    async fn reposition(&self, id: ClassificationId, new_position: u32) -> Result<Classification> {
        let taxon_id = self.taxon_of(id).await?;
        let mut tx = self.pool.begin().await?;
        let moved = mutate(&mut tx, taxon_id, |l| {
            let item = l.get(id).map(|m| m.child).ok_or_else(|| ClassificationError::classification_not_found(id))?;
            l.move_to(id, new_position).map_err(|e| ClassificationError::from_association(e, item, taxon_id, id))?;
            l.get(id).map(|m| Classification::from_member(taxon_id, m)).ok_or_else(|| ClassificationError::classification_not_found(id))
        })
        .await?;
        tx.commit().await?;
        Ok(moved)
    }

    async fn delete(&self, id: ClassificationId) -> Result<Classification> {
        let taxon_id = self.taxon_of(id).await?;
        let mut tx = self.pool.begin().await?;
        let member = mutate(&mut tx, taxon_id, |l| l.remove(id).map_err(|_| ClassificationError::classification_not_found(id))).await?;
        tx.commit().await?;
        info!(taxon_id = %taxon_id, item = %member.child, position = member.position, "classification deleted");
        Ok(Classification::from_member(taxon_id, &member))
    }

    async fn replace_item_taxons(&self, item: ItemRef, taxon_ids: &[TaxonId]) -> Result<Vec<Classification>> {
        self.swap_item_taxons(item, taxon_ids).await?;
        self.item_classifications(item).await
    }

    async fn replace_taxon_items(&self, taxon_id: TaxonId, items: &[ItemRef]) -> Result<Vec<Classification>> {
        let mut tx = self.pool.begin().await?;
        let changes = mutate(&mut tx, taxon_id, |l| Ok(l.reorder(items, Uuid::now_v7))).await?;
        tx.commit().await?;
        info!(taxon_id = %taxon_id, removed = changes.removed.len(), added = changes.added.len(), "taxon items replaced");
        self.taxon_classifications(taxon_id).await
    }

    async fn taxon_classifications(&self, taxon_id: TaxonId) -> Result<Vec<Classification>> {
        let rows = sqlx::query_as::<_, ClassificationRow>(&format!("SELECT {COLUMNS} FROM classifications WHERE taxon_id = $1 ORDER BY position"))
            .bind(taxon_id)
            .fetch_all(&self.pool)
            .await?;
        into_classifications(rows)
    }

    async fn item_classifications(&self, item: ItemRef) -> Result<Vec<Classification>> {
        let rows = sqlx::query_as::<_, ClassificationRow>(&format!("SELECT {COLUMNS} FROM classifications WHERE item_kind = $1 AND item_id = $2"))
            .bind(item.kind.as_str())
            .bind(item.id)
            .fetch_all(&self.pool)
            .await?;
        let mut out = into_classifications(rows)?;
        sort_for_item(&mut out);
        Ok(out)
    }

    async fn remove_taxon(&self, taxon_id: TaxonId) -> Result<Vec<Classification>> {
        let mut tx = self.pool.begin().await?;
        let changes = mutate(&mut tx, taxon_id, |l| Ok(l.reorder(&[], Uuid::now_v7))).await?;
        tx.commit().await?;
        info!(taxon_id = %taxon_id, removed = changes.removed.len(), "taxon classifications removed");
        Ok(changes.removed.iter().map(|m| Classification::from_member(taxon_id, m)).collect())
    }

    async fn remove_item(&self, item: ItemRef) -> Result<Vec<Classification>> {
        self.swap_item_taxons(item, &[]).await
    }
}
