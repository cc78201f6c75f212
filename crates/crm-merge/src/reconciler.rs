use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crm_store::{Filter, RecordStore, Row};
use crm_types::{ContactId, FieldKey};

use crate::collection::{CollectionSpec, NewItem, CONTACT_ID, DEFAULT_FLAG};
use crate::error::{MergeError, MergeResult};
use crate::locks::{LockGuard, LockRegistry};
use crate::snapshot::{load_collection, CollectionItem};

/// Which contact of the pair an item belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Primary,
    Duplicate,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::Duplicate => "duplicate",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MoveOutcome {
    /// The item now belongs to the primary.
    Reassigned { became_default: bool },
    /// The primary already had the same value; the duplicate's copy was deleted.
    Collapsed { existing: Value },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RemoveOutcome {
    /// The item promoted to default in place of the removed one.
    pub promoted: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AddOutcome {
    Linked {
        item: Value,
        /// Whether a new lookup entity (tag, city, company) was created.
        created_entity: bool,
        became_default: bool,
    },
    /// The primary already has an item with this natural key.
    AlreadyPresent { existing: Value },
}

/// Item-level actions on collection fields.
///
/// Every action re-reads the collections it touches, so callers never act on
/// stale snapshots. While an action is in flight it holds its item and every
/// `(field, contact)` collection it may change; a concurrent action on any of
/// them fails with [`MergeError::ItemBusy`].
pub struct CollectionReconciler {
    store: Arc<dyn RecordStore>,
    locks: LockRegistry<String>,
}

impl CollectionReconciler {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            locks: LockRegistry::new(),
        }
    }

    pub fn locks(&self) -> &LockRegistry<String> {
        &self.locks
    }

    /// Move a duplicate-owned item onto the primary, collapsing it into an
    /// existing item with the same natural key.
    pub async fn move_item(
        &self,
        field: FieldKey,
        item_id: &str,
        primary: &ContactId,
        duplicate: &ContactId,
    ) -> MergeResult<MoveOutcome> {
        let spec = CollectionSpec::for_field(field)?;
        let _guard = self.lock(field, item_id)?;
        let _primary_side = self.collection_lock(field, primary)?;
        let _duplicate_side = self.collection_lock(field, duplicate)?;
        let store = self.store.as_ref();

        let dup_items = load_collection(store, spec, duplicate).await?;
        let item = find(&dup_items, field, item_id)?;
        let primary_items = load_collection(store, spec, primary).await?;

        if let Some(existing) = primary_items.iter().find(|p| p.key == item.key) {
            self.delete_and_promote(spec, &dup_items, item).await?;
            info!(%field, item = item_id, existing = %existing.id, "duplicate item collapsed");
            return Ok(MoveOutcome::Collapsed {
                existing: existing.id.clone(),
            });
        }

        let primary_has_default = primary_items.iter().any(|p| p.is_default);
        let became_default =
            primary_items.is_empty() || (item.is_default && !primary_has_default);
        let mut patch = Row::new();
        patch.insert(CONTACT_ID.into(), primary.to_value());
        patch.insert(DEFAULT_FLAG.into(), Value::Bool(became_default));
        store
            .update(spec.link_table, &item_filter(spec, item), &patch)
            .await?;

        if item.is_default {
            self.promote_first(spec, &dup_items, item).await?;
        }
        info!(%field, item = item_id, became_default, "item moved to primary");
        Ok(MoveOutcome::Reassigned { became_default })
    }

    /// Move every remaining duplicate item, in item order.
    pub async fn absorb_all(
        &self,
        field: FieldKey,
        primary: &ContactId,
        duplicate: &ContactId,
    ) -> MergeResult<Vec<MoveOutcome>> {
        let spec = CollectionSpec::for_field(field)?;
        let items = load_collection(self.store.as_ref(), spec, duplicate).await?;
        let mut outcomes = Vec::with_capacity(items.len());
        for item in &items {
            outcomes.push(
                self.move_item(field, &item.id_str(), primary, duplicate)
                    .await?,
            );
        }
        Ok(outcomes)
    }

    /// Delete an item from `owner`'s collection, promoting a replacement
    /// default if the removed item was the default.
    pub async fn remove_item(
        &self,
        field: FieldKey,
        item_id: &str,
        owner: &ContactId,
    ) -> MergeResult<RemoveOutcome> {
        let spec = CollectionSpec::for_field(field)?;
        let _guard = self.lock(field, item_id)?;
        let _side = self.collection_lock(field, owner)?;
        let items = load_collection(self.store.as_ref(), spec, owner).await?;
        let item = find(&items, field, item_id)?;
        let promoted = self.delete_and_promote(spec, &items, item).await?;
        info!(%field, item = item_id, owner = %owner, promoted = ?promoted, "item removed");
        Ok(RemoveOutcome { promoted })
    }

    /// Add a value to the primary's collection.
    ///
    /// Lookup-backed fields reuse any existing entity with the same
    /// normalized name before creating one.
    pub async fn add_item(&self, new: &NewItem, primary: &ContactId) -> MergeResult<AddOutcome> {
        new.validate()?;
        let field = new.field();
        let spec = CollectionSpec::for_field(field)?;
        let lock_key = new
            .lookup_key()
            .unwrap_or_else(|| new.natural_key(None));
        let _guard = self.locks.try_acquire(format!("{field}:new:{lock_key}"))?;
        let _side = self.collection_lock(field, primary)?;
        let store = self.store.as_ref();

        let items = load_collection(store, spec, primary).await?;

        // Non-lookup keys are known up front; skip the write entirely.
        if spec.lookup.is_none() {
            let key = new.natural_key(None);
            if let Some(existing) = items.iter().find(|i| i.key == key) {
                return Ok(AddOutcome::AlreadyPresent {
                    existing: existing.id.clone(),
                });
            }
        }

        let (entity_id, created_entity) = match spec.lookup {
            Some(lookup) => {
                let wanted = new.lookup_key().unwrap_or_default();
                let all = store.select(lookup.table, &Filter::all(), &[]).await?;
                match all.iter().find(|e| new.entity_key(e) == wanted) {
                    Some(entity) => (entity.get(lookup.id_column).cloned(), false),
                    None => {
                        let row = store.insert(lookup.table, new.entity_row()).await?;
                        debug!(table = lookup.table, entity = %new, "lookup entity created");
                        (row.get(lookup.id_column).cloned(), true)
                    }
                }
            }
            None => (None, false),
        };

        let key = new.natural_key(entity_id.as_ref());
        if let Some(existing) = items.iter().find(|i| i.key == key) {
            return Ok(AddOutcome::AlreadyPresent {
                existing: existing.id.clone(),
            });
        }

        let became_default = items.is_empty();
        let mut row = new.link_row(entity_id.as_ref());
        row.insert(CONTACT_ID.into(), primary.to_value());
        row.insert(DEFAULT_FLAG.into(), Value::Bool(became_default));
        let stored = store.insert(spec.link_table, row).await?;
        let item = stored.get(spec.item_id).cloned().unwrap_or(Value::Null);
        info!(%field, item = %item, created_entity, became_default, "item added");
        Ok(AddOutcome::Linked {
            item,
            created_entity,
            became_default,
        })
    }

    fn lock(&self, field: FieldKey, item_id: &str) -> MergeResult<LockGuard<String>> {
        self.locks.try_acquire(format!("{field}:{item_id}"))
    }

    /// Guards the default flag of one contact's collection.
    fn collection_lock(&self, field: FieldKey, owner: &ContactId) -> MergeResult<LockGuard<String>> {
        self.locks.try_acquire(format!("{field}@{owner}"))
    }

    async fn delete_and_promote(
        &self,
        spec: &CollectionSpec,
        items: &[CollectionItem],
        item: &CollectionItem,
    ) -> MergeResult<Option<Value>> {
        self.store
            .delete(spec.link_table, &item_filter(spec, item))
            .await?;
        if item.is_default {
            return self.promote_first(spec, items, item).await;
        }
        Ok(None)
    }

    /// Mark the first item other than `gone` as default.
    async fn promote_first(
        &self,
        spec: &CollectionSpec,
        items: &[CollectionItem],
        gone: &CollectionItem,
    ) -> MergeResult<Option<Value>> {
        let Some(next) = items.iter().find(|i| i.id != gone.id) else {
            return Ok(None);
        };
        let mut patch = Row::new();
        patch.insert(DEFAULT_FLAG.into(), Value::Bool(true));
        self.store
            .update(spec.link_table, &item_filter(spec, next), &patch)
            .await?;
        debug!(table = spec.link_table, item = %next.id, "default promoted");
        Ok(Some(next.id.clone()))
    }
}

impl fmt::Debug for CollectionReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionReconciler")
            .field("locks", &self.locks)
            .finish()
    }
}

fn find<'a>(
    items: &'a [CollectionItem],
    field: FieldKey,
    item_id: &str,
) -> MergeResult<&'a CollectionItem> {
    items
        .iter()
        .find(|i| i.has_id(item_id))
        .ok_or_else(|| MergeError::not_found("item", format!("{field}:{item_id}")))
}

fn item_filter(spec: &CollectionSpec, item: &CollectionItem) -> Filter {
    Filter::eq(spec.item_id, item.id.clone())
}
