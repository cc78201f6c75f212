use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crm_store::{Filter, RecordStore, Row};
use crm_types::{ContactId, FieldKey, ScalarValue};

use crate::collection::{value_key, CollectionSpec, CONTACTS_TABLE, CONTACT_ID, DEFAULT_FLAG};
use crate::error::{MergeError, MergeResult};

/// One row of a collection link table, as seen by the reconciler.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CollectionItem {
    /// Value of the link table's item id column.
    pub id: Value,
    /// Normalized natural key.
    pub key: String,
    pub is_default: bool,
    pub display: String,
    /// The raw link row, including embedded joins.
    pub row: Row,
}

impl CollectionItem {
    fn from_row(spec: &CollectionSpec, row: Row) -> Self {
        Self {
            id: row.get(spec.item_id).cloned().unwrap_or(Value::Null),
            key: spec.natural_key(&row),
            is_default: row.get(DEFAULT_FLAG).and_then(Value::as_bool).unwrap_or(false),
            display: spec.display(&row),
            row,
        }
    }

    /// The item id as an operator would type it.
    pub fn id_str(&self) -> String {
        value_key(Some(&self.id))
    }

    pub fn has_id(&self, id: &str) -> bool {
        self.id_str() == id
    }
}

/// Numeric ids sort numerically and before string ids.
fn compare_ids(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => value_key(Some(a)).cmp(&value_key(Some(b))),
    }
}

/// Read one contact's items for `spec`, ordered by item id.
pub async fn load_collection(
    store: &dyn RecordStore,
    spec: &CollectionSpec,
    owner: &ContactId,
) -> MergeResult<Vec<CollectionItem>> {
    let rows = store
        .select(
            spec.link_table,
            &Filter::eq(CONTACT_ID, owner.to_value()),
            &spec.joins(),
        )
        .await?;
    let mut items: Vec<CollectionItem> = rows
        .into_iter()
        .map(|row| CollectionItem::from_row(spec, row))
        .collect();
    items.sort_by(|a, b| compare_ids(&a.id, &b.id));
    Ok(items)
}

/// A contact row together with every collection field.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ContactSnapshot {
    pub id: ContactId,
    pub row: Row,
    pub collections: BTreeMap<FieldKey, Vec<CollectionItem>>,
}

impl ContactSnapshot {
    /// Load a contact and all its collections.
    pub async fn load(store: &dyn RecordStore, id: &ContactId) -> MergeResult<Self> {
        let row = load_contact_row(store, id).await?;
        let mut collections = BTreeMap::new();
        for spec in CollectionSpec::all() {
            collections.insert(spec.field, load_collection(store, spec, id).await?);
        }
        Ok(Self {
            id: id.clone(),
            row,
            collections,
        })
    }

    /// Re-read the contact row only.
    pub async fn refresh_row(&mut self, store: &dyn RecordStore) -> MergeResult<()> {
        self.row = load_contact_row(store, &self.id).await?;
        Ok(())
    }

    pub fn scalar(&self, field: FieldKey) -> MergeResult<ScalarValue> {
        Ok(ScalarValue::from_row(field, &self.row)?)
    }

    pub fn items(&self, field: FieldKey) -> &[CollectionItem] {
        self.collections
            .get(&field)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn item(&self, field: FieldKey, id: &str) -> Option<&CollectionItem> {
        self.items(field).iter().find(|i| i.has_id(id))
    }

    pub fn default_item(&self, field: FieldKey) -> Option<&CollectionItem> {
        self.items(field).iter().find(|i| i.is_default)
    }

    /// Natural keys of a collection, in item order.
    pub fn keys(&self, field: FieldKey) -> Vec<&str> {
        self.items(field).iter().map(|i| i.key.as_str()).collect()
    }

    /// Whether the value for `field` is blank (for collections: no items).
    ///
    /// A stored value that cannot be read is present, not blank.
    pub fn is_blank(&self, field: FieldKey) -> bool {
        if field.is_collection() {
            return self.items(field).is_empty();
        }
        self.scalar(field).map(|v| v.is_empty()).unwrap_or(false)
    }
}

async fn load_contact_row(store: &dyn RecordStore, id: &ContactId) -> MergeResult<Row> {
    store
        .select_one(CONTACTS_TABLE, &Filter::eq(CONTACT_ID, id.to_value()), &[])
        .await?
        .ok_or_else(|| MergeError::not_found("contact", id.as_str()))
}
