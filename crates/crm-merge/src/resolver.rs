//! Scalar field resolution.
//!
//! A scalar choice becomes at most one patch of the primary contact row:
//! `keep-primary` writes nothing, `keep-duplicate` copies the duplicate's
//! value, and `edit-custom` writes a validated literal. The composite name
//! field always writes both name columns in the same patch.

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crm_store::{Filter, RecordStore, Row};
use crm_types::{Choice, FieldKey};

use crate::collection::{CONTACTS_TABLE, CONTACT_ID, MODIFIED_AT};
use crate::error::{MergeError, MergeResult};
use crate::snapshot::ContactSnapshot;

/// The patch a scalar choice would write onto the primary, if any.
///
/// Fails without side effects when the choice does not fit the field or a
/// custom value is invalid.
pub fn scalar_patch(
    field: FieldKey,
    choice: &Choice,
    duplicate: &ContactSnapshot,
) -> MergeResult<Option<Row>> {
    if field.is_collection() {
        return Err(MergeError::Validation(format!(
            "{field} is a collection field"
        )));
    }
    match choice {
        Choice::KeepPrimary => Ok(None),
        Choice::KeepDuplicate => Ok(Some(duplicate.scalar(field)?.to_patch(field))),
        Choice::EditCustom(value) => {
            value.validate(field)?;
            Ok(Some(value.to_patch(field)))
        }
        Choice::Combine => Err(MergeError::Validation(format!(
            "{choice} does not apply to scalar field {field}"
        ))),
    }
}

/// Write `patch` onto the primary contact and refresh the snapshot's row.
pub async fn apply_patch(
    store: &dyn RecordStore,
    primary: &mut ContactSnapshot,
    patch: &Row,
) -> MergeResult<()> {
    let mut patch = patch.clone();
    patch.insert(MODIFIED_AT.into(), Value::from(Utc::now().to_rfc3339()));
    let filter = Filter::eq(CONTACT_ID, primary.id.to_value());
    let affected = store.update(CONTACTS_TABLE, &filter, &patch).await?;
    if affected == 0 {
        return Err(MergeError::not_found("contact", primary.id.as_str()));
    }
    primary.refresh_row(store).await?;
    debug!(contact = %primary.id, columns = patch.len(), "primary contact patched");
    Ok(())
}

/// Resolve one scalar field immediately. Returns whether a write happened.
pub async fn resolve_scalar(
    store: &dyn RecordStore,
    field: FieldKey,
    choice: &Choice,
    primary: &mut ContactSnapshot,
    duplicate: &ContactSnapshot,
) -> MergeResult<bool> {
    match scalar_patch(field, choice, duplicate)? {
        Some(patch) => {
            apply_patch(store, primary, &patch).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}
