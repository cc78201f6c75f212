use tracing::debug;

use crm_store::{Filter, RecordStore};
use crm_types::{ContactId, FieldKey};

use crate::collection::{CollectionSpec, CONTACT_ID, KEEP_IN_TOUCH_TABLE};
use crate::error::MergeResult;

/// Delete every item of `field` still owned by the duplicate.
pub async fn cleanup_collection(
    store: &dyn RecordStore,
    field: FieldKey,
    duplicate: &ContactId,
) -> MergeResult<u64> {
    let spec = CollectionSpec::for_field(field)?;
    let removed = store
        .delete(spec.link_table, &Filter::eq(CONTACT_ID, duplicate.to_value()))
        .await?;
    debug!(%field, duplicate = %duplicate, removed, "duplicate collection cleaned");
    Ok(removed)
}

/// Delete the duplicate's keep-in-touch detail rows.
pub async fn cleanup_keep_in_touch(store: &dyn RecordStore, duplicate: &ContactId) -> MergeResult<u64> {
    let removed = store
        .delete(KEEP_IN_TOUCH_TABLE, &Filter::eq(CONTACT_ID, duplicate.to_value()))
        .await?;
    debug!(duplicate = %duplicate, removed, "duplicate keep-in-touch cleaned");
    Ok(removed)
}

/// Cleanup owed when the wizard leaves `field`, if any.
///
/// Returns `None` for fields that leave nothing behind on the duplicate.
pub async fn cleanup_after(
    store: &dyn RecordStore,
    field: FieldKey,
    duplicate: &ContactId,
) -> MergeResult<Option<u64>> {
    if field.is_collection() {
        return cleanup_collection(store, field, duplicate).await.map(Some);
    }
    if field == FieldKey::KeepInTouchFrequency {
        return cleanup_keep_in_touch(store, duplicate).await.map(Some);
    }
    Ok(None)
}
