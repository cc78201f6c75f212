//! Finalization: the only irreversible step of a merge.
//!
//! Order of operations:
//!
//! 1. Apply staged scalar patches to the primary (staged mode only). A
//!    failure here aborts before anything else is touched.
//! 2. Run the dependent-table batch concurrently; every failure is reported
//!    once on the status channel and the batch carries on.
//! 3. Delete the duplicate contact. The merge is complete iff this succeeds.
//!    Deleting an id that is already gone affects zero rows and still
//!    counts, so finalization can be re-run safely.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crm_store::{Filter, RecordStore, Row};
use crm_types::{ContactId, FieldKey};

use crate::collection::{CONTACTS_TABLE, CONTACT_ID};
use crate::error::MergeResult;
use crate::registry::DependentRegistry;
use crate::resolver::apply_patch;
use crate::snapshot::ContactSnapshot;
use crate::status::StatusChannel;
use crate::transfer::{run_batch, BatchReport, TransferStatus};

/// What happened to the duplicate contact row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DeletionResult {
    Deleted { rows: u64 },
    Failed { reason: String },
}

#[derive(Clone, Debug, Serialize)]
pub struct FinalizationReport {
    pub primary: ContactId,
    pub duplicate: ContactId,
    /// Scalar fields written from the staging area.
    pub staged_fields: Vec<FieldKey>,
    pub batch: BatchReport,
    pub deletion: DeletionResult,
    pub finished_at: DateTime<Utc>,
}

impl FinalizationReport {
    /// Whether the duplicate contact is gone.
    pub fn is_complete(&self) -> bool {
        matches!(self.deletion, DeletionResult::Deleted { .. })
    }
}

/// Finalize a merge of `duplicate` into `primary`.
///
/// Returns `Err` only when staged patches could not be written. A failed
/// duplicate delete is reported through [`FinalizationReport::deletion`].
pub async fn finalize(
    store: Arc<dyn RecordStore>,
    registry: &DependentRegistry,
    status: &StatusChannel,
    primary: &mut ContactSnapshot,
    duplicate: &ContactId,
    staged: &[(FieldKey, Row)],
) -> MergeResult<FinalizationReport> {
    let staged_fields = apply_staged(store.as_ref(), status, primary, staged).await?;

    let batch = run_batch(Arc::clone(&store), registry, &primary.id, duplicate).await;
    for failure in batch.failures() {
        if let TransferStatus::Failed { reason } = &failure.status {
            status.failure(&format!("transfer {}", failure.entry), reason.as_str());
        }
    }

    let deletion = match store
        .delete(CONTACTS_TABLE, &Filter::eq(CONTACT_ID, duplicate.to_value()))
        .await
    {
        Ok(rows) => {
            status.success(
                "delete duplicate",
                format!("{duplicate} merged into {}", primary.id),
            );
            DeletionResult::Deleted { rows }
        }
        Err(e) => {
            status.failure("delete duplicate", e.to_string());
            DeletionResult::Failed {
                reason: e.to_string(),
            }
        }
    };

    info!(
        primary = %primary.id,
        duplicate = %duplicate,
        transferred = batch.applied_count(),
        failed = batch.failure_count(),
        complete = matches!(deletion, DeletionResult::Deleted { .. }),
        "finalization finished"
    );

    Ok(FinalizationReport {
        primary: primary.id.clone(),
        duplicate: duplicate.clone(),
        staged_fields,
        batch,
        deletion,
        finished_at: Utc::now(),
    })
}

/// Write all staged scalar patches as one update of the primary.
async fn apply_staged(
    store: &dyn RecordStore,
    status: &StatusChannel,
    primary: &mut ContactSnapshot,
    staged: &[(FieldKey, Row)],
) -> MergeResult<Vec<FieldKey>> {
    if staged.is_empty() {
        return Ok(Vec::new());
    }
    let mut combined = Row::new();
    for (_, patch) in staged {
        combined.extend(patch.clone());
    }
    if let Err(e) = apply_patch(store, primary, &combined).await {
        status.failure("apply staged fields", e.to_string());
        return Err(e);
    }
    let fields: Vec<FieldKey> = staged.iter().map(|(f, _)| *f).collect();
    status.success("apply staged fields", format!("{} field(s) written", fields.len()));
    Ok(fields)
}
