use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crm_store::{Filter, RecordStore, Row};
use crm_types::ContactId;

use crate::registry::{DependentAction, DependentRegistry, DependentTable};

// ---------------------------------------------------------------------------
// TransferOutcome
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransferStatus {
    Applied { rows: u64 },
    Failed { reason: String },
}

/// Result of one registry entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TransferOutcome {
    pub entry: DependentTable,
    pub status: TransferStatus,
}

impl TransferOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self.status, TransferStatus::Applied { .. })
    }

    pub fn rows(&self) -> u64 {
        match self.status {
            TransferStatus::Applied { rows } => rows,
            TransferStatus::Failed { .. } => 0,
        }
    }
}

// ---------------------------------------------------------------------------
// BatchReport
// ---------------------------------------------------------------------------

/// Outcomes of a transfer batch, in registry order.
#[derive(Clone, Debug, Serialize)]
pub struct BatchReport {
    pub outcomes: Vec<TransferOutcome>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn failures(&self) -> impl Iterator<Item = &TransferOutcome> {
        self.outcomes.iter().filter(|o| !o.is_applied())
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    pub fn applied_count(&self) -> usize {
        self.outcomes.len() - self.failure_count()
    }

    pub fn is_clean(&self) -> bool {
        self.failure_count() == 0
    }

    pub fn rows_affected(&self) -> u64 {
        self.outcomes.iter().map(TransferOutcome::rows).sum()
    }
}

// ---------------------------------------------------------------------------
// Batch execution
// ---------------------------------------------------------------------------

/// Run every registry entry and wait for all of them.
///
/// Purge entries run first, then transfer entries; each phase runs
/// concurrently. Failures never stop the batch; each is recorded in the
/// report. There is no timeout.
pub async fn run_batch(
    store: Arc<dyn RecordStore>,
    registry: &DependentRegistry,
    primary: &ContactId,
    duplicate: &ContactId,
) -> BatchReport {
    let start = Instant::now();

    let mut outcomes: Vec<TransferOutcome> = registry
        .iter()
        .map(|entry| TransferOutcome {
            entry: entry.clone(),
            status: TransferStatus::Failed {
                reason: "task did not complete".into(),
            },
        })
        .collect();

    for phase in [DependentAction::Purge, DependentAction::Transfer] {
        let mut set = JoinSet::new();
        for (index, entry) in registry.iter().cloned().enumerate() {
            if entry.action != phase {
                continue;
            }
            let store = Arc::clone(&store);
            let primary = primary.to_value();
            let duplicate = duplicate.to_value();
            set.spawn(async move {
                let status = match apply_entry(store.as_ref(), &entry, primary, duplicate).await {
                    Ok(rows) => TransferStatus::Applied { rows },
                    Err(reason) => TransferStatus::Failed { reason },
                };
                (index, TransferOutcome { entry, status })
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    match &outcome.status {
                        TransferStatus::Applied { rows } => {
                            debug!(entry = %outcome.entry, rows, "dependent rows handled")
                        }
                        TransferStatus::Failed { reason } => {
                            warn!(entry = %outcome.entry, %reason, "dependent transfer failed")
                        }
                    }
                    outcomes[index] = outcome;
                }
                Err(e) => warn!(error = %e, "transfer task aborted"),
            }
        }
    }

    BatchReport {
        outcomes,
        elapsed: start.elapsed(),
    }
}

async fn apply_entry(
    store: &dyn RecordStore,
    entry: &DependentTable,
    primary: Value,
    duplicate: Value,
) -> Result<u64, String> {
    let mut filter = Filter::eq(entry.column.as_str(), duplicate);
    if let Some(counterpart) = &entry.counterpart {
        filter = filter.and(counterpart.as_str(), primary.clone());
    }
    let result = match entry.action {
        DependentAction::Transfer => {
            let mut patch = Row::new();
            patch.insert(entry.column.clone(), primary);
            store.update(&entry.table, &filter, &patch).await
        }
        DependentAction::Purge => store.delete(&entry.table, &filter).await,
    };
    result.map_err(|e| e.to_string())
}
