//! Contact merge engine.
//!
//! Given a confirmed primary and duplicate contact, a [`MergeWizard`] walks an
//! operator through every mergeable field in a fixed order, then moves all
//! dependent records onto the primary and deletes the duplicate.
//!
//! # Components
//!
//! - [`wizard`] -- the field-by-field state machine and [`MergeEngine`].
//! - [`resolver`] -- scalar overwrite policy.
//! - [`reconciler`] -- item-level move, remove, and add for collections.
//! - [`cleanup`] -- removes what the duplicate still owns after a field.
//! - [`transfer`] / [`finalize`] -- the concurrent dependent-table batch and
//!   the final delete.
//! - [`status`] -- fire-and-forget operator notifications.
//!
//! # Guarantees
//!
//! 1. After combining a collection, the primary holds the natural-key union
//!    of both contacts' items with no repeated keys.
//! 2. Every non-empty collection has exactly one default item.
//! 3. After a completed merge no registered dependent table references the
//!    duplicate.
//! 4. Finalization can be re-run; already-moved rows simply match nothing.
//!
//! There is no rollback. Writes are permanent as soon as they succeed.

pub mod cleanup;
pub mod collection;
pub mod config;
pub mod error;
pub mod finalize;
pub mod locks;
pub mod reconciler;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod snapshot;
pub mod status;
pub mod transfer;
pub mod wizard;

pub use collection::{CollectionSpec, NewItem};
pub use config::{CommitMode, MergeConfig};
pub use error::{MergeError, MergeResult};
pub use finalize::{DeletionResult, FinalizationReport};
pub use locks::{LockGuard, LockRegistry, SessionClaims};
pub use reconciler::{AddOutcome, CollectionReconciler, MoveOutcome, RemoveOutcome, Side};
pub use registry::{DependentAction, DependentRegistry, DependentTable};
pub use session::{MergeSession, SessionStatus};
pub use snapshot::{CollectionItem, ContactSnapshot};
pub use status::{StatusChannel, StatusEvent, StatusOutcome, StatusStream};
pub use transfer::{BatchReport, TransferOutcome, TransferStatus};
pub use wizard::{Advance, MergeEngine, MergeWizard};
