use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::info;

use crm_store::{RecordStore, Row};
use crm_types::{Choice, ContactId, FieldDescriptor, FieldKey, FieldKind};

use crate::cleanup::cleanup_after;
use crate::collection::NewItem;
use crate::config::{CommitMode, MergeConfig};
use crate::error::{MergeError, MergeResult};
use crate::finalize::{finalize, FinalizationReport};
use crate::locks::{LockGuard, SessionClaims};
use crate::reconciler::{AddOutcome, CollectionReconciler, MoveOutcome, RemoveOutcome, Side};
use crate::resolver::{resolve_scalar, scalar_patch};
use crate::session::{MergeSession, SessionStatus};
use crate::snapshot::ContactSnapshot;
use crate::status::{StatusChannel, StatusStream};

// ---------------------------------------------------------------------------
// MergeEngine
// ---------------------------------------------------------------------------

/// Entry point for merge sessions over one record store.
///
/// Wizards opened from the same engine share the duplicate claim registry and
/// the status channel.
pub struct MergeEngine {
    store: Arc<dyn RecordStore>,
    config: MergeConfig,
    claims: SessionClaims,
    status: StatusChannel,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn RecordStore>, config: MergeConfig) -> Self {
        let status = StatusChannel::new(config.status_capacity);
        Self {
            store,
            config,
            claims: SessionClaims::new(),
            status,
        }
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    pub fn status(&self) -> &StatusChannel {
        &self.status
    }

    pub fn subscribe(&self) -> StatusStream {
        self.status.subscribe()
    }

    pub fn claims(&self) -> &SessionClaims {
        &self.claims
    }

    /// Open a session merging `duplicate` into `primary`.
    ///
    /// Both contacts must exist and differ, and no other session from this
    /// engine may hold `duplicate`.
    pub async fn open(&self, primary: ContactId, duplicate: ContactId) -> MergeResult<MergeWizard> {
        if primary == duplicate {
            return Err(MergeError::Validation(format!(
                "cannot merge contact {primary} into itself"
            )));
        }
        let claim = self.claims.claim(&duplicate)?;
        let primary_snapshot = ContactSnapshot::load(self.store.as_ref(), &primary).await?;
        let duplicate_snapshot = ContactSnapshot::load(self.store.as_ref(), &duplicate).await?;
        let session = MergeSession::new(primary, duplicate);

        info!(
            session = %session.id,
            primary = %session.primary_id,
            duplicate = %session.duplicate_id,
            mode = %self.config.commit_mode,
            "merge session opened"
        );

        Ok(MergeWizard {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            status: self.status.clone(),
            reconciler: CollectionReconciler::new(Arc::clone(&self.store)),
            session,
            primary: primary_snapshot,
            duplicate: duplicate_snapshot,
            staged: BTreeMap::new(),
            claim: Some(claim),
            last_report: None,
        })
    }
}

impl fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeEngine")
            .field("config", &self.config)
            .field("active_sessions", &self.claims.active())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// MergeWizard
// ---------------------------------------------------------------------------

/// Result of [`MergeWizard::advance`].
#[derive(Debug)]
pub enum Advance {
    /// Moved on to the next field.
    Field(FieldDescriptor),
    /// Left the last field and ran finalization.
    Finalized(FinalizationReport),
}

/// Field-by-field merge state machine.
///
/// Commits as it goes: every write is permanent once it succeeds and nothing
/// is rolled back by [`retreat`](Self::retreat) or
/// [`abandon`](Self::abandon). Only forward steps run cleanup or
/// finalization.
pub struct MergeWizard {
    store: Arc<dyn RecordStore>,
    config: MergeConfig,
    status: StatusChannel,
    reconciler: CollectionReconciler,
    session: MergeSession,
    primary: ContactSnapshot,
    duplicate: ContactSnapshot,
    staged: BTreeMap<FieldKey, Row>,
    claim: Option<LockGuard<ContactId>>,
    last_report: Option<FinalizationReport>,
}

impl MergeWizard {
    pub fn session(&self) -> &MergeSession {
        &self.session
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status
    }

    pub fn primary(&self) -> &ContactSnapshot {
        &self.primary
    }

    pub fn duplicate(&self) -> &ContactSnapshot {
        &self.duplicate
    }

    pub fn current_field(&self) -> FieldDescriptor {
        self.session.current_field()
    }

    /// One-based position and field count.
    pub fn progress(&self) -> (usize, usize) {
        self.session.progress()
    }

    /// Scalar fields whose writes are held for finalization.
    pub fn staged_fields(&self) -> Vec<FieldKey> {
        self.staged.keys().copied().collect()
    }

    pub fn last_report(&self) -> Option<&FinalizationReport> {
        self.last_report.as_ref()
    }

    pub fn reconciler(&self) -> &CollectionReconciler {
        &self.reconciler
    }

    /// Suggested choice per field: take the duplicate's scalar value when the
    /// primary's is blank and the duplicate's is not. Never applied
    /// automatically.
    pub fn suggested_choices(&self) -> Vec<(FieldKey, Choice)> {
        self.session
            .field_order
            .iter()
            .map(|d| {
                let choice = match d.kind {
                    FieldKind::Scalar
                        if self.primary.is_blank(d.key)
                            && self.duplicate.scalar(d.key).is_ok_and(|v| !v.is_empty()) =>
                    {
                        Choice::KeepDuplicate
                    }
                    kind => Choice::default_for(kind),
                };
                (d.key, choice)
            })
            .collect()
    }

    /// Record the choice for the current field.
    ///
    /// In immediate mode a scalar `keep-duplicate` or `edit-custom` writes
    /// the primary now; in staged mode the patch is held until finalization.
    pub async fn choose_field(&mut self, choice: Choice) -> MergeResult<()> {
        self.require(SessionStatus::InProgress, "choose a field")?;
        let field = self.session.current_field();
        if !choice.applies_to(field.kind) {
            return Err(MergeError::Validation(format!(
                "{choice} does not apply to {} field {}",
                kind_name(field.kind),
                field.key
            )));
        }

        if field.kind == FieldKind::Scalar {
            match self.config.commit_mode {
                CommitMode::Immediate => {
                    let op = format!("update {}", field.key);
                    let result = resolve_scalar(
                        self.store.as_ref(),
                        field.key,
                        &choice,
                        &mut self.primary,
                        &self.duplicate,
                    )
                    .await;
                    if self.published(&op, result)? {
                        self.status.success(&op, format!("{choice} applied"));
                    }
                }
                CommitMode::Staged => match scalar_patch(field.key, &choice, &self.duplicate)? {
                    None => {
                        self.staged.remove(&field.key);
                    }
                    Some(patch) => {
                        self.staged.insert(field.key, patch);
                    }
                },
            }
        }

        info!(session = %self.session.id, field = %field.key, %choice, "field choice recorded");
        self.session.field_choices.insert(field.key, choice);
        Ok(())
    }

    /// Step forward, running cleanup for the field being left and
    /// finalization after the last field.
    pub async fn advance(&mut self) -> MergeResult<Advance> {
        self.require(SessionStatus::InProgress, "advance")?;
        let field = self.session.current_field();

        if field.kind == FieldKind::Collection
            && self.session.choice(field.key) == Some(&Choice::Combine)
        {
            let absorbed = self
                .reconciler
                .absorb_all(field.key, &self.session.primary_id, &self.session.duplicate_id)
                .await;
            self.published(&format!("combine {}", field.key), absorbed)?;
        }

        let cleaned = cleanup_after(self.store.as_ref(), field.key, &self.session.duplicate_id).await;
        if let Some(removed) = self.published(&format!("clean up {}", field.key), cleaned)? {
            info!(session = %self.session.id, field = %field.key, removed, "duplicate side cleaned");
        }

        self.refresh().await?;

        if self.session.is_last_field() {
            self.session.status = SessionStatus::Finalizing;
            return self.run_finalize().await.map(Advance::Finalized);
        }
        self.session.current_field_index += 1;
        Ok(Advance::Field(self.session.current_field()))
    }

    /// Step back one field. Nothing already written is undone.
    pub fn retreat(&mut self) -> MergeResult<FieldDescriptor> {
        self.require(SessionStatus::InProgress, "retreat")?;
        if self.session.current_field_index == 0 {
            return Err(MergeError::InvalidState {
                action: "retreat",
                status: "at the first field".into(),
            });
        }
        self.session.current_field_index -= 1;
        Ok(self.session.current_field())
    }

    /// Give up on the session and release the duplicate.
    pub fn abandon(&mut self) -> MergeResult<()> {
        if self.session.status.is_terminal() {
            return Err(self.invalid("abandon"));
        }
        self.session.status = SessionStatus::Abandoned;
        self.claim = None;
        self.staged.clear();
        self.status.success(
            "abandon merge",
            format!("merge of {} abandoned", self.session.duplicate_id),
        );
        info!(session = %self.session.id, "merge session abandoned");
        Ok(())
    }

    /// Re-run finalization after a failed duplicate delete.
    pub async fn retry_finalize(&mut self) -> MergeResult<FinalizationReport> {
        self.require(SessionStatus::Finalizing, "retry finalization")?;
        self.run_finalize().await
    }

    /// Move a duplicate item of the current collection field to the primary.
    pub async fn move_item(&mut self, item_id: &str) -> MergeResult<MoveOutcome> {
        let field = self.current_collection("move an item")?;
        let result = self
            .reconciler
            .move_item(field, item_id, &self.session.primary_id, &self.session.duplicate_id)
            .await;
        let outcome = self.published(&format!("move {field} item"), result)?;
        self.refresh().await?;
        Ok(outcome)
    }

    /// Remove an item of the current collection field from either contact.
    pub async fn remove_item(&mut self, side: Side, item_id: &str) -> MergeResult<RemoveOutcome> {
        let field = self.current_collection("remove an item")?;
        let owner = match side {
            Side::Primary => &self.session.primary_id,
            Side::Duplicate => &self.session.duplicate_id,
        };
        let result = self.reconciler.remove_item(field, item_id, owner).await;
        let outcome = self.published(&format!("remove {field} item"), result)?;
        self.refresh().await?;
        Ok(outcome)
    }

    /// Add a new value to the primary's current collection field.
    pub async fn add_item(&mut self, item: NewItem) -> MergeResult<AddOutcome> {
        let field = self.current_collection("add an item")?;
        if item.field() != field {
            return Err(MergeError::Validation(format!(
                "{} item cannot be added while reviewing {field}",
                item.field()
            )));
        }
        let result = self.reconciler.add_item(&item, &self.session.primary_id).await;
        let outcome = self.published(&format!("add {field} item"), result)?;
        self.refresh().await?;
        Ok(outcome)
    }

    /// Reload both contacts from the store.
    pub async fn refresh(&mut self) -> MergeResult<()> {
        self.primary = ContactSnapshot::load(self.store.as_ref(), &self.session.primary_id).await?;
        self.duplicate =
            ContactSnapshot::load(self.store.as_ref(), &self.session.duplicate_id).await?;
        Ok(())
    }

    async fn run_finalize(&mut self) -> MergeResult<FinalizationReport> {
        let staged: Vec<(FieldKey, Row)> = self
            .staged
            .iter()
            .map(|(k, patch)| (*k, patch.clone()))
            .collect();
        let report = finalize(
            Arc::clone(&self.store),
            &self.config.registry,
            &self.status,
            &mut self.primary,
            &self.session.duplicate_id,
            &staged,
        )
        .await?;
        self.staged.clear();

        if report.is_complete() {
            self.session.status = SessionStatus::Completed;
            self.claim = None;
            info!(session = %self.session.id, "merge session completed");
        }
        self.last_report = Some(report.clone());
        Ok(report)
    }

    fn current_collection(&self, action: &'static str) -> MergeResult<FieldKey> {
        self.require(SessionStatus::InProgress, action)?;
        let field = self.session.current_field();
        if field.kind != FieldKind::Collection {
            return Err(MergeError::Validation(format!(
                "cannot {action} while reviewing scalar field {}",
                field.key
            )));
        }
        Ok(field.key)
    }

    /// Publish a failure for anything but rejected input, then pass the
    /// result through.
    fn published<T>(&self, operation: &str, result: MergeResult<T>) -> MergeResult<T> {
        if let Err(e) = &result {
            if !e.is_validation() {
                self.status.failure(operation, e.to_string());
            }
        }
        result
    }

    fn require(&self, expected: SessionStatus, action: &'static str) -> MergeResult<()> {
        if self.session.status != expected {
            return Err(self.invalid(action));
        }
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> MergeError {
        MergeError::InvalidState {
            action,
            status: self.session.status.to_string(),
        }
    }
}

impl fmt::Debug for MergeWizard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeWizard")
            .field("session", &self.session.id)
            .field("status", &self.session.status)
            .field("field", &self.session.current_field().key)
            .field("staged", &self.staged.len())
            .finish()
    }
}

fn kind_name(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Scalar => "scalar",
        FieldKind::Collection => "collection",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finalize::DeletionResult;
    use crate::registry::DependentRegistry;
    use crm_store::{Filter, InMemoryRecordStore, StoreOp};
    use crm_types::{Category, ScalarValue, TypeError};
    use serde_json::json;

    fn c(id: &str) -> ContactId {
        ContactId::parse(id).unwrap()
    }

    fn fixture() -> Arc<InMemoryRecordStore> {
        let store = InMemoryRecordStore::new();
        store.define_table("contacts", "contact_id");
        store.define_table("contact_emails", "email_id");
        store.define_table("contact_tags", "entry_id");
        store.define_table("tags", "tag_id");
        store.define_table("contact_cities", "entry_id");
        store.define_table("cities", "city_id");
        store.define_table("contact_companies", "contact_companies_id");
        store.define_table("companies", "company_id");

        store
            .seed(
                "contacts",
                json!({"contact_id": "p", "first_name": "Ada", "last_name": "Lovelace", "category": "Inbox"}),
            )
            .unwrap();
        store
            .seed(
                "contacts",
                json!({
                    "contact_id": "d",
                    "first_name": "Ada",
                    "category": "Founder",
                    "job_role": "Mathematician",
                    "score": 5,
                    "keep_in_touch_frequency": "Monthly"
                }),
            )
            .unwrap();
        store.seed("contacts", json!({"contact_id": "other"})).unwrap();

        for (id, owner, addr, default) in [
            (1, "p", "a@x.com", true),
            (2, "d", "a@x.com", false),
            (3, "d", "b@x.com", true),
        ] {
            store
                .seed(
                    "contact_emails",
                    json!({"email_id": id, "contact_id": owner, "email": addr, "is_primary": default}),
                )
                .unwrap();
        }
        store.seed("tags", json!({"tag_id": "t-vip", "name": "VIP"})).unwrap();
        store.seed("tags", json!({"tag_id": "t-lead", "name": "Lead"})).unwrap();
        store
            .seed("contact_tags", json!({"entry_id": 1, "contact_id": "p", "tag_id": "t-vip", "is_primary": true}))
            .unwrap();
        store
            .seed("contact_tags", json!({"entry_id": 2, "contact_id": "d", "tag_id": "t-lead", "is_primary": true}))
            .unwrap();
        store
            .seed("interactions", json!({"id": 1, "contact_id": "d", "summary": "call"}))
            .unwrap();
        store
            .seed("deals", json!({"id": 1, "introducer": "d"}))
            .unwrap();
        store
            .seed("keep_in_touch", json!({"id": 1, "contact_id": "d", "frequency": "Monthly"}))
            .unwrap();
        Arc::new(store)
    }

    fn engine(store: &Arc<InMemoryRecordStore>, config: MergeConfig) -> MergeEngine {
        MergeEngine::new(store.clone(), config)
    }

    async fn open(engine: &MergeEngine) -> MergeWizard {
        engine.open(c("p"), c("d")).await.unwrap()
    }

    async fn advance_to(wizard: &mut MergeWizard, field: FieldKey) {
        while wizard.current_field().key != field {
            wizard.advance().await.unwrap();
        }
    }

    async fn run_to_end(wizard: &mut MergeWizard) -> FinalizationReport {
        loop {
            if let Advance::Finalized(report) = wizard.advance().await.unwrap() {
                return report;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Opening
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn open_rejects_self_merge_and_missing_contacts() {
        let store = fixture();
        let engine = engine(&store, MergeConfig::default());
        let err = engine.open(c("p"), c("p")).await.unwrap_err();
        assert!(err.is_validation());
        let err = engine.open(c("p"), c("ghost")).await.unwrap_err();
        assert!(matches!(err, MergeError::NotFound { .. }));
        // A failed open does not keep the claim.
        assert_eq!(engine.claims().active(), 0);
    }

    #[tokio::test]
    async fn second_session_on_same_duplicate_is_refused() {
        let store = fixture();
        let engine = engine(&store, MergeConfig::default());
        let mut first = open(&engine).await;
        let err = engine.open(c("other"), c("d")).await.unwrap_err();
        assert!(matches!(err, MergeError::DuplicateClaimed(_)));

        first.abandon().unwrap();
        assert!(engine.open(c("other"), c("d")).await.is_ok());
    }

    #[tokio::test]
    async fn suggestions_prefer_duplicate_when_primary_blank() {
        let store = fixture();
        let engine = engine(&store, MergeConfig::default());
        let wizard = open(&engine).await;
        let suggestions: BTreeMap<FieldKey, Choice> = wizard.suggested_choices().into_iter().collect();
        assert_eq!(suggestions[&FieldKey::Name], Choice::KeepPrimary);
        assert_eq!(suggestions[&FieldKey::Category], Choice::KeepDuplicate);
        assert_eq!(suggestions[&FieldKey::JobRole], Choice::KeepDuplicate);
        assert_eq!(suggestions[&FieldKey::Linkedin], Choice::KeepPrimary);
        assert_eq!(suggestions[&FieldKey::Emails], Choice::Combine);
        // Hints only.
        assert_eq!(wizard.session().choice(FieldKey::Category), Some(&Choice::KeepPrimary));
    }

    // -----------------------------------------------------------------------
    // Scalar fields
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn keep_duplicate_category_writes_immediately() {
        let store = fixture();
        let engine = engine(&store, MergeConfig::default());
        let mut wizard = open(&engine).await;
        wizard.advance().await.unwrap();
        assert_eq!(wizard.current_field().key, FieldKey::Category);
        wizard.choose_field(Choice::KeepDuplicate).await.unwrap();

        assert_eq!(
            wizard.primary().scalar(FieldKey::Category).unwrap(),
            ScalarValue::Category(Category::Founder)
        );
        let row = store.rows("contacts").into_iter().find(|r| r["contact_id"] == json!("p")).unwrap();
        assert_eq!(row["category"], json!("Founder"));
    }

    #[tokio::test]
    async fn keep_duplicate_copies_professional_investor() {
        let store = fixture();
        store
            .update(
                "contacts",
                &Filter::eq("contact_id", "d"),
                &json!({"category": "Professional Investor"}).as_object().unwrap().clone(),
            )
            .await
            .unwrap();
        let engine = engine(&store, MergeConfig::default());
        let mut wizard = open(&engine).await;
        let suggestions: BTreeMap<FieldKey, Choice> = wizard.suggested_choices().into_iter().collect();
        assert_eq!(suggestions[&FieldKey::Category], Choice::KeepDuplicate);

        advance_to(&mut wizard, FieldKey::Category).await;
        wizard.choose_field(Choice::KeepDuplicate).await.unwrap();
        assert_eq!(
            wizard.primary().scalar(FieldKey::Category).unwrap(),
            ScalarValue::Category(Category::ProfessionalInvestor)
        );

        wizard
            .choose_field(Choice::EditCustom(ScalarValue::parse_for(FieldKey::Category, "Manager").unwrap()))
            .await
            .unwrap();
        let row = store.rows("contacts").into_iter().find(|r| r["contact_id"] == json!("p")).unwrap();
        assert_eq!(row["category"], json!("Manager"));
    }

    #[tokio::test]
    async fn unreadable_duplicate_category_is_not_suggested() {
        let store = fixture();
        store
            .update(
                "contacts",
                &Filter::eq("contact_id", "d"),
                &json!({"category": "Lead"}).as_object().unwrap().clone(),
            )
            .await
            .unwrap();
        let engine = engine(&store, MergeConfig::default());
        let mut wizard = open(&engine).await;
        assert!(!wizard.duplicate().is_blank(FieldKey::Category));
        let suggestions: BTreeMap<FieldKey, Choice> = wizard.suggested_choices().into_iter().collect();
        assert_eq!(suggestions[&FieldKey::Category], Choice::KeepPrimary);

        advance_to(&mut wizard, FieldKey::Category).await;
        let err = wizard.choose_field(Choice::KeepDuplicate).await.unwrap_err();
        assert!(matches!(err, MergeError::Type(TypeError::UnknownCategory(_))));
    }

    #[tokio::test]
    async fn invalid_choice_changes_nothing() {
        let store = fixture();
        let engine = engine(&store, MergeConfig::default());
        let mut wizard = open(&engine).await;
        let err = wizard.choose_field(Choice::Combine).await.unwrap_err();
        assert!(err.is_validation());
        let err = wizard
            .choose_field(Choice::EditCustom(ScalarValue::Text(None)))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(store.write_count(), 0);
        assert_eq!(wizard.session().choice(FieldKey::Name), Some(&Choice::KeepPrimary));
    }

    #[tokio::test]
    async fn failed_scalar_write_is_reported_and_not_recorded() {
        let store = fixture();
        let engine = engine(&store, MergeConfig::default());
        let mut rx = engine.subscribe();
        let mut wizard = open(&engine).await;
        wizard.advance().await.unwrap();
        store.fail_once("contacts", StoreOp::Update);

        assert!(wizard.choose_field(Choice::KeepDuplicate).await.is_err());
        assert_eq!(wizard.session().choice(FieldKey::Category), Some(&Choice::KeepPrimary));
        assert_eq!(wizard.current_field().key, FieldKey::Category);
        assert!(rx.recv().await.unwrap().is_failure());
    }

    #[tokio::test]
    async fn immediate_choice_publishes_only_real_writes() {
        let store = fixture();
        let engine = engine(&store, MergeConfig::default());
        let mut rx = engine.subscribe();
        let mut wizard = open(&engine).await;
        advance_to(&mut wizard, FieldKey::JobRole).await;

        wizard.choose_field(Choice::KeepPrimary).await.unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(store.write_count(), 0);

        wizard.choose_field(Choice::KeepDuplicate).await.unwrap();
        let event = rx.try_recv().unwrap();
        assert!(!event.is_failure());
        assert_eq!(event.operation, "update job_role");
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn staged_mode_defers_scalar_writes() {
        let store = fixture();
        let engine = engine(&store, MergeConfig::staged());
        let mut wizard = open(&engine).await;
        wizard.advance().await.unwrap();
        wizard.choose_field(Choice::KeepDuplicate).await.unwrap();
        wizard.advance().await.unwrap();
        wizard.choose_field(Choice::KeepDuplicate).await.unwrap();
        assert_eq!(wizard.staged_fields(), vec![FieldKey::Category, FieldKey::JobRole]);
        assert_eq!(store.write_count(), 0);

        let report = run_to_end(&mut wizard).await;
        assert!(report.is_complete());
        assert_eq!(report.staged_fields, vec![FieldKey::Category, FieldKey::JobRole]);
        let row = store.rows("contacts").into_iter().find(|r| r["contact_id"] == json!("p")).unwrap();
        assert_eq!(row["category"], json!("Founder"));
        assert_eq!(row["job_role"], json!("Mathematician"));
    }

    #[tokio::test]
    async fn staged_choice_can_be_withdrawn() {
        let store = fixture();
        let engine = engine(&store, MergeConfig::staged());
        let mut wizard = open(&engine).await;
        wizard.advance().await.unwrap();
        wizard.choose_field(Choice::KeepDuplicate).await.unwrap();
        wizard.choose_field(Choice::KeepPrimary).await.unwrap();
        assert!(wizard.staged_fields().is_empty());
    }

    // -----------------------------------------------------------------------
    // Navigation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn retreat_is_inspection_only() {
        let store = fixture();
        let engine = engine(&store, MergeConfig::default());
        let mut wizard = open(&engine).await;
        assert!(wizard.retreat().is_err());
        wizard.advance().await.unwrap();
        wizard.choose_field(Choice::KeepDuplicate).await.unwrap();
        let writes = store.write_count();
        let back = wizard.retreat().unwrap();
        assert_eq!(back.key, FieldKey::Name);
        assert_eq!(store.write_count(), writes);
        assert_eq!(wizard.progress(), (1, 11));
    }

    #[tokio::test]
    async fn leaving_keep_in_touch_purges_duplicate_cadence_row() {
        let store = fixture();
        let engine = engine(&store, MergeConfig::default());
        let mut wizard = open(&engine).await;
        advance_to(&mut wizard, FieldKey::KeepInTouchFrequency).await;
        assert_eq!(store.rows("keep_in_touch").len(), 1);
        wizard.advance().await.unwrap();
        assert!(store.rows("keep_in_touch").is_empty());
        assert_eq!(wizard.current_field().key, FieldKey::Cities);
    }

    // -----------------------------------------------------------------------
    // Collection fields
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn item_actions_need_a_collection_field() {
        let store = fixture();
        let engine = engine(&store, MergeConfig::default());
        let mut wizard = open(&engine).await;
        assert!(wizard.move_item("2").await.unwrap_err().is_validation());

        advance_to(&mut wizard, FieldKey::Tags).await;
        let err = wizard
            .add_item(NewItem::Email { email: "c@x.com".into(), label: None })
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn interactive_move_with_collision() {
        let store = fixture();
        let engine = engine(&store, MergeConfig::default());
        let mut wizard = open(&engine).await;
        advance_to(&mut wizard, FieldKey::Emails).await;

        wizard.move_item("2").await.unwrap();
        wizard.move_item("3").await.unwrap();
        let items: Vec<(String, bool)> = wizard
            .primary()
            .items(FieldKey::Emails)
            .iter()
            .map(|i| (i.key.clone(), i.is_default))
            .collect();
        assert_eq!(items, vec![("a@x.com".into(), true), ("b@x.com".into(), false)]);
        assert!(wizard.duplicate().items(FieldKey::Emails).is_empty());
    }

    #[tokio::test]
    async fn combine_yields_union_on_advance() {
        let store = fixture();
        let engine = engine(&store, MergeConfig::default());
        let mut wizard = open(&engine).await;
        advance_to(&mut wizard, FieldKey::Tags).await;
        wizard.advance().await.unwrap();

        assert_eq!(wizard.primary().keys(FieldKey::Tags), vec!["vip", "lead"]);
        assert_eq!(wizard.primary().default_item(FieldKey::Tags).unwrap().key, "vip");
        assert!(wizard.duplicate().items(FieldKey::Tags).is_empty());
    }

    #[tokio::test]
    async fn keep_primary_collection_discards_duplicate_items() {
        let store = fixture();
        let engine = engine(&store, MergeConfig::default());
        let mut wizard = open(&engine).await;
        advance_to(&mut wizard, FieldKey::Emails).await;
        wizard.choose_field(Choice::KeepPrimary).await.unwrap();
        wizard.advance().await.unwrap();

        assert_eq!(wizard.primary().keys(FieldKey::Emails), vec!["a@x.com"]);
        assert_eq!(store.count("contact_emails", &Filter::eq("contact_id", "d")), 0);
    }

    #[tokio::test]
    async fn remove_then_promote_through_wizard() {
        let store = fixture();
        let engine = engine(&store, MergeConfig::default());
        let mut wizard = open(&engine).await;
        advance_to(&mut wizard, FieldKey::Tags).await;
        wizard.add_item(NewItem::Tag { name: "Lead".into() }).await.unwrap();
        let out = wizard.remove_item(Side::Primary, "1").await.unwrap();
        assert!(out.promoted.is_some());
        let tags = wizard.primary().items(FieldKey::Tags);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].display, "Lead");
        assert!(tags[0].is_default);
    }

    // -----------------------------------------------------------------------
    // Finalization
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn full_walk_completes_without_dangling_references() {
        let store = fixture();
        let engine = engine(&store, MergeConfig::default());
        let mut wizard = open(&engine).await;
        let report = run_to_end(&mut wizard).await;

        assert!(report.is_complete());
        assert_eq!(wizard.status(), SessionStatus::Completed);
        assert_eq!(engine.claims().active(), 0);
        for entry in DependentRegistry::standard().iter() {
            assert_eq!(
                store.count(&entry.table, &Filter::eq(entry.column.as_str(), "d")),
                0,
                "{entry}"
            );
        }
        assert_eq!(store.count("contacts", &Filter::eq("contact_id", "d")), 0);
        assert_eq!(store.count("interactions", &Filter::eq("contact_id", "p")), 1);
        assert_eq!(store.count("deals", &Filter::eq("introducer", "p")), 1);
        assert!(wizard.advance().await.is_err());
    }

    #[tokio::test]
    async fn failed_delete_allows_retry() {
        let store = fixture();
        let engine = engine(&store, MergeConfig::default());
        let mut wizard = open(&engine).await;
        advance_to(&mut wizard, FieldKey::Companies).await;
        store.fail_once("contacts", StoreOp::Delete);

        let report = run_to_end(&mut wizard).await;
        assert!(!report.is_complete());
        assert_eq!(wizard.status(), SessionStatus::Finalizing);
        assert!(engine.claims().is_claimed(&c("d")));
        assert!(wizard.advance().await.is_err());

        let retry = wizard.retry_finalize().await.unwrap();
        assert_eq!(retry.deletion, DeletionResult::Deleted { rows: 1 });
        assert_eq!(retry.batch.rows_affected(), 0);
        assert_eq!(wizard.status(), SessionStatus::Completed);
        assert!(wizard.retry_finalize().await.is_err());
        assert!(wizard.abandon().is_err());
    }

    #[tokio::test]
    async fn abandon_keeps_committed_writes() {
        let store = fixture();
        let engine = engine(&store, MergeConfig::default());
        let mut wizard = open(&engine).await;
        wizard.advance().await.unwrap();
        wizard.choose_field(Choice::KeepDuplicate).await.unwrap();
        wizard.abandon().unwrap();

        assert_eq!(wizard.status(), SessionStatus::Abandoned);
        assert!(wizard.advance().await.is_err());
        let row = store.rows("contacts").into_iter().find(|r| r["contact_id"] == json!("p")).unwrap();
        assert_eq!(row["category"], json!("Founder"));
        assert_eq!(store.count("contacts", &Filter::eq("contact_id", "d")), 1);
    }
}
