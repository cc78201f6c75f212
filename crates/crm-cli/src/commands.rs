use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use tokio::runtime::Runtime;
use tracing::info;

use crm_merge::{
    Advance, ContactSnapshot, DependentAction, DeletionResult, FinalizationReport,
    MergeConfig, MergeEngine, MergeWizard, Side, StatusStream, TransferStatus,
};
use crm_store::InMemoryRecordStore;
use crm_types::{ContactId, FieldKey, FieldKind};

use crate::cli::*;
use crate::plan::MergePlan;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    match cli.command {
        Command::Tables(args) => cmd_tables(args, format),
        Command::Show(args) => cmd_show(args, format),
        Command::Merge(args) => cmd_merge(args, format),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<MergeConfig> {
    match path {
        Some(path) => MergeConfig::load(path).context("loading merge configuration"),
        None => Ok(MergeConfig::default()),
    }
}

fn load_store(path: &Path) -> anyhow::Result<Arc<InMemoryRecordStore>> {
    let store = InMemoryRecordStore::load(path)
        .with_context(|| format!("loading record store from {}", path.display()))?;
    Ok(Arc::new(store))
}

fn cmd_tables(args: TablesArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&config.registry)?);
        return Ok(());
    }
    println!(
        "{} dependent tables ({} commit mode)",
        config.registry.len().to_string().bold(),
        config.commit_mode.to_string().cyan()
    );
    for entry in config.registry.iter() {
        let action = match entry.action {
            DependentAction::Transfer => "transfer".green(),
            DependentAction::Purge => "purge".red(),
        };
        match &entry.counterpart {
            Some(counterpart) => println!(
                "  {:<9} {}.{} {}",
                action,
                entry.table.bold(),
                entry.column,
                format!("(paired with {counterpart})").dimmed()
            ),
            None => println!("  {:<9} {}.{}", action, entry.table.bold(), entry.column),
        }
    }
    Ok(())
}

fn cmd_show(args: ShowArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = load_store(&args.db)?;
    let id = ContactId::parse(&args.contact)?;
    let snapshot = Runtime::new()?.block_on(ContactSnapshot::load(store.as_ref(), &id))?;
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }
    print_snapshot(&snapshot);
    Ok(())
}

fn print_snapshot(snapshot: &ContactSnapshot) {
    println!("Contact {}", snapshot.id.to_string().yellow().bold());
    for field in FieldKey::ALL {
        match field.kind() {
            FieldKind::Scalar => {
                let value = snapshot
                    .scalar(field)
                    .map(|v| v.to_string())
                    .unwrap_or_else(|e| format!("<{e}>"));
                println!("  {:<14} {}", field.label(), value);
            }
            FieldKind::Collection => {
                let items = snapshot.items(field);
                if items.is_empty() {
                    println!("  {:<14} {}", field.label(), "-".dimmed());
                    continue;
                }
                println!("  {}", field.label());
                for item in items {
                    let marker = if item.is_default { "*".green().bold() } else { " ".normal() };
                    println!("    {} {} {}", marker, item.id_str().dimmed(), item.display);
                }
            }
        }
    }
}

fn cmd_merge(args: MergeArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = load_store(&args.db)?;
    let config = load_config(args.config.as_deref())?;
    let plan = match &args.plan {
        Some(path) => MergePlan::load(path)?,
        None => MergePlan::default(),
    };
    let primary = ContactId::parse(&args.primary)?;
    let duplicate = ContactId::parse(&args.duplicate)?;

    info!(%primary, %duplicate, commit_mode = %config.commit_mode, "starting merge");
    let engine = MergeEngine::new(store.clone(), config);
    let mut events = engine.subscribe();
    let runtime = Runtime::new()?;
    let report = runtime.block_on(async {
        let mut wizard = engine.open(primary, duplicate).await?;
        drive(&mut wizard, &plan, format).await
    });
    print_events(&mut events, format);

    // Writes already made are permanent; persist them even if the run failed.
    if args.write {
        store
            .save(&args.db)
            .with_context(|| format!("writing record store to {}", args.db.display()))?;
        if format == OutputFormat::Text {
            println!("Wrote {}", args.db.display().to_string().bold());
        }
    }
    let report = report?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report),
    }

    if !report.is_complete() {
        bail!(
            "duplicate {} was not deleted; finalization must be retried",
            report.duplicate
        );
    }
    Ok(())
}

/// Walk every field, applying the plan, until finalization runs.
async fn drive(
    wizard: &mut MergeWizard,
    plan: &MergePlan,
    format: OutputFormat,
) -> anyhow::Result<FinalizationReport> {
    let suggestions = wizard.suggested_choices();
    loop {
        let field = wizard.current_field();
        let field_plan = plan.field(field.key);

        let planned = match field_plan {
            Some(p) => p.choice_for(field.key)?,
            None => None,
        };
        let suggested = plan
            .use_suggestions
            .then(|| suggestions.iter().find(|(k, _)| *k == field.key))
            .flatten()
            .map(|(_, c)| c.clone());
        if let Some(choice) = planned.or(suggested) {
            wizard.choose_field(choice).await?;
        }

        if let Some(p) = field_plan {
            for id in &p.move_items {
                wizard.move_item(id).await?;
            }
            for id in &p.remove_primary {
                wizard.remove_item(Side::Primary, id).await?;
            }
            for id in &p.remove_duplicate {
                wizard.remove_item(Side::Duplicate, id).await?;
            }
            for item in &p.add {
                wizard.add_item(item.clone()).await?;
            }
        }

        if format == OutputFormat::Text {
            let (step, total) = wizard.progress();
            let choice = wizard
                .session()
                .choice(field.key)
                .map(|c| c.to_string())
                .unwrap_or_default();
            println!(
                "[{step}/{total}] {:<14} {}",
                field.label,
                choice.cyan()
            );
        }

        match wizard.advance().await? {
            Advance::Field(_) => {}
            Advance::Finalized(report) => return Ok(report),
        }
    }
}

fn print_events(events: &mut StatusStream, format: OutputFormat) {
    if format != OutputFormat::Text {
        return;
    }
    while let Ok(event) = events.try_recv() {
        if event.is_failure() {
            eprintln!("  {} {}: {}", "!".red().bold(), event.operation, event.message);
        }
    }
}

fn print_report(report: &FinalizationReport) {
    let batch = &report.batch;
    println!(
        "Transferred {} dependent tables ({} rows), {} failed",
        batch.applied_count().to_string().bold(),
        batch.rows_affected(),
        batch.failure_count().to_string().red()
    );
    for outcome in batch.failures() {
        if let TransferStatus::Failed { reason } = &outcome.status {
            println!("  {} {}: {}", "✗".red(), outcome.entry, reason);
        }
    }
    if !report.staged_fields.is_empty() {
        let fields: Vec<String> = report.staged_fields.iter().map(|f| f.to_string()).collect();
        println!("Staged fields written: {}", fields.join(", "));
    }
    match &report.deletion {
        DeletionResult::Deleted { .. } => println!(
            "{} Merged {} into {}",
            "✓".green().bold(),
            report.duplicate.to_string().yellow(),
            report.primary.to_string().yellow()
        ),
        DeletionResult::Failed { reason } => println!(
            "{} Duplicate {} not deleted: {}",
            "✗".red().bold(),
            report.duplicate.to_string().yellow(),
            reason
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crm_store::{Filter, Fixture};
    use serde_json::json;

    fn write_fixture(dir: &Path) -> std::path::PathBuf {
        let fixture: Fixture = serde_json::from_value(json!({
            "tables": {
                "contacts": {
                    "primary_key": "contact_id",
                    "rows": [
                        {"contact_id": "p", "first_name": "Ada", "category": "Inbox"},
                        {"contact_id": "d", "first_name": "Ada", "category": "Founder"}
                    ]
                },
                "contact_emails": {
                    "primary_key": "email_id",
                    "rows": [
                        {"email_id": 1, "contact_id": "p", "email": "a@x.com", "is_primary": true},
                        {"email_id": 2, "contact_id": "d", "email": "b@x.com", "is_primary": true}
                    ]
                },
                "interactions": {
                    "primary_key": "id",
                    "rows": [{"id": 1, "contact_id": "d"}]
                }
            }
        }))
        .unwrap();
        let path = dir.join("db.json");
        InMemoryRecordStore::from_fixture(fixture)
            .unwrap()
            .save(&path)
            .unwrap();
        path
    }

    fn merge_args(db: std::path::PathBuf, plan: Option<std::path::PathBuf>) -> MergeArgs {
        MergeArgs {
            db,
            primary: "p".into(),
            duplicate: "d".into(),
            plan,
            config: None,
            write: true,
        }
    }

    #[test]
    fn merge_with_suggestions_writes_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let db = write_fixture(dir.path());
        let plan = dir.path().join("plan.toml");
        std::fs::write(&plan, "use_suggestions = true\n").unwrap();

        cmd_merge(merge_args(db.clone(), Some(plan)), OutputFormat::Json).unwrap();

        let store = InMemoryRecordStore::load(&db).unwrap();
        assert_eq!(store.count("contacts", &Filter::all()), 1);
        let primary = &store.rows("contacts")[0];
        assert_eq!(primary["category"], json!("Founder"));
        assert_eq!(store.count("contact_emails", &Filter::eq("contact_id", "p")), 2);
        assert_eq!(store.count("interactions", &Filter::eq("contact_id", "p")), 1);
    }

    #[test]
    fn merge_without_plan_keeps_primary_scalars() {
        let dir = tempfile::tempdir().unwrap();
        let db = write_fixture(dir.path());
        cmd_merge(merge_args(db.clone(), None), OutputFormat::Json).unwrap();
        let store = InMemoryRecordStore::load(&db).unwrap();
        assert_eq!(store.rows("contacts")[0]["category"], json!("Inbox"));
    }

    #[test]
    fn failed_merge_still_writes_committed_changes() {
        let dir = tempfile::tempdir().unwrap();
        let db = write_fixture(dir.path());
        let plan = dir.path().join("plan.toml");
        std::fs::write(
            &plan,
            "[fields.category]\nchoice = \"keep-duplicate\"\n\n[fields.emails]\nmove = [\"99\"]\n",
        )
        .unwrap();

        assert!(cmd_merge(merge_args(db.clone(), Some(plan)), OutputFormat::Json).is_err());

        let store = InMemoryRecordStore::load(&db).unwrap();
        assert_eq!(store.count("contacts", &Filter::all()), 2);
        let primary = store
            .rows("contacts")
            .into_iter()
            .find(|r| r["contact_id"] == json!("p"))
            .unwrap();
        assert_eq!(primary["category"], json!("Founder"));
    }

    #[test]
    fn merge_of_unknown_contact_fails() {
        let dir = tempfile::tempdir().unwrap();
        let db = write_fixture(dir.path());
        let mut args = merge_args(db, None);
        args.duplicate = "ghost".into();
        assert!(cmd_merge(args, OutputFormat::Json).is_err());
    }

    #[test]
    fn tables_lists_registry() {
        assert!(cmd_tables(TablesArgs { config: None }, OutputFormat::Json).is_ok());
    }
}
