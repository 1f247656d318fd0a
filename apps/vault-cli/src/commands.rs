use std::sync::Arc;

use anyhow::{Context, Result};
use notes_vault::infra::storage::migrations;
use notes_vault::{CutoverOutcome, EncryptionCutoverTracker, Family, PurgeScheduler, VaultConfig};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use vault_db::migration_runner::ledger_records;
use vault_db::{Db, MigrationContext, MigrationReport, StepOutcome, SystemClock};

use crate::signals;

async fn connect(config: &VaultConfig) -> Result<Db> {
    Db::connect(&config.database)
        .await
        .with_context(|| format!("opening {}", config.database.dsn))
}

fn context(db: &Db, config: &VaultConfig) -> MigrationContext {
    MigrationContext::new(db.conn().clone()).with_bootstrap_owner(config.migration.bootstrap_owner.clone())
}

fn print_report(report: &MigrationReport) {
    for step in &report.steps {
        match &step.outcome {
            StepOutcome::Deferred { reason } => {
                println!("{:>3}  {:<16} {} ({reason})", step.version, step.outcome.as_str(), step.description);
            }
            StepOutcome::Degraded { error } => {
                println!("{:>3}  {:<16} {} ({error})", step.version, step.outcome.as_str(), step.description);
            }
            StepOutcome::Applied | StepOutcome::AlreadyApplied => {
                println!("{:>3}  {:<16} {}", step.version, step.outcome.as_str(), step.description);
            }
        }
    }
}

pub async fn migrate(config: &VaultConfig) -> Result<()> {
    let db = connect(config).await?;
    let runner = migrations::runner(config.step_settings())?;
    let report = runner.run(&context(&db, config)).await?;
    print_report(&report);

    let deferred = report.deferred();
    if !deferred.is_empty() {
        tracing::warn!(?deferred, "Re-run after the remaining rows are sealed");
    }
    db.close().await?;
    Ok(())
}

pub async fn status(config: &VaultConfig, as_json: bool) -> Result<()> {
    let db = connect(config).await?;
    let runner = migrations::runner(config.step_settings())?;
    let pending_versions = runner.pending_versions(&context(&db, config)).await?;
    let ledger = ledger_records(db.conn()).await?;

    let tracker = EncryptionCutoverTracker::new(db.conn());
    let mut families = Vec::with_capacity(Family::ALL.len());
    for family in Family::ALL {
        let state = tracker.state(family).await?;
        let pending_rows = tracker.pending_rows(family).await?;
        families.push((family, state, pending_rows));
    }

    if as_json {
        let body = json!({
            "dsn": config.database.dsn,
            "applied": ledger.iter().map(|r| r.version).collect::<Vec<_>>(),
            "pending_versions": pending_versions,
            "families": families
                .iter()
                .map(|(family, state, pending)| json!({
                    "family": family,
                    "state": state,
                    "pending_rows": pending,
                }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!("database: {}", config.database.dsn);
        for record in &ledger {
            println!(
                "  v{:<3} {}  {}",
                record.version,
                record.applied_at,
                record.description.as_deref().unwrap_or("")
            );
        }
        println!("pending versions: {pending_versions:?}");
        for (family, state, pending) in &families {
            println!("  {:<10} {state:?} ({pending} unsealed)", family.as_str());
        }
    }
    db.close().await?;
    Ok(())
}

/// Attempt the cutover gate on its own; it only acts when every family is sealed.
pub async fn cutover(config: &VaultConfig) -> Result<()> {
    let db = connect(config).await?;
    let outcome = EncryptionCutoverTracker::new(db.conn()).cutover().await?;
    match outcome {
        CutoverOutcome::Completed { families, reports } => {
            let families: Vec<&str> = families.iter().copied().map(Family::as_str).collect();
            println!("plaintext columns dropped for {families:?} ({} tables rebuilt)", reports.len());
        }
        CutoverOutcome::AlreadyDropped => println!("plaintext columns were already dropped"),
        CutoverOutcome::Aborted { pending } => {
            println!("cutover aborted, unsealed live rows remain:");
            for (family, rows) in &pending {
                println!("  {:<10} {rows}", family.as_str());
            }
        }
    }
    db.close().await?;
    Ok(())
}

pub async fn purge(config: &VaultConfig, watch: bool) -> Result<()> {
    let db = connect(config).await?;
    let scheduler = PurgeScheduler::new(
        db.conn().clone(),
        config.lifecycle(),
        Arc::new(SystemClock),
        config.retention.purge_interval,
    );

    if watch {
        let cancel = CancellationToken::new();
        let handle = scheduler.spawn(cancel.clone());
        signals::wait_for_shutdown().await?;
        cancel.cancel();
        handle.await.context("purge job panicked")?;
    } else {
        let report = scheduler.run_once().await?;
        println!("purged {} rows", report.total());
        for (table, n) in report.purged.iter().chain(&report.cascaded) {
            println!("  {table:<16} {n}");
        }
        for (reference, n) in &report.detached {
            println!("  {reference:<24} {n} cleared");
        }
    }
    db.close().await?;
    Ok(())
}

/// Report the loaded configuration and what a migrate run would do.
pub async fn check(config: &VaultConfig) -> Result<()> {
    println!("Configuration is valid");
    println!("{}", serde_json::to_string_pretty(config)?);

    let db = connect(config).await?;
    let pending = migrations::runner(config.step_settings())?
        .pending_versions(&context(&db, config))
        .await?;
    if pending.is_empty() {
        println!("schema is up to date");
    } else {
        println!("pending versions: {pending:?}");
    }
    db.close().await?;
    Ok(())
}
