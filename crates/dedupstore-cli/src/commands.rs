//! Subcommand implementations.

use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tracing::info;

use dedupstore_core::{format_bytes, ContentHasher, StoreConfig};
use dedupstore_db::{Database, LegacyMigrationRepository, ObjectRepository, PoolConfig};
use dedupstore_engine::{
    analyse_directory, DiskRegistry, EngineOptions, LegacyMigrator, MigrationOptions,
    MigrationReport, Reconciler, RollbackReport, StorageEngine, SweepOptions, SweepReport,
};

use crate::{Cli, Commands};

pub async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;
    let json = cli.json;

    match cli.command {
        Commands::Analyse { directory, top } => cmd_analyse(&config, &directory, top, json).await,
        Commands::MigrateLegacy {
            base_dir,
            disk,
            chunk,
            dry_run,
            force,
            keep_backups,
        } => {
            let options = MigrationOptions {
                disk,
                chunk_size: chunk,
                dry_run,
                keep_backups,
            };
            cmd_migrate(&config, &base_dir, &options, force, json).await
        }
        Commands::RollbackLegacy {
            base_dir,
            dry_run,
            force,
        } => cmd_rollback(&config, &base_dir, dry_run, force, json).await,
        Commands::Cleanup {
            dry_run,
            force,
            chunk,
        } => {
            let options = SweepOptions {
                chunk_size: chunk,
                dry_run,
            };
            cmd_cleanup(&config, &options, force, json).await
        }
        Commands::Stats => cmd_stats(&config, json).await,
        Commands::Check => cmd_check(&config).await,
        Commands::Init => cmd_init(&config).await,
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<StoreConfig> {
    let config = match path {
        Some(path) => {
            let config = StoreConfig::from_file(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            config.validate()?;
            config
        }
        None => StoreConfig::load()?,
    };
    Ok(config)
}

async fn connect(config: &StoreConfig) -> anyhow::Result<Database> {
    let pool_config = PoolConfig::from_database_config(&config.database);
    Database::connect_with_config(&config.database.url, pool_config)
        .await
        .context("failed to connect to database")
}

fn build_engine(db: &Database, config: &StoreConfig) -> anyhow::Result<Arc<StorageEngine>> {
    Ok(Arc::new(StorageEngine::new(
        db.object_repository(),
        db.link_repository(),
        DiskRegistry::from_config(config)?,
        EngineOptions::from_config(config),
    )))
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// ANALYSE
// =============================================================================

async fn cmd_analyse(
    config: &StoreConfig,
    directory: &Path,
    top: usize,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let hasher = ContentHasher::new(config.hashing.chunk_size);
    let analysis = analyse_directory(directory, &hasher).await?;
    if json {
        print_json(&analysis)?;
        return Ok(ExitCode::SUCCESS);
    }

    println!("=== Analysis Results ===");
    println!("Total files processed: {}", analysis.total_files);
    println!("Total files size:      {}", format_bytes(analysis.total_bytes));
    println!("Duplicate files:       {}", analysis.duplicate_files);
    println!("Duplicates size:       {}", format_bytes(analysis.duplicate_bytes));
    if analysis.unreadable > 0 {
        println!("Unreadable files:      {}", analysis.unreadable);
    }
    if analysis.duplicate_files > 0 {
        println!();
        println!(
            "Potential disk space savings: {} [{:.2} %]",
            format_bytes(analysis.potential_savings),
            analysis.savings_percent()
        );
        for group in analysis.groups.iter().take(top) {
            println!();
            println!(
                "{} ({} copies of {})",
                group.hash,
                group.paths.len(),
                format_bytes(group.size)
            );
            for path in &group.paths {
                println!("    {}", path.display());
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

// =============================================================================
// LEGACY MIGRATION
// =============================================================================

async fn cmd_migrate(
    config: &StoreConfig,
    base_dir: &Path,
    options: &MigrationOptions,
    force: bool,
    json: bool,
) -> anyhow::Result<ExitCode> {
    if !base_dir.is_dir() {
        anyhow::bail!("base directory does not exist: {}", base_dir.display());
    }
    if !options.dry_run
        && !force
        && !confirm(&format!("This will migrate legacy files under {}. Continue?", base_dir.display()))?
    {
        println!("Operation cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    let db = connect(config).await?;
    let migrator = LegacyMigrator::new(build_engine(&db, config)?, db.legacy_repository());
    let report = migrator.migrate(base_dir, options).await?;

    if json {
        print_json(&report)?;
    } else {
        print_migration_report(&report);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_migration_report(report: &MigrationReport) {
    println!();
    println!("Migration Summary{}:", if report.dry_run { " (dry run)" } else { "" });
    println!("   Files discovered:  {}", report.discovered);
    println!("   Files processed:   {}", report.processed);
    println!("   Duplicates found:  {}", report.duplicates);
    println!("   Symlinks created:  {}", report.symlinks_created);
    if report.skipped > 0 {
        println!("   Skipped:           {}", report.skipped);
    }
    if report.duplicates > 0 {
        println!("   Space reclaimable: {}", format_bytes(report.reclaimable_bytes));
    }
    println!("   Errors:            {}", report.errors());
    for failure in &report.failures {
        println!("     {}: {}", failure.path.display(), failure.message);
    }
    if !report.warnings.is_empty() {
        println!("   Warnings:          {}", report.warnings.len());
        for warning in &report.warnings {
            println!("     {}: {}", warning.path.display(), warning.message);
        }
    }
    if let Some(backups) = &report.backups {
        println!("   Backups removed:   {}", backups.removed);
        for failure in &backups.errors {
            println!("     could not remove {}: {}", failure.path.display(), failure.message);
        }
    }
    if report.dry_run {
        println!();
        println!("Dry run completed. Review the output above before running without --dry-run");
    }
}

async fn cmd_rollback(
    config: &StoreConfig,
    base_dir: &Path,
    dry_run: bool,
    force: bool,
    json: bool,
) -> anyhow::Result<ExitCode> {
    if !base_dir.is_dir() {
        anyhow::bail!("base directory does not exist: {}", base_dir.display());
    }
    if !dry_run
        && !force
        && !confirm(&format!("This will restore migrated files under {}. Continue?", base_dir.display()))?
    {
        println!("Operation cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    let db = connect(config).await?;
    let migrator = LegacyMigrator::new(build_engine(&db, config)?, db.legacy_repository());
    let report = migrator.rollback(base_dir, dry_run).await?;

    if json {
        print_json(&report)?;
    } else {
        print_rollback_report(&report);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_rollback_report(report: &RollbackReport) {
    println!();
    println!("Rollback Summary{}:", if report.dry_run { " (dry run)" } else { "" });
    println!("   Files restored:    {}", report.restored);
    println!("   Unrestorable:      {}", report.unrestorable.len());
    for entry in &report.unrestorable {
        println!("     {}: {}", entry.path.display(), entry.reason);
    }
    println!("   Errors:            {}", report.failures.len());
    for failure in &report.failures {
        println!("     {}: {}", failure.path.display(), failure.message);
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

#[derive(Serialize)]
struct CleanupReport {
    orphaned_links: SweepReport,
    orphaned_objects: SweepReport,
}

async fn cmd_cleanup(
    config: &StoreConfig,
    options: &SweepOptions,
    force: bool,
    json: bool,
) -> anyhow::Result<ExitCode> {
    if !options.dry_run
        && !force
        && !confirm("This will delete orphaned links and unreferenced files. Continue?")?
    {
        println!("Operation cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    let db = connect(config).await?;
    let reconciler = Reconciler::new(build_engine(&db, config)?);
    let report = CleanupReport {
        orphaned_links: reconciler.sweep_orphaned_links(options).await?,
        orphaned_objects: reconciler.sweep_orphaned_objects(options).await?,
    };

    if json {
        print_json(&report)?;
        return Ok(ExitCode::SUCCESS);
    }

    let verb = if options.dry_run { "Would delete" } else { "Deleted" };
    println!("{} {} orphaned link(s)", verb, report.orphaned_links.affected);
    println!(
        "{} {} orphaned file(s), {}",
        verb,
        report.orphaned_objects.affected,
        format_bytes(report.orphaned_objects.bytes_reclaimed)
    );
    let errors: Vec<&String> = report
        .orphaned_links
        .errors
        .iter()
        .chain(&report.orphaned_objects.errors)
        .collect();
    if !errors.is_empty() {
        println!("Errors: {}", errors.len());
        for error in errors {
            println!("   {}", error);
        }
    }
    Ok(ExitCode::SUCCESS)
}

// =============================================================================
// STATS / CHECK / INIT
// =============================================================================

async fn cmd_stats(config: &StoreConfig, json: bool) -> anyhow::Result<ExitCode> {
    let db = connect(config).await?;
    let stats = db.objects.stats().await?;
    let migrations = db.legacy.count_by_status().await?;

    if json {
        let migrations: Vec<_> = migrations
            .iter()
            .map(|(status, count)| serde_json::json!({ "status": status, "count": count }))
            .collect();
        print_json(&serde_json::json!({ "storage": stats, "legacy_migrations": migrations }))?;
        return Ok(ExitCode::SUCCESS);
    }

    println!("File Storage Statistics");
    println!();
    println!("   Total files:              {}", stats.total_objects);
    println!("   Total relationships:      {}", stats.total_links);
    println!("   Files with relationships: {}", stats.linked_objects);
    println!("   Orphaned files:           {}", stats.orphaned_objects);
    println!(
        "   Total storage used:       {}",
        format_bytes(stats.total_bytes.max(0) as u64)
    );
    if !stats.by_disk.is_empty() {
        println!();
        println!("Disk usage");
        for disk in &stats.by_disk {
            println!(
                "   {:<16} {:>10} files  {:>12}",
                disk.disk,
                disk.objects,
                format_bytes(disk.bytes.max(0) as u64)
            );
        }
    }
    if !stats.by_type.is_empty() {
        println!();
        println!("File types");
        for group in &stats.by_type {
            println!("   {:<16} {:>10} files", group.mime_group, group.objects);
        }
    }
    if !migrations.is_empty() {
        println!();
        println!("Legacy migrations");
        for (status, count) in &migrations {
            println!("   {:<16} {:>10}", status.to_string(), count);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn report_check(name: &str, result: Result<(), String>) -> bool {
    match result {
        Ok(()) => {
            println!("[ok]     {}", name);
            true
        }
        Err(e) => {
            println!("[failed] {}: {}", name, e);
            false
        }
    }
}

async fn cmd_check(config: &StoreConfig) -> anyhow::Result<ExitCode> {
    let mut ready = true;

    match connect(config).await {
        Ok(db) => {
            ready &= report_check("database connected", db.ping().await.map_err(|e| e.to_string()));
            for check in db.check_tables().await {
                ready &= report_check(
                    &format!("table {}", check.table),
                    check.error.map_or(Ok(()), Err),
                );
            }
        }
        Err(e) => {
            ready &= report_check("database connected", Err(format!("{:#}", e)));
        }
    }

    match DiskRegistry::from_config(config) {
        Ok(disks) => {
            let name = disks.default_disk().to_string();
            let result = match disks.get(&name) {
                Ok(backend) => backend.validate().await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            ready &= report_check(&format!("disk '{}' writable", name), result);
        }
        Err(e) => {
            ready &= report_check("storage configured", Err(e.to_string()));
        }
    }

    if ready {
        println!("Store is ready to use.");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("Store is NOT ready to use.");
        Ok(ExitCode::FAILURE)
    }
}

async fn cmd_init(config: &StoreConfig) -> anyhow::Result<ExitCode> {
    let db = connect(config).await?;
    db.migrate().await.context("failed to apply migrations")?;
    info!(subsystem = "cli", op = "init", "Database migrations applied");
    println!("Database schema is up to date.");
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("no"));
    }

    #[test]
    fn test_load_config_from_explicit_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[database]
url = "postgres://localhost/dedupstore_test"

[storage]
default_disk = "public"

[storage.disks.public]
kind = "local"
root = "/var/lib/dedupstore"
"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.storage.default_disk, "public");
        assert_eq!(config.database.url, "postgres://localhost/dedupstore_test");
    }

    #[test]
    fn test_load_config_missing_file_fails() {
        assert!(load_config(Some(Path::new("/nonexistent/dedupstore.toml"))).is_err());
    }
}
