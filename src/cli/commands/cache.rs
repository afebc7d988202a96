//! Cache command - inspect the package cache

use crate::cache::{select_primary, CacheEntry, CacheStore};
use crate::cli::{CacheAction, CacheArgs, OutputFormat};
use crate::config::Config;
use crate::error::KcacheResult;
use crate::target::create_executor;
use crate::ui::{self, UiContext};
use console::style;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> KcacheResult<()> {
    let executor = create_executor(&config.target)?;
    let store = CacheStore::from_config(executor, &config.cache);

    match args.action {
        CacheAction::List { format } => list_entries(&store, format).await,
        CacheAction::Verify => verify_entries(&store).await,
    }
}

/// List cache entries, most recently used first
async fn list_entries(store: &CacheStore, format: OutputFormat) -> KcacheResult<()> {
    let entries = store.load().await;

    if entries.is_empty() {
        match format {
            OutputFormat::Json => println!("[]"),
            OutputFormat::Plain => {}
            OutputFormat::Table => println!("No cache entries in {}", store.path()),
        }
        return Ok(());
    }

    match format {
        OutputFormat::Table => print_table(&entries, store.max_size()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Plain => {
            for entry in &entries {
                println!("{}", entry.commit_id);
            }
        }
    }

    Ok(())
}

fn short_commit(commit_id: &str) -> &str {
    commit_id.get(..12).unwrap_or(commit_id)
}

fn print_table(entries: &[CacheEntry], max_size: usize) {
    println!(
        "{:<14} {:<24} {:<18} {:<18} {:<20}",
        style("COMMIT").bold(),
        style("VERSION").bold(),
        style("BUILT").bold(),
        style("LAST USED").bold(),
        style("BUILDER").bold()
    );
    println!("{}", "-".repeat(96));

    for entry in entries {
        println!(
            "{:<14} {:<24} {:<18} {:<18} {:<20}",
            short_commit(&entry.commit_id),
            entry.kernel_version,
            entry.build_time.format("%Y-%m-%d %H:%M"),
            entry.last_used_time.format("%Y-%m-%d %H:%M"),
            entry.builder_identity
        );
    }

    println!();
    println!("Total: {} of {} entries", entries.len(), max_size);
}

/// Report entries whose packages are missing from disk
async fn verify_entries(store: &CacheStore) -> KcacheResult<()> {
    let ctx = UiContext::detect();
    let report = store.verify_all().await?;

    if report.is_empty() {
        ui::step_info(&ctx, &format!("No cache entries in {}", store.path()));
        return Ok(());
    }

    let mut stale = 0;
    for (entry, ok) in &report {
        let label = format!("{} ({})", short_commit(&entry.commit_id), entry.kernel_version);
        match (ok, select_primary(entry.package_kind, &entry.artifact_paths)) {
            (true, Some(primary)) => ui::step_ok_detail(&ctx, &label, primary),
            (true, None) => {
                stale += 1;
                ui::step_warn_hint(&ctx, &label, "no linux-image package recorded");
            }
            (false, _) => {
                stale += 1;
                ui::step_error_detail(&ctx, &label, "packages missing on disk");
            }
        }
    }

    if stale == 0 {
        ui::outro_success(&ctx, &format!("All {} entries verified", report.len()));
    } else {
        ui::outro_warn(
            &ctx,
            &format!(
                "{} of {} entries are stale and will be rebuilt on next use",
                stale,
                report.len()
            ),
        );
    }
    Ok(())
}
