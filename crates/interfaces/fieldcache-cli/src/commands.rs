use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use fieldcache_core::{
    Environment, Extent, MultiServiceProgress, ServiceConfig, ServiceId, StoredDatasetInfo,
};
use fieldcache_pipeline::{FieldCacheEngine, ServiceLeases};
use futures::StreamExt;
use humansize::{format_size, DECIMAL};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

const BAR_SCALE: u64 = 1000;

fn environment(engine: &FieldCacheEngine) -> Result<Environment> {
    engine
        .collaborators()
        .config
        .current_environment()
        .context("Failed to read environment configuration")
}

fn spinner(message: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(message.into());
    pb
}

pub fn cmd_services(engine: &FieldCacheEngine) -> Result<Vec<ServiceConfig>> {
    let env = environment(engine)?;
    println!(":: Environment: {}", env.name);
    if env.services.is_empty() {
        println!("   No services configured.");
    }
    for s in &env.services {
        let map = if s.display_on_map { "" } else { " (hidden)" };
        println!("   {:<20} {}{}", s.id, s.name, map);
        println!("   {:<20} {}", "", s.url);
    }
    Ok(env.services)
}

pub async fn cmd_datasets(engine: &FieldCacheEngine) -> Result<Vec<StoredDatasetInfo>> {
    println!(":: Cached datasets in {}", engine.collaborators().cache_root());
    let datasets = engine.catalog().list().await?;
    if datasets.is_empty() {
        println!("   None. Run `download` first.");
    }
    for d in &datasets {
        let synced = d
            .last_sync_timestamp
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "   {:<20} {:>3} layers {:>10}  last sync: {}",
            d.service_id,
            d.layer_count,
            format_size(d.file_size_bytes, DECIMAL),
            synced
        );
    }
    Ok(datasets)
}

pub async fn cmd_preflight(engine: &FieldCacheEngine) -> Result<()> {
    let env = environment(engine)?;
    let preflight = engine.preflight();
    println!(":: Preflight");

    let online = preflight.check_connectivity().await;
    println!("   Connectivity: {}", if online { "online" } else { "offline" });

    let required = preflight.estimate(&env.services);
    let status = preflight.check_storage(required).await;
    println!(
        "   Estimated:    {} for {} services",
        format_size(required, DECIMAL),
        env.services.len()
    );
    match status.warning() {
        Some(w) => println!("   Storage:      {w}"),
        None => println!("   Storage:      sufficient"),
    }

    if !online {
        bail!("Device is offline");
    }
    if status.blocks() {
        bail!("Not enough free storage to download");
    }
    Ok(())
}

/// Downloads the named services, or every configured service when `service_ids` is empty.
pub async fn cmd_download(
    engine: &FieldCacheEngine,
    service_ids: Vec<ServiceId>,
    extent: Extent,
) -> Result<MultiServiceProgress> {
    let env = environment(engine)?;
    let services = if service_ids.is_empty() {
        env.services
    } else {
        service_ids
            .iter()
            .map(|id| {
                env.service(id)
                    .cloned()
                    .ok_or_else(|| anyhow!("Service '{}' is not configured", id))
            })
            .collect::<Result<Vec<_>>>()?
    };

    let leases = ServiceLeases::new();
    let _held = services
        .iter()
        .map(|s| {
            leases
                .try_acquire(&s.id)
                .ok_or_else(|| anyhow!("Service '{}' listed more than once", s.id))
        })
        .collect::<Result<Vec<_>>>()?;

    println!(":: Downloading {} services", services.len());
    println!("   Extent: {}", extent);

    let mut stream = engine
        .download_coordinator()
        .download_all(services.clone(), extent)
        .await?;

    let m = MultiProgress::new();
    let style = ProgressStyle::with_template("{prefix:<16} {bar:40.cyan/blue} {percent:>3}% {msg}")
        .map(|s| s.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    let overall = m.add(ProgressBar::new(BAR_SCALE));
    overall.set_style(style.clone());
    overall.set_prefix("total");

    let bars: HashMap<ServiceId, ProgressBar> = services
        .iter()
        .map(|s| {
            let pb = m.add(ProgressBar::new(BAR_SCALE));
            pb.set_style(style.clone());
            pb.set_prefix(s.id.clone());
            (s.id.clone(), pb)
        })
        .collect();

    let mut last = None;
    while let Some(snapshot) = stream.next().await {
        for (id, progress) in &snapshot.per_service {
            if let Some(pb) = bars.get(id) {
                pb.set_position((progress.fraction * BAR_SCALE as f64) as u64);
                pb.set_message(progress.message.clone());
            }
        }
        overall.set_position((snapshot.overall_fraction * BAR_SCALE as f64) as u64);
        overall.set_message(snapshot.overall_message.clone());
        last = Some(snapshot);
    }

    for pb in bars.values() {
        pb.finish();
    }
    let last = last.ok_or_else(|| anyhow!("Download ended without a result"))?;
    overall.finish_with_message(last.overall_message.clone());

    if let Some(failure) = &last.error {
        bail!(
            "Download of '{}' failed: {}",
            failure.service_id,
            failure.message
        );
    }
    if !last.is_complete {
        bail!("Download did not complete");
    }

    println!("\n:: Download Result");
    for (id, progress) in &last.per_service {
        if let Some(dataset) = &progress.payload {
            println!("   {:<20} {} layers -> {}", id, dataset.layer_count, dataset.path);
        }
    }
    Ok(last)
}

pub async fn cmd_sync(engine: &FieldCacheEngine, service_id: &str) -> Result<bool> {
    println!(":: Synchronizing {}", service_id);
    let pb = spinner("Exchanging edits...");
    let result = engine.sync_job().sync(service_id).await;
    pb.finish_and_clear();

    let ok = result.map_err(|e| {
        tracing::error!(service = service_id, "sync failed: {e}");
        anyhow!(
            "Sync of '{}' failed: {}",
            service_id,
            e.category().user_message()
        )
    })?;
    println!("   Status: {}", if ok { "synchronized" } else { "not synchronized" });
    Ok(ok)
}

pub async fn cmd_sync_all(engine: &FieldCacheEngine) -> Result<BTreeMap<ServiceId, bool>> {
    println!(":: Synchronizing all services");
    let pb = spinner("Exchanging edits...");
    let results = engine.sync_all_coordinator().sync_all().await;
    pb.finish_and_clear();
    let results = results?;

    for (id, ok) in &results {
        println!("   {:<20} {}", id, if *ok { "ok" } else { "FAILED" });
    }
    let failed = results.values().filter(|ok| !**ok).count();
    if failed > 0 {
        println!("   {} of {} services failed (run with --verbose for details)", failed, results.len());
    }
    Ok(results)
}

pub async fn cmd_remove(engine: &FieldCacheEngine, service_id: &str) -> Result<()> {
    engine
        .catalog()
        .remove(service_id)
        .await
        .with_context(|| format!("Failed to remove cache for '{}'", service_id))?;
    println!(":: Removed cache for {}", service_id);
    Ok(())
}
