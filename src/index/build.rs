//! One full indexing run: reset, resolve, walk, bulk write.

use crate::engine::SearchEngine;
use crate::index::bulk::BulkIndexer;
use crate::index::paths::PathResolver;
use crate::index::types::{IndexPhase, IndexResult, unix_millis};
use crate::index::walker::{WalkOptions, walk};
use crate::utils::app_data::AppConfig;
use std::time::Instant;

/// Rebuild the index from the configured source directories.
///
/// `on_phase` is called as the run moves between phases. Setup failures
/// (engine reset, bad exclude patterns) end the run with
/// [`IndexResult::failure`] set; per-document failures are counted.
pub fn build_index(
    engine: &dyn SearchEngine,
    config: &AppConfig,
    resolver: &PathResolver,
    on_phase: &dyn Fn(IndexPhase),
) -> IndexResult {
    let started_at = unix_millis();
    let start = Instant::now();
    let finish = |mut result: IndexResult| {
        result.started_at = started_at;
        result.finished_at = unix_millis();
        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    };

    on_phase(IndexPhase::Resetting);
    if let Err(e) = engine.reset(config.bulk_timeout()) {
        log::error!("failed to reset {} index: {}", engine.name(), e);
        return finish(IndexResult::failed(format!("index reset failed: {}", e)));
    }

    on_phase(IndexPhase::Collecting);
    let options = match WalkOptions::from_config(config) {
        Ok(options) => options,
        Err(e) => return finish(IndexResult::failed(format!("{:#}", e))),
    };

    let entries = resolver.resolve(&config.sql_source_paths);
    for entry in entries.iter().filter(|e| !e.exists) {
        log::warn!("source path not found, skipping: {}", entry.input);
    }

    let walk = walk(&entries, options);
    let stats = walk.stats();

    on_phase(IndexPhase::Writing);
    let mut result = BulkIndexer::from_config(engine, config).index(walk);
    result.scanned_count = stats.scanned();
    result.skipped_count = stats.skipped();

    log::info!(
        "indexed {} documents ({} errors, {} skipped) from {} source paths in {:.2}s",
        result.indexed_count,
        result.error_count,
        result.skipped_count,
        entries.iter().filter(|e| e.exists).count(),
        start.elapsed().as_secs_f64()
    );

    finish(result)
}
