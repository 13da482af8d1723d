//! The redirect scenario end to end: setup, workload, summary.

use std::path::Path;
use std::sync::Arc;

use common_env::Config;
use linkload_http::ExecutorSpec;
use linkload_metrics::{RunStats, RunSummary, ThresholdSet};
use load_executor::{ExecutionReport, Runner};
use log::{error, info};

use crate::http_util::client;
use crate::log_error;
use crate::provisioner::provision;
use crate::workload::RedirectProbe;
use crate::Error;

#[derive(Debug)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub report: ExecutionReport,
}

/// Provisions the link pool, then runs the lookups under `config`'s executor.
///
/// Thresholds are parsed before anything is sent, and no lookup starts unless setup produced at
/// least one code.
pub async fn run<R>(runner: &R, config: &Config, stats: Arc<RunStats>) -> Result<RunOutcome, Error>
where
    R: Runner,
{
    let thresholds = ThresholdSet::with_defaults(config.max_error_rate, config.max_p95)?;
    let spec = ExecutorSpec::from(config);
    let client = client();

    let pool = runner
        .run_setup_once(provision(&client, config, &stats))
        .await?;

    info!(
        "[scenario::run] - starting {} with {} codes in the pool",
        spec.name(),
        pool.len()
    );
    let probe = Arc::new(RedirectProbe::new(
        client,
        &config.base_url,
        Arc::new(pool),
        stats.clone(),
        config.request_timeout,
        config.iteration_pause,
    ));
    let report = runner.run_iterations_concurrently(probe, &spec).await;
    let summary = stats.summarize(spec.name(), &thresholds);
    Ok(RunOutcome { summary, report })
}

/// Writes the summary as json and the metrics in prometheus text format, if configured.
/// Failures are logged; the run result stands regardless.
pub async fn export(config: &Config, summary: &RunSummary, stats: &RunStats) {
    if let Some(path) = &config.summary_export {
        match serde_json::to_vec_pretty(summary) {
            Ok(json) => log_error!(write(path, &json).await),
            Err(e) => error!("[export] - failed to serialize summary - {}", e),
        }
    }
    if let Some(path) = &config.metrics_export {
        match stats.metrics().encode() {
            Ok(text) => log_error!(write(path, text.as_bytes()).await),
            Err(e) => error!("[export] - failed to encode metrics - {}", e),
        }
    }
}

async fn write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(path, contents).await?;
    info!("[export] - written {}", path.display());
    Ok(())
}
