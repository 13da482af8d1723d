use std::sync::Arc;

use anyhow::Context;
use common_env::Config;
use linkload::scenario::{export, run};
use linkload::{Error, EXIT_THRESHOLDS_FAILED, SCENARIO_NAME};
use linkload_metrics::RunStats;
use load_executor::TokioRunner;
use log::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    //init logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let code = match execute().await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            e.downcast_ref::<Error>().map_or(1, Error::exit_code)
        }
    };
    std::process::exit(code);
}

async fn execute() -> anyhow::Result<i32> {
    let config = Config::from_env().map_err(Error::from)?;
    info!(
        "target: {}, rate: {}/s, duration: {:?}, workers: {}..{}, links: {}",
        &config.base_url,
        config.rate,
        config.duration,
        config.pre_allocated_workers,
        config.max_workers,
        config.pool_size
    );

    let stats = Arc::new(RunStats::new(SCENARIO_NAME).map_err(Error::from)?);
    let runner = TokioRunner::new(stats.clone());
    let outcome = run(&runner, &config, stats.clone())
        .await
        .context("load test aborted")?;

    println!("{}", &outcome.summary);
    export(&config, &outcome.summary, &stats).await;

    if outcome.summary.thresholds_passed() {
        Ok(0)
    } else {
        for threshold in outcome.summary.failed_thresholds() {
            warn!(
                "threshold crossed - {}: {} (observed: {:?})",
                &threshold.metric, &threshold.expression, threshold.observed
            );
        }
        Ok(EXIT_THRESHOLDS_FAILED)
    }
}
