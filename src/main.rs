use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use passctrl::cache::memory::MemoryCache;
use passctrl::cache::Cache;
use passctrl::config::GatewayConfig;
use passctrl::pipeline::PipelineRunner;

/// PassCtrl - HTTP access-control gateway: compiles a rule chain and reports
/// it ready. The HTTP listener that drives the pipeline is a separate
/// concern (see SPEC_FULL.md "Out of scope") and is not built here.
#[derive(Parser, Debug)]
#[command(name = "passctrl")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to gateway configuration file (YAML)
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    passctrl::logging::init_subscriber()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    let yaml = std::fs::read_to_string(&args.config)
        .with_context(|| format!("failed to read {}", args.config.display()))?;
    let config = GatewayConfig::from_yaml_with_env(&yaml)
        .map_err(|e| anyhow::anyhow!("failed to parse configuration: {e}"))?;

    let compiled = config.compile().context("failed to compile gateway configuration")?;

    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new(compiled.max_cache_entries));
    let backend_client = passctrl::backend::BackendClient::new(reqwest::Client::new());
    let metrics = Arc::new(passctrl::metrics::Metrics::new());
    let _runner = PipelineRunner::new(
        compiled.directives,
        compiled.rules.clone(),
        cache,
        compiled.ttl_policy,
        backend_client,
        metrics,
    );

    tracing::info!(
        endpoint_id = %config.endpoint_id,
        rule_count = compiled.rules.len(),
        sandboxed = compiled.sandbox.is_some(),
        "gateway configuration compiled successfully"
    );

    Ok(())
}
