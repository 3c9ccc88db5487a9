//! CLI entry point for the sitemap keyword enrichment pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use sitemap_keyword_pipeline::adaptive::ConcurrencyManager;
use sitemap_keyword_pipeline::collaborators::{
    AnalyticsClient, HttpAnalyticsClient, HttpDownstreamSubmitter, HttpSitemapParser,
    KeywordExtractor, PathKeywordExtractor, SitemapParser,
};
use sitemap_keyword_pipeline::config::{self, ConcurrencyConfig, PipelineConfig};
use sitemap_keyword_pipeline::pipeline::types::SitemapRef;
use sitemap_keyword_pipeline::rate_limit::RateLimiterPool;
use sitemap_keyword_pipeline::store::EncryptedStore;
use sitemap_keyword_pipeline::{Orchestrator, RetryProcessor, SubmissionPool, Tracker};

#[derive(Parser)]
#[command(name = "sitemap-keyword-pipeline", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a full pipeline pass: extract, dedupe+filter, enrich, submit.
    Run {
        /// One sitemap feed URL. May be repeated.
        #[arg(long = "sitemap")]
        sitemaps: Vec<String>,
        /// A file with one sitemap feed URL per line.
        #[arg(long)]
        sitemaps_file: Option<PathBuf>,
    },
    /// Drain only the persisted failed-keyword retry backlog and exit.
    RetryOnly,
    /// Write JSON summaries of the persisted idempotency store.
    Export {
        #[arg(long, default_value = "./export")]
        output_dir: PathBuf,
    },
}

fn build_http_client() -> Result<Client> {
    Client::builder()
        .pool_max_idle_per_host(20)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .context("building shared HTTP client")
}

async fn open_tracker(config: &PipelineConfig) -> Result<Arc<Tracker>> {
    let store = EncryptedStore::open(&config.data_dir, &config.encryption_key)
        .context("opening encrypted idempotency store")?;
    Ok(Arc::new(
        Tracker::open(store).await.context("loading idempotency store")?,
    ))
}

fn load_sitemaps(sitemaps: Vec<String>, sitemaps_file: Option<PathBuf>) -> Result<Vec<SitemapRef>> {
    let mut urls = sitemaps;
    if let Some(path) = sitemaps_file {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("reading sitemaps file {}", path.display()))?;
        urls.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string),
        );
    }
    Ok(urls.into_iter().map(SitemapRef::new).collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = config::load_from_env().context("loading pipeline configuration")?;

    match cli.command {
        Command::Run { sitemaps, sitemaps_file } => run_pipeline(config, sitemaps, sitemaps_file).await,
        Command::RetryOnly => run_retry_only(config).await,
        Command::Export { output_dir } => run_export(config, output_dir).await,
    }
}

async fn run_pipeline(config: PipelineConfig, sitemaps: Vec<String>, sitemaps_file: Option<PathBuf>) -> Result<()> {
    let sitemaps = load_sitemaps(sitemaps, sitemaps_file)?;
    if sitemaps.is_empty() {
        anyhow::bail!("no sitemaps given; pass --sitemap or --sitemaps-file");
    }

    let client = build_http_client()?;
    let tracker = open_tracker(&config).await?;
    let concurrency = Arc::new(ConcurrencyManager::new(ConcurrencyConfig::default()));
    let rate_limiters = Arc::new(RateLimiterPool::new());

    let parser: Arc<dyn SitemapParser> = Arc::new(HttpSitemapParser::new(client.clone()));
    let extractor: Arc<dyn KeywordExtractor> = Arc::new(PathKeywordExtractor);
    let analytics: Arc<dyn AnalyticsClient> = Arc::new(HttpAnalyticsClient::new(
        client.clone(),
        config.trends_api_urls.clone(),
        config.trends_api_url_secondary.clone(),
    ));
    let downstream = Arc::new(HttpDownstreamSubmitter::new(
        client,
        config.backend_base_url.clone(),
        config.backend_api_key.clone(),
        config.batch_size,
    ));
    let submission = Arc::new(SubmissionPool::new(downstream));

    let cancel = CancellationToken::new();

    // C6: drain the retry backlog on a supervised background task.
    // Spawned, never awaited before Phase E dispatches new work, so it
    // can't block the main run (spec §4.6).
    let retry_processor = Arc::new(RetryProcessor::new(
        Arc::clone(&tracker),
        Arc::clone(&analytics),
        Arc::clone(&submission),
        config.analytics_batch_size,
    ));
    let retry_handle = retry_processor.spawn(cancel.clone());

    let orchestrator = Orchestrator::new(
        Arc::clone(&concurrency),
        Arc::clone(&rate_limiters),
        Arc::clone(&tracker),
        Arc::clone(&submission),
        parser,
        extractor,
        analytics,
        config.analytics_batch_size,
    );

    let report = orchestrator.run(sitemaps, &cancel).await;
    drop(orchestrator);

    match tokio::time::timeout(Duration::from_secs(5), retry_handle).await {
        Ok(Ok(submitted)) if submitted > 0 => {
            log::info!("retry processor submitted {submitted} previously-failed keyword(s)");
        }
        Ok(Ok(_)) => {}
        Ok(Err(e)) => log::warn!("retry processor task failed: {e}"),
        Err(_) => log::warn!("retry processor still running after run completion; leaving it detached"),
    }

    rate_limiters.close();
    match Arc::try_unwrap(submission) {
        Ok(pool) => pool.stop().await,
        Err(_) => log::debug!("submission pool still referenced elsewhere; skipping explicit drain"),
    }

    for result in &report.sitemap_results {
        if result.success {
            log::info!("sitemap ok: {} ({} url(s))", result.sitemap_url, result.url_count);
        } else {
            log::warn!(
                "sitemap failed: {} ({})",
                result.sitemap_url,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    log::info!(
        "run complete: {} keyword(s) submitted, {} keyword(s) failed",
        report.keywords_submitted,
        report.keywords_failed
    );

    if report.any_sitemap_succeeded() {
        Ok(())
    } else {
        anyhow::bail!("no sitemap was successfully enriched this run");
    }
}

async fn run_retry_only(config: PipelineConfig) -> Result<()> {
    let client = build_http_client()?;
    let tracker = open_tracker(&config).await?;
    let analytics: Arc<dyn AnalyticsClient> = Arc::new(HttpAnalyticsClient::new(
        client.clone(),
        config.trends_api_urls.clone(),
        config.trends_api_url_secondary.clone(),
    ));
    let downstream = Arc::new(HttpDownstreamSubmitter::new(
        client,
        config.backend_base_url.clone(),
        config.backend_api_key.clone(),
        config.batch_size,
    ));
    let submission = Arc::new(SubmissionPool::new(downstream));

    let processor = Arc::new(RetryProcessor::new(
        tracker,
        analytics,
        Arc::clone(&submission),
        config.analytics_batch_size,
    ));
    let cancel = CancellationToken::new();
    let submitted = processor
        .spawn(cancel)
        .await
        .context("retry processor task panicked")?;
    log::info!("retry-only: submitted {submitted} previously-failed keyword(s)");

    if let Ok(pool) = Arc::try_unwrap(submission) {
        pool.stop().await;
    }
    Ok(())
}

async fn run_export(config: PipelineConfig, output_dir: PathBuf) -> Result<()> {
    std::fs::create_dir_all(&output_dir).context("creating export output directory")?;
    let tracker = open_tracker(&config).await?;

    let failed = tracker.get_retryable().await;
    let mut by_sitemap: std::collections::HashMap<String, Vec<&sitemap_keyword_pipeline::store::FailedKeywordRecord>> =
        std::collections::HashMap::new();
    for record in &failed {
        by_sitemap.entry(record.sitemap_url.clone()).or_default().push(record);
    }

    let failed_path = output_dir.join("failed-keywords.json");
    std::fs::write(&failed_path, serde_json::to_vec_pretty(&by_sitemap)?)
        .with_context(|| format!("writing {}", failed_path.display()))?;

    const PROCESSED_SAMPLE_SIZE: usize = 1_000;
    let (processed_total, processed_sample) = tracker.processed_sample(PROCESSED_SAMPLE_SIZE).await;
    let processed = serde_json::json!({
        "total_processed": processed_total,
        "sample_size": processed_sample.len(),
        "sample_url_hashes": processed_sample,
    });
    let processed_path = output_dir.join("processed-urls-sample.json");
    std::fs::write(&processed_path, serde_json::to_vec_pretty(&processed)?)
        .with_context(|| format!("writing {}", processed_path.display()))?;

    let report = serde_json::json!({
        "report_time": unix_timestamp_now(),
        "total_failed": failed.len(),
        "total_processed": processed_total,
        "data_directory": config.data_dir.display().to_string(),
    });
    let report_path = output_dir.join("report.json");
    std::fs::write(&report_path, serde_json::to_vec_pretty(&report)?)
        .with_context(|| format!("writing {}", report_path.display()))?;

    log::info!("export written to {}", output_dir.display());
    Ok(())
}

fn unix_timestamp_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
