//! `update-datasets`: refresh every configured campaign table and counter.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::Parser;
use color_eyre::eyre::{Context, Result, eyre};
use mockable::{Clock, DefaultClock};
use ortho_config::OrthoConfig;
use tokio::runtime::Builder;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use collector::campaign_registry::CampaignRegistry;
use collector::domain::ports::ResponseCache;
use collector::domain::{
    ApiClientPorts, DatasetUpdater, RateLimitedClient, TokioSleeper, UpdaterPorts,
};
use collector::outbound::cache::{DisabledResponseCache, FileResponseCache};
use collector::outbound::minka::{MinkaHttpSource, request_access_token};
use collector::outbound::persistence::CsvDatasetRepository;
use collector::outbound::taxonomy::TaxonTreeReference;
use collector::settings::{Authentication, CollectorSettings};

/// `update-datasets` command arguments.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "update-datasets",
    about = "Refresh campaign metric, participation and species tables from the observation API",
    version
)]
struct CliArgs {
    /// Campaign registry JSON file.
    #[arg(long = "campaigns", value_name = "path")]
    campaigns: PathBuf,
    /// Only refresh the named campaign. Repeatable.
    #[arg(long = "only", value_name = "name")]
    only: Vec<String>,
    /// Do not refresh global counters.
    #[arg(long = "skip-counters")]
    skip_counters: bool,
    /// Treat this date (`YYYY-MM-DD`) as today.
    #[arg(long = "today", value_name = "date")]
    today: Option<NaiveDate>,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = CliArgs::parse();
    let settings = CollectorSettings::load_from_iter([OsString::from("update-datasets")])
        .map_err(|error| eyre!("failed to load collector settings: {error}"))?;
    init_tracing(settings.log_json());

    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .wrap_err("create Tokio runtime")?;
    runtime.block_on(run(args, settings))
}

fn init_tracing(json: bool) {
    let result = if json {
        fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .json()
            .try_init()
    } else {
        fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init()
    };
    if let Err(error) = result {
        warn!(error = %error, "tracing init failed");
    }
}

fn resolve_today(requested: Option<NaiveDate>, actual: NaiveDate) -> Result<NaiveDate> {
    match requested {
        Some(date) if date > actual => Err(eyre!(
            "--today {date} is in the future (current date is {actual})"
        )),
        Some(date) => Ok(date),
        None => Ok(actual),
    }
}

async fn run(args: CliArgs, settings: CollectorSettings) -> Result<()> {
    let today = resolve_today(args.today, DefaultClock.utc().date_naive())?;
    let registry = CampaignRegistry::load(&args.campaigns)?;
    let campaigns = registry.select(&args.only)?;

    let timeout = settings.request_timeout();
    let authorization = match settings.authentication()? {
        Authentication::Anonymous => None,
        Authentication::Token(token) => Some(token),
        Authentication::OAuth(credentials) => request_access_token(&credentials, timeout).await,
    };
    let api = MinkaHttpSource::new(settings.api_base_url()?, timeout, authorization)
        .wrap_err("build observation API client")?;

    let cache: Arc<dyn ResponseCache> = match settings.cache_dir()? {
        Some(dir) => Arc::new(
            FileResponseCache::open(&dir)
                .wrap_err_with(|| format!("open response cache at {dir}"))?,
        ),
        None => Arc::new(DisabledResponseCache::new()),
    };
    let sleeper = Arc::new(TokioSleeper);
    let client = Arc::new(RateLimitedClient::new(
        ApiClientPorts::new(Arc::new(api), cache),
        Arc::new(DefaultClock),
        sleeper.clone(),
        settings.client_policy()?,
    ));

    let data_dir = settings.data_dir()?;
    let taxonomy = TaxonTreeReference::new(settings.taxon_tree_url()?, &data_dir, timeout)
        .wrap_err("prepare taxon tree reference")?;
    let updater = DatasetUpdater::new(
        UpdaterPorts::new(
            client,
            Arc::new(CsvDatasetRepository::new(data_dir)),
            Arc::new(taxonomy),
            sleeper,
        ),
        settings.series_schedule(),
    );

    let mut failed = 0;
    for campaign in campaigns {
        let report = updater.update_campaign(campaign, today).await;
        report.log();
        failed += report.failed();
    }
    if args.skip_counters {
        info!("skipping global counters");
    } else if !registry.counters().is_empty() {
        let report = updater.update_counters(registry.counters()).await;
        report.log();
        failed += report.failed();
    }

    if failed > 0 {
        warn!(failed, "some tables could not be refreshed");
    }
    info!(%today, "dataset update finished");
    Ok(())
}
