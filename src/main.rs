//! Pitwall - Explore and export Formula 1 data
//!
//! A command-line tool over the OpenF1 API with a local response cache and
//! JSON/CSV export.

use std::error::Error;
use std::process::ExitCode;

use clap::Parser;
use tracing::debug;

use pitwall::cache::{CacheManager, CacheStore, NoCache, TtlCategory};
use pitwall::cli::{self, CacheAction, Cli, Command, Config, ConfigError};
use pitwall::data::{FetchClient, FetchError, HttpTransport};
use pitwall::export::{self, ExportError, ExportRequest};
use pitwall::logging;
use pitwall::navigation::NavigationContext;


/// Opens the configured cache, or a store that keeps nothing
fn open_store(config: &Config) -> Box<dyn CacheStore> {
    match &config.cache_dir {
        Some(dir) => Box::new(CacheManager::with_dir(dir.clone())),
        None => Box::new(NoCache),
    }
}

fn build_client(config: &Config) -> Result<FetchClient<HttpTransport>, Box<dyn Error>> {
    let transport = HttpTransport::new(&config.base_url, config.timeout)?;
    Ok(FetchClient::new(transport, open_store(config)).with_retry_policy(config.retry))
}

async fn cmd_fetch(
    config: &Config,
    context: &NavigationContext,
    endpoint: &str,
    params: &[String],
    refresh: bool,
) -> Result<(), Box<dyn Error>> {
    let (endpoint, explicit) = cli::resolve_alias(endpoint, cli::parse_params(params)?)?;
    let params = context.resolve_params(&endpoint, &explicit);

    let mut client = build_client(config)?;
    let fetched = client.fetch(&endpoint, &params, refresh).await?;

    println!("{}", serde_json::to_string_pretty(&fetched.value)?);
    Ok(())
}

async fn cmd_export(
    config: &Config,
    context: &NavigationContext,
    request: ExportRequest,
) -> Result<(), Box<dyn Error>> {
    let mut client = build_client(config)?;
    let exported = export::export(&mut client, context, &request).await?;

    let source = if exported.from_cache { "cache" } else { "API" };
    println!(
        "Exported {} {} record(s) from {} to {}",
        exported.records,
        request.endpoint,
        source,
        exported.path.display()
    );
    if let Some(columns) = &exported.columns {
        println!("Columns: {}", columns.join(", "));
    }
    Ok(())
}

fn cmd_cache(config: &Config, action: CacheAction) -> Result<(), Box<dyn Error>> {
    let mut store = open_store(config);

    match action {
        CacheAction::Stats => {
            let stats = store.stats();
            println!("Entries: {} ({} expired)", stats.total_entries, stats.expired_count);
            println!("Size:    {} bytes", stats.total_bytes);
            if let (Some(oldest), Some(newest)) = (stats.oldest_entry, stats.newest_entry) {
                println!("Oldest:  {}", oldest.format("%Y-%m-%d %H:%M:%S UTC"));
                println!("Newest:  {}", newest.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            for (endpoint, count) in &stats.size_by_endpoint {
                println!("  {:<16} {}", endpoint, count);
            }
        }
        CacheAction::Clear { endpoint } => {
            let endpoint = endpoint
                .as_deref()
                .map(cli::validate_endpoint)
                .transpose()?
                .map(str::to_string);
            let removed = store.invalidate(endpoint.as_deref())?;
            match endpoint {
                Some(endpoint) => println!("Removed {} cached {} entr(ies)", removed, endpoint),
                None => println!("Removed {} cached entr(ies)", removed),
            }
        }
        CacheAction::Info => {
            match &config.cache_dir {
                Some(dir) => println!("Cache directory: {}", dir.display()),
                None => println!("Cache disabled"),
            }
            println!("Time to live:");
            for endpoint in ["meetings", "sessions", "drivers", "session_result", "laps", "stints", "pit", "position"] {
                let ttl = TtlCategory::for_endpoint(endpoint).ttl();
                println!("  {:<16} {} min", endpoint, ttl.as_secs() / 60);
            }
            println!("  {:<16} {} min", "(other)", TtlCategory::Default.ttl().as_secs() / 60);
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    // Everything is validated before a command touches the network or disk
    let config = Config::from_cli(&cli)?;
    let context = cli.context.to_navigation()?;
    for crumb in context.describe() {
        debug!("Context {}", crumb);
    }

    match cli.command {
        Command::Fetch {
            endpoint,
            params,
            refresh,
        } => cmd_fetch(&config, &context, &endpoint, &params, refresh).await,
        Command::Export {
            endpoint,
            params,
            format,
            refresh,
            output,
            output_dir,
        } => {
            let mut params = cli::parse_params(&params)?;
            let format = cli::take_format(&mut params)?.unwrap_or(format);
            let (endpoint, params) = cli::resolve_alias(&endpoint, params)?;

            let mut request = ExportRequest::new(endpoint, format)
                .params(params)
                .force_refresh(refresh)
                .output_dir(output_dir);
            if let Some(output) = output {
                request = request.output(output);
            }
            cmd_export(&config, &context, request).await
        }
        Command::Cache { action } => cmd_cache(&config, action),
    }
}

/// The fetch failure behind `err`, if it ended on the API's rate limit
fn rate_limited_fetch<'a>(err: &'a (dyn Error + 'static)) -> Option<&'a FetchError> {
    let fetch = match err.downcast_ref::<ExportError>() {
        Some(ExportError::Fetch { source, .. }) => Some(source),
        Some(_) => None,
        None => err.downcast_ref::<FetchError>(),
    };
    fetch.filter(|fetch| fetch.is_rate_limited())
}

fn rate_limit_hint(err: &FetchError) -> String {
    match err.retry_after() {
        Some(wait) => format!(
            "Rate limit hit on {}. The API asks to wait {}s before retrying.",
            err.endpoint(),
            wait.as_secs()
        ),
        None => format!(
            "Rate limit hit on {}. Wait a minute before retrying.",
            err.endpoint()
        ),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(fetch) = rate_limited_fetch(err.as_ref()) {
                eprintln!("{}", rate_limit_hint(fetch));
            }
            eprintln!("Error: {}", err);
            if err.downcast_ref::<ConfigError>().is_some() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
