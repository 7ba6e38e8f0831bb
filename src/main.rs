use std::process::ExitCode;

use clap::Parser;
use tracing::warn;

use steam_degrees::cli::{resolve_db_path, Cli, Command, SearchArgs, StatsArgs};
use steam_degrees::config::{CachedOnly, RunConfig};
use steam_degrees::db::CacheStore;
use steam_degrees::error::{DegreesError, Result};
use steam_degrees::observability::{init_logging, FAILURES};
use steam_degrees::report::{render_finding, render_stats};
use steam_degrees::runner::{self, SearchReport, EXIT_CONFIG, EXIT_INTERRUPTED};
use steam_degrees::steam::memory::MemorySteam;
use steam_degrees::steam::{SteamApi, SteamWebApi};
use steam_degrees::traversal::TraversalOutcome;
use steam_degrees::types::SteamId;

fn main() -> ExitCode {
    // A missing .env is fine; real environment variables still apply.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let code = match cli.into_command() {
        Command::Stats(args) => stats(&args),
        Command::Search(args) => runtime.block_on(search(args)),
    };
    ExitCode::from(code)
}

fn stats(args: &StatsArgs) -> u8 {
    let path = resolve_db_path(args.db_file.as_ref());
    let result = CacheStore::open_existing(&path)
        .and_then(|store| store.map(|store| store.get_stats()).transpose());
    match result {
        Ok(None) => {
            println!("no cache yet at {}", path.display());
            0
        }
        Ok(Some(stats)) => {
            println!("{}\ncache file:          {}", render_stats(&stats), path.display());
            0
        }
        Err(e) => fail(&e),
    }
}

async fn search(args: SearchArgs) -> u8 {
    // Validated before any client is built from it.
    let config = match args.to_config().and_then(|config| config.validate().map(|()| config)) {
        Ok(config) => config,
        Err(e) => return fail(&e),
    };
    init_logging(config.verbosity);

    let Some(root) = args.initial_steam_id else {
        eprintln!("error: no account to start from; pass --initial-steam-id or set DEFAULT_INITIAL_STEAM_ID");
        return EXIT_CONFIG;
    };

    let path = resolve_db_path(config.cache.db_file.as_ref());
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(target: FAILURES, "could not create {}: {e}", parent.display());
        }
    }
    let store = match CacheStore::open(&path.to_string_lossy()) {
        Ok(store) => store,
        Err(e) => return fail(&e),
    };

    let result = match args.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
        Some(key) => match SteamWebApi::new(key, config.client.timeout()) {
            Ok(api) => interruptible(&config, root, &store, api).await,
            Err(e) => Err(e),
        },
        // Nothing will be fetched, so no key is needed.
        None if config.cache.cached_only == CachedOnly::All => {
            interruptible(&config, root, &store, MemorySteam::new()).await
        }
        None => Err(DegreesError::Config(
            "STEAM_API_KEY is not set (required unless --cached-only all)".into(),
        )),
    };

    match result {
        Ok(Some(report)) => print_report(&report),
        Ok(None) => {
            eprintln!("interrupted; everything fetched so far is cached");
            EXIT_INTERRUPTED
        }
        Err(e) => fail(&e),
    }
}

/// Run the search until it finishes or Ctrl-C arrives (`Ok(None)`).
async fn interruptible<A: SteamApi>(
    config: &RunConfig,
    root: SteamId,
    store: &CacheStore,
    api: A,
) -> Result<Option<SearchReport>> {
    tokio::select! {
        report = runner::search(config, root, store, api) => report.map(Some),
        _ = tokio::signal::ctrl_c() => Ok(None),
    }
}

fn print_report(report: &SearchReport) -> u8 {
    match &report.outcome {
        TraversalOutcome::Found(finding) => println!("{}", render_finding(finding, &report.profiles)),
        TraversalOutcome::Exhausted { depth } => println!(
            "No target reachable: the network ran out at {depth} degree(s) ({} accounts explored).",
            report.traversal.expanded
        ),
        TraversalOutcome::DepthLimitReached { max_depth } => println!(
            "No target within {max_depth} degree(s); raise --max-depth to search further."
        ),
    }
    report.exit_code()
}

fn fail(err: &DegreesError) -> u8 {
    eprintln!("error: {err}");
    runner::error_exit_code(err)
}
