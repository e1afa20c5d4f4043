use catalog_dice::{
    CatalogError, CatalogFilters, CatalogResolver, GenreRefreshTask, MediaType, ResolverConfig,
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{error, info};

/// Random, never-repeating catalog pages from TMDB
#[derive(Debug, Parser)]
#[command(name = "catalog-dice", version, about)]
struct Cli {
    /// TMDB API key
    #[arg(long, env = "TMDB_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Database file (defaults to the system cache directory)
    #[arg(long, env = "CATALOG_DICE_DB")]
    database: Option<PathBuf>,

    /// TMDB API base URL
    #[arg(long, env = "TMDB_BASE_URL", default_value = catalog_dice::TMDB_BASE_URL)]
    base_url: String,

    /// Minimum milliseconds between two upstream calls
    #[arg(long, default_value_t = catalog_dice::DEFAULT_MIN_REQUEST_INTERVAL.as_millis() as u64)]
    min_interval_ms: u64,

    /// Timeout in seconds for a single upstream call
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve one catalog page and print it as JSON
    Resolve(ResolveArgs),
    /// Make sure the genre taxonomy for a language is stored
    Genres {
        /// Language code, e.g. "en-US" or "fr"
        #[arg(long, default_value = catalog_dice::DEFAULT_LANGUAGE)]
        language: String,
    },
}

#[derive(Debug, Args)]
struct ResolveArgs {
    /// Content type: "movie" or "series"
    #[arg(long = "type", value_parser = parse_media_type)]
    media_type: MediaType,

    /// Catalog identifier
    #[arg(long, default_value = "random")]
    catalog: String,

    #[arg(long)]
    language: Option<String>,

    /// Genre name, e.g. "Action"
    #[arg(long)]
    genre: Option<String>,

    /// Year range, e.g. "2020-2024"
    #[arg(long)]
    year: Option<String>,

    /// Rating range, e.g. "6-8"
    #[arg(long)]
    rating: Option<String>,

    /// Upstream sort order, e.g. "popularity.desc"
    #[arg(long)]
    sort_by: Option<String>,

    /// Number of items already shown
    #[arg(long, default_value_t = 0)]
    skip: u32,

    /// Cache duration, e.g. "3d" or "12h"
    #[arg(long)]
    cache_duration: Option<String>,
}

fn parse_media_type(s: &str) -> Result<MediaType, String> {
    s.parse().map_err(|e: catalog_dice::FilterError| e.to_string())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "catalog_dice=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = ResolverConfig {
        database_path: cli.database,
        base_url: cli.base_url,
        min_request_interval: Duration::from_millis(cli.min_interval_ms),
        request_timeout: Duration::from_secs(cli.timeout_secs),
        ..Default::default()
    };

    let resolver = match CatalogResolver::open(&config) {
        Ok(resolver) => resolver,
        Err(e) => {
            error!(error = %e, "Failed to initialize resolver");
            process::exit(1);
        }
    };

    let refresh = GenreRefreshTask::start(
        resolver.genres(),
        cli.api_key.clone(),
        config.genre_refresh_interval,
    );

    let outcome = match cli.command {
        Command::Resolve(args) => {
            let filters = CatalogFilters {
                language: args.language,
                genre: args.genre,
                year: args.year,
                rating: args.rating,
                sort_by: args.sort_by,
                skip: args.skip,
            };

            resolver
                .resolve_catalog(
                    args.media_type,
                    &args.catalog,
                    &filters,
                    args.cache_duration.as_deref(),
                    &cli.api_key,
                )
                .await
                .map(|items| {
                    info!(count = items.len(), "Catalog resolved");
                    serde_json::json!({ "metas": items })
                })
        }
        Command::Genres { language } => resolver
            .ensure_genres(&language, &cli.api_key)
            .await
            .and_then(|()| {
                let genres = resolver.genres();
                let movie = genres.stored_genres(MediaType::Movie, &language)?;
                let series = genres.stored_genres(MediaType::Series, &language)?;
                Ok::<_, CatalogError>(serde_json::json!({
                    "language": language,
                    "movie": movie,
                    "series": series,
                }))
            }),
    };

    refresh.shutdown().await;

    match outcome {
        Ok(json) => match serde_json::to_string_pretty(&json) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                error!(error = %e, "Failed to serialize output");
                process::exit(1);
            }
        },
        Err(e) => {
            error!(error = %e, "Request failed");
            process::exit(1);
        }
    }
}
