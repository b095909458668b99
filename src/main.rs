use clap::{Args, Parser, Subcommand};
use nearby_eats::config::AppConfig;
use nearby_eats::geo::Coordinate;
use nearby_eats::location::{IpGeolocation, PositionAcquisition, PositionFix, PositionSource, UnsupportedPlatform};
use nearby_eats::venues::{
    cuisine_categories, parse_price_level, CuisineFilter, FilterSet, ProviderKind, SearchOutcome, SearchResultSet,
    VenueRecord, VenueSearchService,
};
use nearby_eats::{logging, server};
use serde::Serialize;
use std::sync::Arc;

/// Nearby Eats: find restaurants around a position.
///
/// Searches a places provider (or generated placeholder data when none is
/// configured or the provider fails), ranks venues by distance and prints
/// JSON to stdout.
///
/// Examples:
///   nearby search --lat 47.6062 --lng -122.3321
///   nearby search --lat 47.6062 --lng -122.3321 --query thai --min-rating 4
///   nearby --offline search --cuisine italian --more
///   nearby locate
///   nearby serve --port 3000
#[derive(Parser)]
#[command(name = "nearby", version, about, long_about = None)]
struct Cli {
    /// Venue provider: live, edge or synthetic. Overrides the config file.
    #[arg(long, global = true, value_parser = parse_provider)]
    provider: Option<ProviderKind>,

    /// Offline mode: no network calls. Uses generated venues and the
    /// fallback position.
    #[arg(long, global = true)]
    offline: bool,

    /// Debug logging on stderr (RUST_LOG takes precedence).
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search for venues near a coordinate.
    Search(SearchArgs),
    /// Detect the current position (IP based), with fallback.
    Locate,
    /// List the cuisine categories usable with --cuisine.
    Categories,
    /// Start the HTTP API server.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 3000)]
        port: u16,
    },
}

#[derive(Args)]
struct SearchArgs {
    /// Latitude (-90 to 90). Detected when omitted.
    #[arg(long, allow_hyphen_values = true)]
    lat: Option<f64>,

    /// Longitude (-180 to 180). Detected when omitted.
    #[arg(long, allow_hyphen_values = true)]
    lng: Option<f64>,

    /// Free-text query, e.g. "sushi".
    #[arg(long, short = 'q', default_value = "")]
    query: String,

    /// Cuisine category id (see `nearby categories`).
    #[arg(long, default_value = "all")]
    cuisine: String,

    /// Price tier 1-4, or "all".
    #[arg(long, default_value = "all")]
    price: String,

    /// Minimum rating (0-5).
    #[arg(long, default_value_t = 0.0)]
    min_rating: f64,

    /// Maximum distance in miles.
    #[arg(long)]
    max_distance: Option<f64>,

    /// Also fetch the next page when the provider offers one.
    #[arg(long)]
    more: bool,
}

fn parse_provider(s: &str) -> Result<ProviderKind, String> {
    s.parse()
}

#[derive(Serialize)]
struct PositionOutput {
    lat: f64,
    lng: f64,
    formatted: String,
    origin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
}

impl From<PositionFix> for PositionOutput {
    fn from(fix: PositionFix) -> Self {
        Self {
            lat: fix.coordinate.lat,
            lng: fix.coordinate.lng,
            formatted: fix.coordinate.to_string(),
            origin: fix.origin.to_string().to_lowercase(),
            error: fix.error.map(|e| e.to_string()),
            message: fix.message(),
        }
    }
}

#[derive(Serialize)]
struct SearchOutput {
    center: Coordinate,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<PositionOutput>,
    provider: ProviderKind,
    synthetic: bool,
    from_cache: bool,
    total: usize,
    count: usize,
    has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    venues: Vec<VenueRecord>,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = load_config(&cli);

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Error: Cannot start async runtime: {}", e);
        std::process::exit(1);
    });

    match &cli.command {
        Command::Search(args) => runtime.block_on(run_search(&cli, &config, args)),
        Command::Locate => {
            let source = position_source(&cli, &config);
            let fix = runtime.block_on(source.request_position());
            print_json(&PositionOutput::from(fix));
        }
        Command::Categories => print_json(&cuisine_categories()),
        Command::Serve { host, port } => {
            let provider = build_provider(&config);
            let acquisition = acquisition(&cli);
            runtime.block_on(async {
                let state = server::prepare(&config, provider, acquisition).await;
                if let Err(e) = server::start(host, *port, state).await {
                    eprintln!("Error: Server failed on {}:{}: {}", host, port, e);
                    std::process::exit(1);
                }
            });
        }
    }
}

fn load_config(cli: &Cli) -> AppConfig {
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });
    if cli.offline {
        config.provider = Some(ProviderKind::Synthetic);
    } else if let Some(kind) = cli.provider {
        config.provider = Some(kind);
    }
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    config
}

fn build_provider(config: &AppConfig) -> Arc<dyn nearby_eats::venues::VenueProvider> {
    config.build_provider().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    })
}

fn acquisition(cli: &Cli) -> Arc<dyn PositionAcquisition> {
    if cli.offline {
        Arc::new(UnsupportedPlatform)
    } else {
        Arc::new(IpGeolocation::new())
    }
}

fn position_source(cli: &Cli, config: &AppConfig) -> PositionSource {
    PositionSource::with_options(acquisition(cli), config.acquisition_options(), config.fallback)
}

async fn run_search(cli: &Cli, config: &AppConfig, args: &SearchArgs) {
    let (center, position) = match (args.lat, args.lng) {
        (Some(lat), Some(lng)) => match Coordinate::checked(lat, lng) {
            Ok(c) => (c, None),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        (None, None) => {
            let fix = position_source(cli, config).request_position().await;
            if let Some(message) = fix.message() {
                eprintln!("  {}", message);
            }
            (fix.coordinate, Some(PositionOutput::from(fix)))
        }
        _ => {
            eprintln!("Error: Provide both --lat and --lng, or neither.");
            std::process::exit(1);
        }
    };

    let price_level = parse_price_level(&args.price).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });
    let filters = FilterSet {
        cuisine: args.cuisine.parse::<CuisineFilter>().unwrap_or_default(),
        price_level,
        min_rating: args.min_rating,
        max_distance_miles: args.max_distance,
    };

    let service = VenueSearchService::new(build_provider(config), config.search_settings());
    let mut outcome = match service.search(center, &args.query, &filters).await {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if args.more && outcome.has_more() {
        match service.load_more_current().await {
            Ok(more) => outcome = more,
            Err(e) => eprintln!("  Could not load more results: {}", e),
        }
    }

    if let Some(e) = &outcome.error {
        eprintln!("  Provider failed ({}); showing generated venues.", e);
    }

    print_json(&search_output(center, position, outcome));
}

fn search_output(center: Coordinate, position: Option<PositionOutput>, outcome: SearchOutcome) -> SearchOutput {
    let results: &SearchResultSet = &outcome.results;
    SearchOutput {
        center,
        position,
        provider: results.provider,
        synthetic: results.synthetic,
        from_cache: outcome.from_cache,
        total: results.venues.len(),
        count: outcome.venues.len(),
        has_more: results.has_more(),
        error: outcome.error.as_ref().map(|e| e.to_string()),
        venues: outcome.venues,
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error: Cannot serialize output: {}", e);
            std::process::exit(1);
        }
    }
}
