use std::{
    env,
    fs::OpenOptions,
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use axum::{
    Router,
    extract::{MatchedPath, Request},
    middleware,
};
use axum_server::Handle;
use clap::Parser;
use rusqlite::Connection;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{Layer, filter, layer::SubscriberExt, util::SubscriberInitExt};

use aa_bridge::{
    AggregatorConfig, AppState, DEFAULT_QUEUE_CAPACITY, FetchQueue, HttpProvider, MockProvider,
    ProviderGateway, RetryingProvider, build_router, graceful_shutdown, logging_middleware,
    run_scheduled_fetch, spawn_fetch_worker,
};

/// The Account Aggregator bridge server.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the application SQLite database.
    #[arg(long)]
    db_path: String,

    /// The port to serve the API from.
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// Use an in-memory mock aggregator instead of the HTTP API, for local development.
    #[arg(long)]
    mock_provider: bool,

    /// Seconds between scheduled fetches over all active bank links. 0 disables the schedule.
    #[arg(long, default_value_t = 3600)]
    fetch_interval_secs: u64,
}

#[tokio::main]
async fn main() {
    setup_logging();

    let args = Args::parse();

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));

    let config = AggregatorConfig {
        webhook_secret: env::var("AA_WEBHOOK_SECRET")
            .expect("The environment variable 'AA_WEBHOOK_SECRET' must be set"),
        api_key: env::var("AA_API_KEY").unwrap_or_default(),
        base_url: env::var("AA_BASE_URL").unwrap_or_default(),
        ..Default::default()
    };

    let provider: Arc<dyn ProviderGateway> = if args.mock_provider {
        tracing::warn!("Using the mock aggregator, no real bank data will be fetched");
        Arc::new(RetryingProvider::new(
            MockProvider::new(),
            config.retry,
            config.call_timeout,
        ))
    } else {
        assert!(
            !config.base_url.is_empty(),
            "The environment variable 'AA_BASE_URL' must be set unless --mock-provider is used"
        );
        let http = HttpProvider::new(&config.base_url, &config.api_key, config.call_timeout)
            .expect("Could not create the aggregator HTTP client");
        Arc::new(RetryingProvider::new(http, config.retry, config.call_timeout))
    };

    let conn = Connection::open(&args.db_path).expect("Could not open the database");
    let (fetch_queue, receiver) = FetchQueue::new(DEFAULT_QUEUE_CAPACITY);
    let app_state = AppState::new(conn, provider, config, fetch_queue)
        .expect("Could not initialize the database");

    spawn_fetch_worker(app_state.pipeline(), receiver);

    if args.fetch_interval_secs > 0 {
        spawn_fetch_schedule(app_state.clone(), Duration::from_secs(args.fetch_interval_secs));
    }

    let handle = Handle::new();
    tokio::spawn(graceful_shutdown(handle.clone()));

    let router = add_tracing_layer(
        build_router(app_state).layer(middleware::from_fn(logging_middleware)),
    );

    tracing::info!("HTTP server listening on {}", addr);
    axum_server::bind(addr)
        .handle(handle)
        .serve(router.into_make_service())
        .await
        .unwrap();
}

fn spawn_fetch_schedule(state: AppState, period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            match run_scheduled_fetch(&state.pipeline(), &state.fetch_queue).await {
                Ok(outcomes) => {
                    tracing::info!("Scheduled fetch covered {} bank links", outcomes.len())
                }
                Err(error) => tracing::error!("Scheduled fetch failed: {error}"),
            }
        }
    });
}

fn setup_logging() {
    let stdout_log = tracing_subscriber::fmt::layer().pretty();

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .expect("Could not create log file");

    let debug_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_writer(Arc::new(log_file));

    tracing_subscriber::registry()
        .with(
            stdout_log
                .with_filter(filter::LevelFilter::INFO)
                .and_then(debug_log)
                .with_filter(filter::LevelFilter::DEBUG),
        )
        .init();
}

fn add_tracing_layer(router: Router) -> Router {
    let tracing_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request| {
            let method = req.method();
            let uri = req.uri();

            let matched_path = req
                .extensions()
                .get::<MatchedPath>()
                .map(|matched_path| matched_path.as_str());

            tracing::debug_span!("request", %method, %uri, matched_path)
        })
        // By default, `TraceLayer` will log 5xx responses but we're doing our specific
        // logging of errors so disable that
        .on_failure(());

    router.layer(tracing_layer)
}
