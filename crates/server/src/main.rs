//! Price-Watch: tracks catalog prices and flags buying opportunities
//!
//! Usage:
//!   price-watch serve --port 8000                 API server + periodic checks
//!   price-watch scan                              Check every tracked item once
//!   price-watch check B00X4WHP5E B08N5WRWNW       Check specific items now
//!   price-watch search "usb c hub"                Catalog keyword search
//!   price-watch add B00X4WHP5E --target 49.99     Track an item
//!   price-watch deals --kind price_drop           List active deals

mod routes;

use anyhow::Context;
use axum::Router;
use clap::{Parser, Subcommand, ValueEnum};
use engine::{
    normalize_identifier, AppConfig, CatalogClient, CheckOutcome, DealDetector, HistoryClient,
    PeriodicJob, PriceMonitor, Scheduler,
};
use persistence::repository::{DealFilter, DealKind};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));
const DEFAULT_CONFIG_PATH: &str = "config/price-watch.toml";

#[derive(Parser)]
#[command(name = "price-watch")]
#[command(about = "Price monitoring and deal detection", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: $PRICE_WATCH_CONFIG or config/price-watch.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server and the periodic price check
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Check every active item once
    Scan,
    /// Check specific items now (untracked items are checked too)
    Check {
        #[arg(required = true)]
        identifiers: Vec<String>,
    },
    /// Search the catalog by keywords
    Search {
        keywords: String,
        #[arg(long, default_value_t = 10)]
        max_results: usize,
    },
    /// Track an item and check it
    Add {
        identifier: String,
        #[arg(long)]
        label: Option<String>,
        /// Target buy price for margin opportunities
        #[arg(long)]
        target: Option<Decimal>,
    },
    /// Stop tracking an item
    Remove { identifier: String },
    /// List active deals
    Deals {
        /// price_drop, clearance, below_average, all_time_low, margin_opportunity
        #[arg(long)]
        kind: Option<DealKind>,
        #[arg(long)]
        min_roi: Option<Decimal>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Estimate resale profit after fees
    Estimate {
        #[arg(long)]
        sale_price: Decimal,
        #[arg(long)]
        cost: Decimal,
    },
    /// Export items, latest prices and active deals
    Export {
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    Json,
    Csv,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,persistence=debug,price_watch=debug,sqlx=warn")
    } else {
        EnvFilter::new("info,engine=info,price_watch=info,sqlx=warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn load_config(cli_path: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    let path = cli_path
        .or_else(|| std::env::var("PRICE_WATCH_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    if !path.exists() {
        info!("No config file at {}, using defaults", path.display());
    }
    AppConfig::load(&path)
}

async fn build_monitor(config: &AppConfig) -> anyhow::Result<Arc<PriceMonitor>> {
    let db = persistence::Database::new(&config.database.path)
        .await
        .map_err(|e| {
            error!("Failed to initialize database: {}", e);
            anyhow::anyhow!("Database initialization failed: {}", e)
        })?;
    info!("Database initialized: {}", config.database.path);

    let catalog = CatalogClient::from_config(&config.catalog)?;
    let history = HistoryClient::from_config(&config.history)?;

    Ok(Arc::new(PriceMonitor::new(
        db.pool_clone(),
        Arc::new(catalog),
        Arc::new(history),
        DealDetector::new(&config.monitoring),
    )))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    let config = load_config(cli.config)?;
    let monitor = build_monitor(&config).await?;

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            cmd_serve(&config, monitor, &host, port).await?;
        }
        Commands::Scan => cmd_scan(&monitor).await?,
        Commands::Check { identifiers } => cmd_check(&monitor, &identifiers).await?,
        Commands::Search {
            keywords,
            max_results,
        } => cmd_search(&monitor, &keywords, max_results).await,
        Commands::Add {
            identifier,
            label,
            target,
        } => cmd_add(&monitor, &identifier, label.as_deref(), target).await?,
        Commands::Remove { identifier } => {
            monitor.remove_item(&identifier).await?;
            println!("Stopped tracking {}", identifier.trim().to_uppercase());
        }
        Commands::Deals {
            kind,
            min_roi,
            limit,
        } => {
            let filter = DealFilter {
                kind,
                min_roi,
                offset: 0,
                limit,
            };
            cmd_deals(&monitor, &filter).await?;
        }
        Commands::Estimate { sale_price, cost } => print_estimate(&monitor, sale_price, cost),
        Commands::Export { format, output } => cmd_export(&monitor, format, output).await?,
    }

    Ok(())
}

// ============================================================================
// Serve command: Axum API server + scheduler
// ============================================================================

async fn cmd_serve(
    config: &AppConfig,
    monitor: Arc<PriceMonitor>,
    host: &str,
    port: u16,
) -> anyhow::Result<()> {
    info!("Price-Watch v{} starting...", APP_VERSION);

    for entry in &config.watchlist {
        match monitor
            .seed(&entry.identifier, entry.label.as_deref(), entry.target_buy_price)
            .await
        {
            Ok(item) => info!(identifier = %item.identifier, "Watchlist item tracked"),
            Err(e) => warn!(identifier = %entry.identifier, "Skipping watchlist entry: {e}"),
        }
    }

    let interval = config.monitoring.check_interval();
    let job: Arc<dyn PeriodicJob> = monitor.clone();
    let scheduler = Scheduler::start(job, interval);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .nest("/api/v1", routes::router(routes::AppState { monitor }))
        .layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== Price-Watch v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET    /api/v1/health                        - Health check");
    println!("  GET    /api/v1/products                      - Tracked items");
    println!("  POST   /api/v1/products                      - Track an item");
    println!("  GET    /api/v1/products/search?keywords=     - Catalog search");
    println!("  GET    /api/v1/products/:id                  - Item detail");
    println!("  DELETE /api/v1/products/:id                  - Stop tracking");
    println!("  GET    /api/v1/products/:id/alerts           - Alerts for an item");
    println!("  GET    /api/v1/prices/:id/history            - Price history + stats");
    println!("  POST   /api/v1/prices/profit-estimate        - Resale profit estimate");
    println!("  GET    /api/v1/deals                         - Active deals");
    println!("  POST   /api/v1/deals/scan                    - Check all items now");
    println!("  POST   /api/v1/deals/:id/dismiss             - Dismiss a deal");
    println!("  GET    /api/v1/exports/json                  - JSON export");
    println!("  GET    /api/v1/exports/csv                   - CSV export");
    println!("\n  Database: {}", config.database.path);
    println!("  Check interval: {} min", scheduler.period().as_secs() / 60);
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Ctrl+C received, shutting down...");
        })
        .await?;

    scheduler.stop().await;
    Ok(())
}

// ============================================================================
// CLI commands
// ============================================================================

fn fmt_price(value: Option<Decimal>) -> String {
    value.map(|v| format!("${v:.2}")).unwrap_or_else(|| "-".to_string())
}

async fn cmd_scan(monitor: &PriceMonitor) -> anyhow::Result<()> {
    let outcomes = monitor.check_all().await?;
    if outcomes.is_empty() {
        println!("No active items. Track one with `price-watch add <identifier>`.");
        return Ok(());
    }
    print_outcomes(&outcomes);
    Ok(())
}

async fn cmd_check(monitor: &PriceMonitor, identifiers: &[String]) -> anyhow::Result<()> {
    let ids = identifiers
        .iter()
        .map(|raw| normalize_identifier(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let outcomes = monitor.check(&ids).await;
    print_outcomes(&outcomes);
    Ok(())
}

fn print_outcomes(outcomes: &[CheckOutcome]) {
    println!("\n{:<14} {:>10} {:>6}  Status", "Identifier", "Price", "Deals");
    println!("{}", "-".repeat(44));
    for o in outcomes {
        let status = o.error.as_deref().unwrap_or("ok");
        println!(
            "{:<14} {:>10} {:>6}  {}",
            o.identifier,
            fmt_price(o.price),
            o.deals_found,
            status
        );
    }
}

async fn cmd_search(monitor: &PriceMonitor, keywords: &str, max_results: usize) {
    let results = monitor.search(keywords, max_results).await;
    if results.is_empty() {
        println!("No results found.");
        return;
    }
    for r in &results {
        let title: String = r.title.as_deref().unwrap_or_default().chars().take(60).collect();
        println!("  {:<12} {:<60} {}", r.identifier, title, fmt_price(r.current_price));
    }
}

async fn cmd_add(
    monitor: &PriceMonitor,
    identifier: &str,
    label: Option<&str>,
    target: Option<Decimal>,
) -> anyhow::Result<()> {
    let (item, outcome) = monitor.add_item(identifier, label, target).await?;
    println!("Tracking {} {}", item.identifier, item.title);
    println!(
        "  price {}  deals {}{}",
        fmt_price(outcome.price),
        outcome.deals_found,
        outcome
            .error
            .map(|e| format!("  (check failed: {e})"))
            .unwrap_or_default()
    );
    Ok(())
}

async fn cmd_deals(monitor: &PriceMonitor, filter: &DealFilter) -> anyhow::Result<()> {
    let deals = monitor.list_deals(filter).await?;
    if deals.is_empty() {
        println!("No active deals.");
        return Ok(());
    }

    println!(
        "\n{:>5}  {:<14} {:<20} {:>10} {:>10} {:>7} {:>10} {:>7}",
        "Id", "Identifier", "Kind", "Price", "Reference", "Drop%", "Profit", "ROI%"
    );
    println!("{}", "-".repeat(92));
    for d in &deals {
        println!(
            "{:>5}  {:<14} {:<20} {:>10} {:>10} {:>7} {:>10} {:>7}",
            d.id,
            d.identifier,
            d.kind,
            fmt_price(d.trigger_price),
            fmt_price(d.reference_price),
            d.drop_percent.map(|v| format!("{v:.1}")).unwrap_or_default(),
            fmt_price(d.estimated_profit),
            d.estimated_roi.map(|v| format!("{v:.1}")).unwrap_or_default(),
        );
    }
    Ok(())
}

fn print_estimate(monitor: &PriceMonitor, sale_price: Decimal, cost: Decimal) {
    let e = monitor.estimate(sale_price, cost);
    println!("\nSale price:      ${:.2}", e.sale_price);
    println!("Cost:            ${:.2}", e.cost);
    println!("Referral fee:    ${:.2}", e.referral_fee);
    println!("Fulfillment fee: ${:.2}", e.fulfillment_fee);
    println!("Total fees:      ${:.2}", e.total_fees);
    println!("Profit:          ${:.2}", e.profit);
    println!("ROI:             {:.1}%", e.roi);
    println!("Margin:          {:.1}%", e.margin);
}

async fn cmd_export(
    monitor: &PriceMonitor,
    format: ExportFormat,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let export = monitor.export().await?;
    let rendered = match format {
        ExportFormat::Json => serde_json::to_string_pretty(&export)?,
        ExportFormat::Csv => export.to_csv()?,
    };

    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, rendered)
                .with_context(|| format!("write {}", path.display()))?;
            info!(items = export.total_items, "Exported to {}", path.display());
        }
        None => println!("{}", rendered.trim_end()),
    }
    Ok(())
}
