use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::sync::Arc;
use std::time::Duration;

use saaskit::catalog;
use saaskit::config::Config;
use saaskit::db::{AppState, create_pool, init_db, queries};
use saaskit::handlers;
use saaskit::identity::{JwksCache, SessionVerifier};
use saaskit::models::{IdentityProfile, UpsertPrice, UpsertProduct};
use saaskit::payments::StripeClient;

#[derive(Parser, Debug)]
#[command(name = "saaskit")]
#[command(about = "SaaS starter backend: sessions, billing dashboard and subscription sync")]
struct Cli {
    /// Seed the database with a demo product, price and user (dev mode only)
    #[arg(long)]
    seed: bool,

    /// Mirror the payment provider's active catalog into the database, then exit
    #[arg(long)]
    sync_catalog: bool,
}

/// Log a fatal startup error and exit.
fn fatal(context: &str, err: impl std::fmt::Display) -> ! {
    tracing::error!("{}: {}", context, err);
    eprintln!("ERROR: {}: {}", context, err);
    std::process::exit(1);
}

/// Seeds the database with demo catalog data and a demo user.
/// Only runs in dev mode and when no users exist yet.
fn seed_dev_data(state: &AppState) -> saaskit::error::Result<()> {
    let conn = state.db.get()?;

    if queries::count_users(&conn)? > 0 {
        tracing::info!("Database already has data, skipping seed");
        return Ok(());
    }

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV DATA");
    tracing::info!("============================================");

    let product = queries::upsert_product(
        &conn,
        &UpsertProduct {
            id: "prod_demo".to_string(),
            active: true,
            name: "Pro".to_string(),
            description: Some("Everything in Free, plus analytics and export".to_string()),
            image: None,
            metadata: None,
        },
    )?;
    tracing::info!("Product: {} (id: {})", product.name, product.id);

    let price = queries::upsert_price(
        &conn,
        &UpsertPrice {
            id: "price_demo_monthly".to_string(),
            product_id: Some(product.id.clone()),
            active: true,
            description: Some("Pro monthly".to_string()),
            unit_amount: Some(1500),
            currency: Some("usd".to_string()),
            price_type: Some("recurring".to_string()),
            interval: Some("month".to_string()),
            interval_count: Some(1),
            trial_period_days: None,
            metadata: None,
        },
    )?;
    tracing::info!("Price: {} ({:?} {:?}/{:?})", price.id, price.unit_amount, price.currency, price.interval);

    let user = queries::get_or_create_user(
        &conn,
        &IdentityProfile {
            external_id: "user_demo".to_string(),
            email: Some("demo@saaskit.local".to_string()),
            name: Some("Demo User".to_string()),
            avatar_url: None,
        },
    )?;
    tracing::info!("User: {} (external id: {})", user.email, user.external_id);
    tracing::info!("============================================");

    Ok(())
}

/// Hourly pruning of applied webhook event ids.
fn spawn_prune_task(state: AppState, retention_days: i64) {
    if retention_days <= 0 {
        tracing::info!("Webhook event pruning disabled");
        return;
    }

    tokio::spawn(async move {
        let interval = Duration::from_secs(60 * 60);

        loop {
            tokio::time::sleep(interval).await;

            match state.db.get() {
                Ok(conn) => match queries::prune_webhook_events(&conn, retention_days) {
                    Ok(count) if count > 0 => {
                        tracing::debug!("Pruned {} webhook events older than {} days", count, retention_days);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Failed to prune webhook events: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to get db connection for pruning: {}", e);
                }
            }
        }
    });

    tracing::info!("Background prune task started (runs hourly)");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "saaskit=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path)
        .unwrap_or_else(|e| fatal("Failed to create database pool", e));
    {
        let conn = db_pool
            .get()
            .unwrap_or_else(|e| fatal("Failed to get connection", e));
        init_db(&conn).unwrap_or_else(|e| fatal("Failed to initialize database", e));
    }

    let stripe = StripeClient::new(&config.stripe_config());

    if cli.sync_catalog {
        match catalog::sync_catalog(&db_pool, &stripe).await {
            Ok((products, prices)) => {
                println!("Synced {} products and {} prices", products, prices);
                return;
            }
            Err(e) => fatal("Catalog sync failed", e),
        }
    }

    let state = AppState {
        db: db_pool,
        stripe,
        sessions: Arc::new(SessionVerifier::new(config.identity_config(), JwksCache::new())),
        site_url: config.site_url.clone(),
        premium_features: Arc::new(config.premium_features.clone()),
    };

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set SAASKIT_ENV=dev)");
        } else if let Err(e) = seed_dev_data(&state) {
            fatal("Failed to seed dev data", e);
        }
    }

    spawn_prune_task(state.clone(), config.webhook_event_retention_days);

    let app = handlers::router(state.clone(), config.rate_limit)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| fatal("Failed to bind to address", e));

    tracing::info!("saaskit server listening on {}", addr);

    // Peer address is needed for IP-based rate limiting
    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    {
        fatal("Server error", e);
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, stopping server...");
}
