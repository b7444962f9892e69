//! Backend entry-point: wires the pool, the executor, and the REST surface.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use mockable::DefaultClock;
use reqwest::Url;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use rides_backend::config::IdempotencyConfig;
use rides_backend::domain::ports::{FixturePaymentGateway, NoOpRequestTelemetry, PaymentGateway};
use rides_backend::executor::RequestExecutor;
use rides_backend::inbound::http::health::live;
use rides_backend::inbound::http::rides::create_ride;
use rides_backend::inbound::http::HttpState;
use rides_backend::outbound::payment::HttpPaymentGateway;
use rides_backend::outbound::persistence::{Database, DatabaseConfig};

const PAYMENT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Application bootstrap.
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let database_url = env::var("DATABASE_URL")
        .map_err(|_| std::io::Error::other("DATABASE_URL must be set"))?;

    let config = IdempotencyConfig::default()
        .with_lease_ttl_seconds(env_u64("LEASE_TTL_SECONDS", 90))
        .with_phase_max_attempts(env_u64("PHASE_MAX_ATTEMPTS", 2) as u32)
        .with_phase_backoff_base_ms(env_u64("PHASE_BACKOFF_BASE_MS", 50));

    let db_config = DatabaseConfig::new(database_url)
        .with_request_concurrency(env_u64("REQUEST_CONCURRENCY", 16) as u32);
    let db = Database::connect(db_config)
        .await
        .map_err(|err| std::io::Error::other(format!("database: {err}")))?;

    let gateway = payment_gateway()?;
    let executor = Arc::new(RequestExecutor::new(
        gateway,
        Arc::new(NoOpRequestTelemetry),
        Arc::new(DefaultClock),
        config,
    ));
    let state = web::Data::new(HttpState::new(db, executor));

    let bind_addr = env::var("RIDES_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned());
    info!(%bind_addr, "starting rides backend");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .service(create_ride)
            .service(live)
    })
    .bind(bind_addr)?
    .run()
    .await
}

/// Select the payment gateway from the environment.
///
/// Without `PAYMENT_CHARGES_URL` the fixture gateway captures every charge;
/// that is only acceptable outside production, so it logs loudly.
fn payment_gateway() -> std::io::Result<Arc<dyn PaymentGateway>> {
    match env::var("PAYMENT_CHARGES_URL") {
        Ok(raw) => {
            let url = Url::parse(&raw)
                .map_err(|err| std::io::Error::other(format!("PAYMENT_CHARGES_URL: {err}")))?;
            let gateway = HttpPaymentGateway::new(url, PAYMENT_CALL_TIMEOUT)
                .map_err(|err| std::io::Error::other(format!("payment client: {err}")))?;
            Ok(Arc::new(gateway))
        }
        Err(_) => {
            warn!("PAYMENT_CHARGES_URL not set; using the fixture gateway (captures everything)");
            Ok(Arc::new(FixturePaymentGateway))
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(%name, %raw, "ignoring unparseable configuration value");
            default
        }),
        Err(_) => default,
    }
}
