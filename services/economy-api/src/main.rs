use actix_cors::Cors;
use actix_web::{dev::Service as _, middleware, web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use economy_api::{
    auth::JwtAuth,
    config::Config,
    handlers, metrics,
    nats::{spawn_announcement_forwarder, NatsProducer},
    services::{spawn_chat_guard_pruner, EconomyService},
};
use economy_core::{announce, crypto::KeyPair, Ledger};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false);

    if std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    metrics::register_metrics().context("Failed to register metrics")?;

    info!("Starting Economy API on {}:{}", config.server.host, config.server.port);

    let mut ledger = Ledger::open(config.ledger.clone()).context("Failed to open ledger")?;
    match config.signing_key().map_err(|e| anyhow::anyhow!(e))? {
        Some(seed) => {
            let keypair = KeyPair::from_seed(&seed);
            info!(public_key = %hex::encode(keypair.public_key()), "Ledger rows will be signed");
            ledger = ledger.with_keypair(keypair);
        }
        None => warn!("No signing key configured, ledger rows are hash-chained only"),
    }
    let ledger = Arc::new(ledger);

    let (sink, receiver) = announce::channel(config.ledger.announcements.channel_capacity);
    let producer = if config.nats.url.is_empty() {
        warn!("NATS disabled, donation announcements will only be logged");
        None
    } else {
        match NatsProducer::new(&config.nats.url, &config.nats.topic_prefix).await {
            Ok(producer) => Some(producer),
            Err(e) => {
                warn!(error = %e, "NATS unavailable, donation announcements will only be logged");
                None
            }
        }
    };
    let forwarder = spawn_announcement_forwarder(receiver, producer);

    let service = Arc::new(EconomyService::new(ledger, sink));
    let pruner = spawn_chat_guard_pruner(service.clone(), Duration::from_secs(3600));
    let jwt_secret = config.auth.jwt_secret.clone();

    HttpServer::new(move || {
        App::new()
            .wrap(JwtAuth::new(jwt_secret.clone()))
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .wrap_fn(|req, srv| {
                let method = req.method().to_string();
                let started = Instant::now();
                let fut = srv.call(req);
                async move {
                    let res = fut.await?;
                    let path = res
                        .request()
                        .match_pattern()
                        .unwrap_or_else(|| "unmatched".to_string());
                    metrics::observe_request(
                        &method,
                        &path,
                        res.status().as_u16(),
                        started.elapsed().as_secs_f64(),
                    );
                    Ok(res)
                }
            })
            .app_data(web::Data::new(service.clone()))
            .configure(handlers::configure_routes)
    })
    .workers(config.server.workers)
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await?;

    pruner.abort();

    // The HTTP workers held the last senders; the forwarder drains and exits.
    if let Err(e) = forwarder.await {
        warn!(error = %e, "Announcement forwarder ended abnormally");
    }

    info!("Economy API stopped");
    Ok(())
}
