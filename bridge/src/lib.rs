pub mod client;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod metrics_defs;
pub mod multipart;
pub mod request;
pub mod server;
pub mod services;

#[cfg(test)]
mod testutils;

use crate::client::BridgeClient;
use crate::errors::BridgeError;
use crate::server::EnvelopeService;
use crate::services::ServiceContext;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub async fn run(config: config::Config) -> Result<(), BridgeError> {
    config.validate()?;

    let client = BridgeClient::new(&config.timeouts)?;
    let context = ServiceContext::new(
        client,
        config.backends.clone(),
        config.collection.clone(),
        config.fanout_concurrency,
    );
    let envelope = EnvelopeService::new(services::all(&context), config.max_envelope_bytes);

    let ready = Arc::new(AtomicBool::new(false));
    let probe = ready.clone();
    let admin = AdminService::<_, BridgeError>::new(move || probe.load(Ordering::Relaxed));

    let envelope_task = run_http_service(&config.listener.host, config.listener.port, envelope);
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin,
    );

    tracing::info!(
        collection = %config.collection,
        fanout_concurrency = config.fanout_concurrency,
        "Starting bridge"
    );
    ready.store(true, Ordering::Relaxed);
    tokio::try_join!(envelope_task, admin_task)?;
    Ok(())
}
