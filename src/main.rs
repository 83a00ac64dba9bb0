use std::sync::Arc;

use lnproxyd::api::build_router;
use lnproxyd::config::AppConfig;
use lnproxyd::core::wrap::WrapEngine;
use lnproxyd::lnd::LndGateway;
use log::{error, info};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("config error: {e}");
            std::process::exit(1);
        }
    };

    let gateway = match LndGateway::connect(&config).await {
        Ok(g) => g,
        Err(e) => {
            error!("lnd connection error: {e:#}");
            std::process::exit(1);
        }
    };

    let engine = Arc::new(WrapEngine::new(Arc::new(gateway)));

    let bind_addr = format!("{}:{}", config.api_host, config.api_port);
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("server bind error on {bind_addr}: {e}");
            std::process::exit(1);
        }
    };
    info!(
        "lnproxyd listening on {bind_addr}, lnd at {}",
        config.lnd_grpc_address
    );

    let app = build_router(engine);
    if let Err(e) = axum::serve(listener, app).await {
        error!("server runtime error: {e}");
        std::process::exit(1);
    }
}
