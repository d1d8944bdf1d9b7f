//! LLM proxy gateway server.
//!
//! High-performance HTTP entry point built with Actix Web. Owns process
//! startup only — routing, load balancing, circuit breaking, and
//! forwarding all live in `gateway-core`.

use gateway_core::config::settings::load_settings;
use gateway_core::config::validation::ConfigValidator;
use gateway_core::logs::logger::configure_logger;
use gateway_core::routes::{health, metrics, proxy};
use gateway_core::AppState;

use actix_web::{middleware::Logger, web, App, HttpServer};
use log::{error, info};
use tokio::signal;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    let settings = load_settings().unwrap_or_else(|err| {
        error!("failed to load configuration: {err}");
        std::process::exit(1);
    });

    info!("starting gateway v{}", settings.version);

    let validation = ConfigValidator::validate(&settings);
    validation.log_summary();
    if !validation.is_valid {
        error!("refusing to start with invalid configuration");
        std::process::exit(1);
    }

    let host = std::env::var("GATEWAY_HOST").unwrap_or_else(|_| settings.server.host.clone());
    let port = std::env::var("GATEWAY_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(settings.server.port);

    info!(
        "{} upstream(s) configured, binding {}:{}",
        settings.upstreams.len(),
        host,
        port
    );

    let state = web::Data::new(AppState::new(settings));

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::new(r#"%a "%r" %s %b "%{Referer}i" "%{User-Agent}i" %T"#))
            .wrap(actix_web::middleware::Compress::default())
            .configure(health::configure_health)
            .configure(metrics::configure_metrics)
            .configure(proxy::configure_proxy)
    })
    .bind((host.as_str(), port))?
    .run();

    info!("gateway started");

    tokio::select! {
        result = server => {
            match result {
                Ok(_) => info!("server stopped gracefully"),
                Err(e) => error!("server error: {e}"),
            }
        }
        _ = signal::ctrl_c() => {
            info!("received shutdown signal, stopping server...");
        }
    }

    Ok(())
}
