use clap::Parser;
use log::{error, warn};
use tigql::engine::config::{validate, CliArgs};
use tigql::lifecycle::{wait_for_signal, Gateway};
use tigql::Config;

#[actix_web::main]
async fn main() {
    let args = CliArgs::parse();

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("tigql: {}", e);
            std::process::exit(1);
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log().level()),
    )
    .init();

    let warnings = match validate::validate(&config).into_result() {
        Ok(warnings) => warnings,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    for warning in warnings {
        warn!("{}", warning);
    }

    let gateway = match Gateway::init(config).await {
        Ok(gateway) => gateway,
        Err(e) => {
            error!("startup failed: {}", e);
            std::process::exit(1);
        }
    };

    wait_for_signal().await;
    gateway.shutdown().await;
}
