use std::process;

use clap::Parser;
use ingestion::params::JobParameters;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let params = JobParameters::parse();
    if let Err(why) = ingestion::execute(params).await {
        log::error!("ingestion failed: {why}");
        process::exit(1);
    }
}
