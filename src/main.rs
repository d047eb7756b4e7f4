use clap::Parser;
use gum::config::Config;
use log::error;
use std::process;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    if let Err(e) = config.validate() {
        error!("Error: {}", e);
        process::exit(2);
    }

    match gum::startup::run(&config) {
        Ok(summary) if summary.is_success() => {}
        Ok(summary) => {
            let failed: Vec<String> = summary.failed.iter().map(|(k, _)| k.to_string()).collect();
            error!("Analysis failed for k = {}", failed.join(", "));
            process::exit(1);
        }
        Err(e) => {
            error!("Error: {}", e);
            process::exit(1);
        }
    }
}
