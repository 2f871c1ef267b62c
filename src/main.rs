#[macro_use]
extern crate log;

mod api;
mod config;
mod logger;
mod probe;

use std::process;

fn main() {
    let config = match config::load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Unable to load config: {}", err);
            process::exit(1);
        }
    };

    if let Err(err) = logger::setup_logger(config.log_level, &config.log_dir) {
        eprintln!("Unable to setup logger: {}", err);
        process::exit(1);
    }

    debug!("Config: {:?}", config);

    api::run(config);
}
