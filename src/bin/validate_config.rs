use clap::Parser;
use std::process::ExitCode;

use lease_esign::config::{Config, ConfigError, Env};

fn main() -> ExitCode {
    let env = Env::parse();
    match Config::load_file(&env.config_file) {
        Ok(_) => {
            eprintln!("Config validation passed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Config validation failed: {}", error_kind(&e));
            ExitCode::FAILURE
        }
    }
}

fn error_kind(e: &ConfigError) -> &'static str {
    match e {
        ConfigError::Io(_) => "failed to read config file",
        ConfigError::Toml(_) => "failed to parse config file",
    }
}
