use clap::Parser;
use lease_esign::config::{Config, Env, setup_tracing};
use lease_esign::launch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed_env = Env::parse();
    let config = Config::load_file(&parsed_env.config_file)?;
    setup_tracing(&config.log_level);

    launch(config).await
}
