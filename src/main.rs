use clap::Parser;
use quant_replay::cli::{Cli, Commands};
use quant_replay::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if std::path::Path::new(&cli.config).exists() {
        Config::load(&cli.config)?
    } else {
        eprintln!("Config file {} not found, using defaults", cli.config);
        Config::default()
    };

    // Initialize telemetry
    let _telemetry = quant_replay::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Backtest(args) => args.execute(&config).await?,
        Commands::Optimize(args) => args.execute(&config).await?,
        Commands::Download(args) => args.execute(&config).await?,
        Commands::Validate(args) => args.execute(&config).await?,
        Commands::Config => {
            println!("# Effective configuration ({})", cli.config);
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
