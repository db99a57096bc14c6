#[macro_use]
extern crate prettytable;
use clap::Parser;
use commands::{handle_config, handle_download, handle_info, Commands};
use config::Settings;
use dotenv::dotenv;
use std::process;
use tracing_subscriber::EnvFilter;

pub mod commands;
pub mod config;

#[derive(Parser)]
#[clap(version, about = "Chunked, concurrent HTTP(S) downloader")]
#[clap(subcommand_required = true)]
struct Surge {
    /// Log debug information to stderr
    #[clap(short, long, global = true, takes_value = false)]
    verbose: bool,
    #[clap(subcommand)]
    commands: Commands,
}

#[tokio::main]
async fn main() {
    dotenv().ok();

    let surge = Surge::parse();
    init_logging(surge.verbose);

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    let successful = match surge.commands {
        Commands::Download {
            url,
            output,
            threads,
            retries,
            timeout,
            chunk_size,
        } => handle_download(url, output, threads, retries, timeout, chunk_size, settings)
            .await
            .is_ok(),
        Commands::Info { url } => handle_info(url, settings).await.is_ok(),
        Commands::Config => handle_config(&settings).is_ok(),
    };

    if !successful {
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "surge_core=debug,surge=debug"
    } else {
        "surge_core=info,surge=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
