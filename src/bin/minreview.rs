//! MinReview CLI binary.
//!
//! # Commands
//!
//! - `hub` - Run the broadcast hub
//! - `client` - Connect to hubs and process inspection reports
//! - `fetch` - Resumable one-off download, optionally transduced to JSON

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use minreview::{
    config::{default_config_path, Config},
    fetch::{paths::json_output_path, ChunkSink, ResumableFetcher},
    server::{self, ServerConfig},
    transport::Endpoint,
    transduce::Transduction,
    ReviewClient, XmlToJson, VERSION,
};

#[derive(Parser)]
#[command(name = "minreview")]
#[command(version = VERSION)]
#[command(about = "MinReview - inspection review hub and client", long_about = None)]
struct Cli {
    /// Config file (default: platform config dir, then MINREVIEW_* env)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the broadcast hub
    Hub {
        /// Host to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Keepalive ping period in seconds
        #[arg(long)]
        ping_secs: Option<u64>,

        /// Prefix stripped from the /tasks address parameter
        #[arg(long)]
        result_prefix: Option<String>,

        /// Disable request logging
        #[arg(long)]
        no_request_log: bool,
    },

    /// Connect to hubs and process inspection reports
    Client {
        /// Hub endpoint as host:port (repeatable)
        #[arg(short, long = "endpoint")]
        endpoints: Vec<Endpoint>,

        /// Download cache root
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Port reports are fetched from
        #[arg(long)]
        report_port: Option<u16>,
    },

    /// Download a URL into a file, resuming a partial copy
    Fetch {
        /// Source URL
        url: String,

        /// Destination file
        #[arg(short, long)]
        output: PathBuf,

        /// Also write the captured <component> JSON next to the file
        #[arg(long)]
        transduce: bool,
    },
}

fn init_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let file = match path {
        Some(path) => Config::from_file(path)?,
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        },
    };
    Ok(file.merge(Config::from_env()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let mut config = load_config(cli.config)?;

    match cli.command {
        Commands::Hub {
            host,
            port,
            ping_secs,
            result_prefix,
            no_request_log,
        } => {
            if let Some(host) = host {
                config.hub.host = host;
            }
            if let Some(port) = port {
                config.hub.port = port;
            }
            if let Some(secs) = ping_secs {
                config.hub.ping_period_secs = secs;
            }
            if let Some(prefix) = result_prefix {
                config.hub.result_prefix = prefix;
            }
            if no_request_log {
                config.hub.request_logging = false;
            }
            cmd_hub(config).await
        },

        Commands::Client {
            endpoints,
            cache_dir,
            report_port,
        } => {
            if !endpoints.is_empty() {
                config.client.endpoints = endpoints;
            }
            if let Some(dir) = cache_dir {
                config.client.cache_dir = dir;
            }
            if let Some(port) = report_port {
                config.client.report_port = port;
            }
            cmd_client(config).await
        },

        Commands::Fetch {
            url,
            output,
            transduce,
        } => cmd_fetch(config, &url, output, transduce).await,
    }
}

async fn cmd_hub(config: Config) -> anyhow::Result<()> {
    let server_config = ServerConfig::from_hub(&config.hub)?;
    tracing::info!("Starting MinReview hub on {}", server_config.addr);
    tracing::info!("Ping period: {:?}", server_config.ping_period);
    server::serve(server_config).await?;
    Ok(())
}

async fn cmd_client(config: Config) -> anyhow::Result<()> {
    let client = ReviewClient::new(&config.client, &config.download)?;
    tracing::info!(
        endpoints = config.client.endpoints.len(),
        cache = %config.client.cache_dir.display(),
        "Starting MinReview client"
    );
    client.start().await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    client.shutdown().await;
    Ok(())
}

async fn cmd_fetch(config: Config, url: &str, output: PathBuf, transduce: bool) -> anyhow::Result<()> {
    let fetcher = ResumableFetcher::new(&config.download)?;

    let outcome = if transduce {
        let json_path = json_output_path(&output);
        let mut transduction = Transduction::new(
            XmlToJson::new(&json_path).with_asset_callback(|asset| println!("asset: {asset}")),
        );

        // A resumed file is replayed in full so the JSON covers the whole document.
        let resumed = output.exists();
        let outcome = if resumed {
            fetcher.download(url, &output, None).await?
        } else {
            fetcher
                .download(url, &output, Some(&mut transduction as &mut dyn ChunkSink))
                .await?
        };
        if resumed {
            transduction.on_chunk(&tokio::fs::read(&output).await?)?;
        }
        transduction.finish()?;
        println!("json: {}", json_path.display());
        outcome
    } else {
        fetcher.download(url, &output, None).await?
    };

    println!("{}: {:?}", output.display(), outcome);
    Ok(())
}
