use anyhow::Result;
use clap::Parser;
use clip_chain::api::SoraClient;
use clip_chain::config::Config;
use clip_chain::ffmpeg::Ffmpeg;
use clip_chain::init;
use clip_chain::pipeline::{ChainOrchestrator, ChainRequest, Strategy};
use clip_chain::ChainError;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "clip-chain",
    version,
    about = "Chain short generated clips into one long video",
    long_about = "Generates a long video by chaining short generated segments. Each segment after the first is seeded from the previous segment's last frame, padded with a still lead-in and crossfaded at offsets computed from the measured clip durations."
)]
struct Cli {
    /// Text description of the video
    prompt: String,

    /// Total desired duration in seconds
    #[arg(short, long)]
    duration: f64,

    /// Duration of each segment in seconds (at most 12)
    #[arg(short, long, default_value_t = 12.0)]
    segment_duration: f64,

    /// Crossfade length in seconds between segments
    #[arg(short, long, default_value_t = 1.0)]
    crossfade: f64,

    /// Still lead-in prepended to seeded segments (defaults to the crossfade)
    #[arg(long)]
    pad_start: Option<f64>,

    /// Output filename
    #[arg(short, long, default_value = "chained_output.mp4")]
    output: PathBuf,

    /// Video resolution WIDTHxHEIGHT
    #[arg(short = 'r', long)]
    size: Option<String>,

    /// Which continuity stages to run
    #[arg(long, value_enum, default_value_t = Strategy::SeededPadded)]
    strategy: Strategy,

    /// Directory for segment and frame files
    #[arg(short, long, default_value = ".")]
    work_dir: PathBuf,

    /// Leave segment and frame files on disk after success
    #[arg(long)]
    keep_intermediates: bool,

    /// JSON configuration file (otherwise read from the environment / .env)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn to_request(&self) -> ChainRequest {
        ChainRequest {
            prompt: self.prompt.clone(),
            total_duration: self.duration,
            segment_duration: self.segment_duration,
            crossfade: self.crossfade,
            pad_duration: self.pad_start,
            size: self.size.clone(),
            output: self.output.clone(),
            work_dir: self.work_dir.clone(),
            strategy: self.strategy,
            keep_intermediates: self.keep_intermediates,
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn load_config(path: Option<&PathBuf>) -> clip_chain::Result<Config> {
    match path {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Config::load(path).await
        }
        None => {
            dotenv::dotenv().ok();
            Config::from_env()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let request = cli.to_request();
    if let Err(err) = request.validate() {
        error!("{}", err);
        std::process::exit(2);
    }

    let config = match load_config(cli.config.as_ref()).await {
        Ok(config) => config,
        Err(err) => {
            error!("{}", err);
            std::process::exit(2);
        }
    };
    if let Err(err) = init::check_media_tools(&config.ffmpeg_bin, &config.ffprobe_bin).await {
        error!("{}", err);
        std::process::exit(2);
    }

    let media = Ffmpeg::from_config(&config);
    let default_size = config.default_size.clone();
    let generator = SoraClient::new(config)?;
    let orchestrator = ChainOrchestrator::new(generator, media).with_default_size(default_size);

    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling...");
            cancel.cancel();
        }
    });

    match orchestrator.produce(&request).await {
        Ok(outcome) => {
            info!(
                "Segments used: {}, output: {}",
                outcome.segments.len(),
                outcome.output.display()
            );
            Ok(())
        }
        Err(err) => {
            match &err {
                ChainError::Generation { code, message } => {
                    error!("Video generation failed.");
                    error!("Error code: {}", code);
                    error!("Error message: {}", message);
                }
                other => error!("{}", other),
            }
            error!("Intermediate files left in {} for inspection", request.work_dir.display());
            std::process::exit(1);
        }
    }
}
