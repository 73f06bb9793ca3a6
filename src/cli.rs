use anyhow::{Context, Result};
use clap::builder::TypedValueParser;
use clap::{Parser, Subcommand};
use clip_chain::api::{ClipGenerator, ClipRequest, CropBox, SeedImage, SoraClient};
use clip_chain::clip_plan::ClipLength;
use clip_chain::config::Config;
use clip_chain::ffmpeg::{Ffmpeg, MediaToolkit};
use clip_chain::pipeline::validate_size;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "clip-gen", version, about = "Single-clip generation and frame tools")]
struct Cli {
    /// JSON configuration file (otherwise read from the environment / .env)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate one clip from text, optionally animating a still image
    Generate {
        /// Text description of the video to generate
        prompt: String,

        /// Video duration in seconds
        #[arg(short, long, default_value_t = 12, value_parser = clap::builder::PossibleValuesParser::new(["4", "8", "12"]).map(|s| s.parse::<u32>().unwrap_or(12)))]
        seconds: u32,

        /// Video resolution WIDTHxHEIGHT
        #[arg(short = 'r', long, default_value = "1280x720")]
        size: String,

        /// Output filename
        #[arg(short, long, default_value = "output.mp4")]
        output: PathBuf,

        /// Input image for image-to-video generation
        #[arg(short, long)]
        input_image: Option<PathBuf>,

        /// Frame index where the input image appears
        #[arg(long, default_value_t = 0)]
        frame_index: u32,

        #[arg(long, default_value_t = 0.0)]
        crop_left: f64,

        #[arg(long, default_value_t = 0.0)]
        crop_top: f64,

        #[arg(long, default_value_t = 1.0)]
        crop_right: f64,

        #[arg(long, default_value_t = 1.0)]
        crop_bottom: f64,
    },

    /// Extract the last frame of a video as an image
    LastFrame {
        /// Input video file
        video: PathBuf,

        /// Output image file
        #[arg(short, long)]
        output: PathBuf,
    },
}

async fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load(path).await?,
        None => {
            dotenv::dotenv().ok();
            Config::from_env()?
        }
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Generate {
            prompt,
            seconds,
            size,
            output,
            input_image,
            frame_index,
            crop_left,
            crop_top,
            crop_right,
            crop_bottom,
        } => {
            validate_size(&size)?;
            let length = ClipLength::from_seconds(seconds)
                .with_context(|| format!("unsupported duration {}s", seconds))?;
            let seed = match input_image {
                Some(path) => {
                    let crop = CropBox {
                        left_fraction: crop_left,
                        top_fraction: crop_top,
                        right_fraction: crop_right,
                        bottom_fraction: crop_bottom,
                    };
                    crop.validate()?;
                    Some(SeedImage {
                        path,
                        frame_index,
                        crop,
                    })
                }
                None => None,
            };

            let config = load_config(cli.config.as_ref()).await?;
            let client = SoraClient::new(config)?;
            let request = ClipRequest {
                prompt,
                length,
                size,
                seed,
            };

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            if let Err(err) = client.generate(&request, &output, &cancel).await {
                eprintln!("Video generation failed: {}", err);
                std::process::exit(1);
            }
            info!("Video saved as {}", output.display());
        }
        Command::LastFrame { video, output } => {
            let media = match cli.config.as_ref() {
                Some(_) => Ffmpeg::from_config(&load_config(cli.config.as_ref()).await?),
                None => Ffmpeg::default(),
            };
            media.extract_last_frame(&video, &output).await?;
            info!("Last frame extracted and saved to: {}", output.display());
        }
    }

    Ok(())
}
