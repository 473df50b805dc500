use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facedist_core::{
    load_image, FaceComparator, OnnxDescriptorExtractor, OnnxFaceDetector, OnnxLandmarkPredictor,
    Pipeline,
};
use serde::Serialize;
use std::fmt::Display;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(
    name = "facedist",
    version,
    about = "Find faces in an image and compare them by descriptor distance"
)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory containing the ONNX models
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,
    /// Print the report as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the bounding box of every face in an image
    Detect {
        /// Input image
        image: PathBuf,
        /// Number of 2x upsampling steps before detection
        #[arg(long)]
        upsample: Option<u32>,
    },
    /// Describe every face in an image and compare all pairs
    Recognize {
        /// Input image
        image: PathBuf,
        /// Distance below which two faces are the same person
        #[arg(long)]
        threshold: Option<f64>,
        /// Number of 2x upsampling steps before detection
        #[arg(long)]
        upsample: Option<u32>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // Usage errors exit 1 rather than clap's 2; help and version exit 0.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let Cli { config, model_dir, json, command } = cli;

    let mut config = Config::load(config.as_deref())?;
    if let Some(dir) = model_dir {
        config.model_dir = dir;
    }
    tracing::debug!(?config, "configuration resolved");

    match command {
        Commands::Detect { image, upsample } => {
            let detector = load_detector(&config)?;
            let mut pipeline = Pipeline::new(Box::new(detector))
                .with_upsample(upsample.unwrap_or(config.detect_upsample))?;

            let image = load_image(&image)?;
            let report = pipeline.detect(&image)?;
            emit(&report, json)
        }
        Commands::Recognize { image, threshold, upsample } => {
            let comparator = FaceComparator::new(threshold.unwrap_or(config.same_person_threshold))
                .context("invalid same-person threshold")?;

            let detector = load_detector(&config)?;
            let landmarks = OnnxLandmarkPredictor::load(
                &config.landmark_model_path(),
                config.intra_threads,
            )
            .context("loading landmark predictor")?;
            let extractor = OnnxDescriptorExtractor::load(
                &config.descriptor_model_path(),
                config.intra_threads,
            )
            .context("loading descriptor network")?
            .with_chip_padding(config.chip_padding);

            let mut pipeline = Pipeline::new(Box::new(detector))
                .with_recognition(Box::new(landmarks), Box::new(extractor))
                .with_comparator(comparator)
                .with_upsample(upsample.unwrap_or(config.recognize_upsample))?;

            let image = load_image(&image)?;
            let report = pipeline.recognize(&image)?;
            emit(&report, json)
        }
    }
}

fn load_detector(config: &Config) -> Result<OnnxFaceDetector> {
    let detector = OnnxFaceDetector::load(&config.detector_model_path(), config.intra_threads)
        .context("loading face detector")?
        .with_confidence_threshold(config.detection_confidence);
    Ok(detector)
}

fn emit<T: Serialize + Display>(report: &T, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}
