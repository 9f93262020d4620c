use std::{fs, io::stdout, path::PathBuf, time::SystemTime};

use anyhow::{Context, Result};
use backend::{
    CacheContext, DetectionCache, OnnxDetector, Settings, VideoIdentity, analyze,
    draw_annotations,
};
use clap::Parser;
use fern::Dispatch;
use log::{LevelFilter, info, warn};

#[derive(Parser, Debug)]
#[command(name = "pitchside", about = "Track players, referees and the ball in a match video")]
struct Args {
    /// Video to analyze
    input: PathBuf,
    /// Where to write the annotated video
    output: PathBuf,
    /// ONNX detection model exported with NMS
    #[arg(long, value_name = "PATH", default_value = "models/best.onnx")]
    model: PathBuf,
    /// JSON settings, defaults are used for anything missing
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// SQLite file caching detections and camera movement per video
    #[arg(long, value_name = "PATH")]
    cache: Option<PathBuf>,
    /// ONNX Runtime shared library to load instead of the system one
    #[arg(long, value_name = "PATH")]
    onnxruntime: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let settings = match &args.config {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("failed to read settings {}", path.display()))?;
            serde_json::from_str::<Settings>(&json)
                .with_context(|| format!("invalid settings {}", path.display()))?
        }
        None => Settings::default(),
    };
    if let Some(path) = &args.onnxruntime {
        ort::init_from(path.display().to_string()).commit()?;
    }

    let video = video::read_video(&args.input)?;
    if (video.fps - settings.speed.frame_rate as f64).abs() > 0.5 {
        warn!(
            target: "cli",
            "video runs at {} fps but speeds are computed at {} fps",
            video.fps,
            settings.speed.frame_rate
        );
    }

    let detector = OnnxDetector::new(&args.model, settings.detection.class_names.clone())?;
    let cache = args.cache.as_ref().map(DetectionCache::open).transpose()?;
    let identity = match cache {
        Some(_) => Some(VideoIdentity::from_path(&args.input)?),
        None => None,
    };
    let context = cache
        .as_ref()
        .zip(identity.as_ref())
        .map(|(cache, video)| CacheContext { cache, video });

    let analysis = analyze(&video.frames, Box::new(detector), &settings, context)?;
    let frames = draw_annotations(
        &video.frames,
        &analysis.tracks,
        &analysis.team_control,
        &analysis.camera_movement,
    )?;
    video::write_video(&args.output, &frames, video.fps)?;
    info!(target: "cli", "wrote {}", args.output.display());

    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    let level = if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let mut dispatch = Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(stdout());
    if let Some(path) = &args.log_file {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }
    dispatch.apply()?;
    log_panics::init();

    Ok(())
}
