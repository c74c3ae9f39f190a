use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use target_detection::renderer::StimulusRenderer;
use target_detection::{
    Cue, CueType, Location, SimulatedPresenter, TargetDetection, TrialConfig, TrialOutcome,
    WindowPresenter,
};

/// Runs one target detection trial and prints the response time and key.
#[derive(Parser, Debug)]
#[command(name = "target-detection", version)]
struct Args {
    /// JSON trial configuration; missing fields use the defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Target opacity at reveal
    #[arg(long, default_value_t = 1.0)]
    opacity: f32,

    /// Target location: left, right or none (target absent)
    #[arg(long, default_value = "right")]
    location: String,

    /// Cue shown with the fixation: dot or word
    #[arg(long)]
    cue: Option<String>,

    /// Cue location: left or right (centre when omitted)
    #[arg(long, requires = "cue")]
    cue_location: Option<String>,

    /// Simulate the trial without opening a window
    #[arg(long)]
    headless: bool,

    /// Key pressed by the simulated participant
    #[arg(long, default_value = "y", requires = "headless")]
    respond_key: String,

    /// When the simulated participant responds, after trial start
    #[arg(long, default_value_t = 1200, requires = "headless")]
    respond_at_ms: u64,

    /// Simulated frame period
    #[arg(long, default_value_t = 1, requires = "headless")]
    frame_ms: u64,

    /// Simulated display size, WIDTHxHEIGHT
    #[arg(long, default_value = "1920x1080", value_parser = parse_resolution)]
    resolution: (u32, u32),

    /// Save the last simulated frame as PNG
    #[arg(long, requires = "headless")]
    screenshot: Option<PathBuf>,

    /// Write the trial record as JSON
    #[arg(long)]
    output: Option<PathBuf>,
}

fn parse_resolution(s: &str) -> std::result::Result<(u32, u32), String> {
    let (w, h) = s
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let w = w.trim().parse().map_err(|e| format!("bad width: {e}"))?;
    let h = h.trim().parse().map_err(|e| format!("bad height: {e}"))?;
    if w == 0 || h == 0 {
        return Err("resolution must be non-zero".into());
    }
    Ok((w, h))
}

/// `none` or `absent` make a target-absent trial.
fn parse_location_arg(s: &str) -> target_detection::Result<Option<Location>> {
    match s.to_ascii_lowercase().as_str() {
        "none" | "absent" => Ok(None),
        name => name.parse().map(Some),
    }
}

#[derive(Debug, Serialize)]
struct TrialRecord {
    opacity: f32,
    location: Option<Location>,
    cue: Option<Cue>,
    #[serde(flatten)]
    outcome: TrialOutcome,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => TrialConfig::load(path)?,
        None => TrialConfig::default(),
    };

    let location = parse_location_arg(&args.location)?;
    let cue = args
        .cue
        .as_deref()
        .map(|kind| -> Result<Cue> {
            Ok(Cue {
                kind: kind.parse::<CueType>()?,
                location: args
                    .cue_location
                    .as_deref()
                    .map(str::parse::<Location>)
                    .transpose()?,
            })
        })
        .transpose()?;

    let mut trial = TargetDetection::new(config.clone(), args.resolution)?;

    let outcome = if args.headless {
        let font = StimulusRenderer::<StdRng>::discover_font(config.font_path.as_deref())?;
        let mut presenter = SimulatedPresenter::new(Duration::from_millis(args.frame_ms))
            .with_key_press(Duration::from_millis(args.respond_at_ms), &args.respond_key);
        if args.screenshot.is_some() {
            let (w, h) = args.resolution;
            presenter =
                presenter.with_renderer(StimulusRenderer::new(w, h, font, StdRng::from_os_rng()))?;
        }

        let outcome = trial.switch_to(&mut presenter, args.opacity, location, cue)?;
        if let (Some(path), Some(pixmap)) = (&args.screenshot, presenter.last_frame_pixmap()) {
            pixmap
                .save_png(path)
                .with_context(|| format!("writing screenshot {}", path.display()))?;
            log::info!("Last frame saved to {}", path.display());
        }
        outcome
    } else {
        let mut presenter = WindowPresenter::new(&config)?;
        trial.switch_to(&mut presenter, args.opacity, location, cue)?
    };

    match &outcome {
        TrialOutcome::Response(r) => println!("{:.4} {}", r.rt().as_secs_f64(), r.key),
        TrialOutcome::Timeout { .. } => println!("timeout"),
    }

    if let Some(path) = &args.output {
        let record = TrialRecord {
            opacity: args.opacity,
            location,
            cue,
            outcome,
        };
        let file = std::fs::File::create(path)
            .with_context(|| format!("creating result file {}", path.display()))?;
        serde_json::to_writer_pretty(file, &record)?;
        log::info!("Trial record saved to {}", path.display());
    }

    Ok(())
}
