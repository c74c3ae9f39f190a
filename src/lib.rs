pub mod app;
pub mod config;
pub mod error;
pub mod renderer;
pub mod screen;
pub mod stimulus;
pub mod target_detection;
pub mod timer;
pub mod trigger;

pub use app::WindowPresenter;
pub use config::TrialConfig;
pub use error::{Error, Result};
pub use screen::{Presenter, Response, ScreenState, SimulatedPresenter, TrialOutcome};
pub use stimulus::{Cue, CueType, Location, StimulusId};
pub use target_detection::TargetDetection;
