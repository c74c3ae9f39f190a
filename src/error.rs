use std::path::PathBuf;

use thiserror::Error;

use crate::stimulus::StimulusId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown target location '{0}' (expected 'left' or 'right')")]
    UnknownLocation(String),
    #[error("Unknown cue type '{0}' (expected 'dot' or 'word')")]
    UnknownCueType(String),
    #[error("Opacity must be a finite number, got {0}")]
    InvalidOpacity(f32),
    #[error("Stimulus {0:?} is not registered")]
    MissingStimulus(StimulusId),

    // configuration
    #[error("Invalid trial configuration: {0}")]
    InvalidConfig(String),
    #[error("Cannot read config file {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Cannot parse config: {0}")]
    ConfigJson(#[from] serde_json::Error),

    // presentation
    #[error("Cannot load font {path}: {reason}")]
    Font { path: PathBuf, reason: String },
    #[error("Display error: {0}")]
    Display(String),
    #[error("Trial aborted by the participant")]
    Aborted,
}
