use std::time::Duration;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tiny_skia::Pixmap;

use crate::error::{Error, Result};
use crate::renderer::StimulusRenderer;
use crate::stimulus::{Stimulus, StimulusId, StimulusSet};
use crate::timer::{ManualClock, Timer};

/// Key press that ended a trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub key: String,
    pub label: String,
    /// Time from state start to the key press.
    pub rt_ns: u64,
    pub timestamp_ns: u64,
}

impl Response {
    pub fn rt(&self) -> Duration {
        Duration::from_nanos(self.rt_ns)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum TrialOutcome {
    Response(Response),
    Timeout { elapsed_ns: u64 },
}

impl TrialOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            TrialOutcome::Response(r) => Some(r),
            TrialOutcome::Timeout { .. } => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TrialOutcome::Timeout { .. })
    }
}

/// A screen that a [`Presenter`] shows until a response or a timeout.
///
/// All times are nanoseconds on the presenter's clock.
pub trait ScreenState {
    /// Arms the state; `now` becomes the state start time.
    fn start(&mut self, now: u64);
    fn state_start(&self) -> Option<u64>;
    /// Runs due triggers. Returns true when the frame must be redrawn.
    fn tick(&mut self, now: u64) -> Result<bool>;
    fn on_key(&mut self, key: &str, now: u64) -> Option<Response>;
    fn timed_out(&self, now: u64) -> bool;

    /// The timeout outcome, once `now` is past the timeout.
    fn check_timeout(&self, now: u64) -> Option<TrialOutcome> {
        if !self.timed_out(now) {
            return None;
        }
        let start = self.state_start().unwrap_or(now);
        Some(TrialOutcome::Timeout {
            elapsed_ns: now.saturating_sub(start),
        })
    }
    /// Called when the display size is known or changes.
    fn set_resolution(&mut self, _width: u32, _height: u32) -> Result<()> {
        Ok(())
    }

    fn stimuli(&self) -> &StimulusSet;
    /// Stimuli drawn after the background, back to front.
    fn visible_ids(&self) -> &[StimulusId];

    /// Background first, then the visible stimuli.
    fn visible(&self) -> Result<Vec<&Stimulus>> {
        let stimuli = self.stimuli();
        std::iter::once(StimulusId::Background)
            .chain(self.visible_ids().iter().copied())
            .map(|id| stimuli.get(id))
            .collect()
    }
}

/// Shows a screen state and blocks until it ends.
pub trait Presenter {
    fn present<S: ScreenState>(&mut self, state: &mut S) -> Result<TrialOutcome>;
}

/// What was on screen after one simulated frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSnapshot {
    pub time_ns: u64,
    pub redrawn: bool,
    pub visible: Vec<StimulusId>,
    pub target_opacity: f32,
    pub target_pos: (f32, f32),
}

/// Headless presenter: steps a [`ManualClock`] one frame at a time and
/// optionally delivers a scripted key press.
pub struct SimulatedPresenter {
    clock: ManualClock,
    frame_period: Duration,
    key_press: Option<(Duration, String)>,
    frames: Vec<FrameSnapshot>,
    raster: Option<(StimulusRenderer<StdRng>, Pixmap)>,
}

impl SimulatedPresenter {
    pub fn new(frame_period: Duration) -> Self {
        Self {
            clock: ManualClock::new(),
            frame_period,
            key_press: None,
            frames: Vec::new(),
            raster: None,
        }
    }

    /// Presses `key` once, `at` after the state starts.
    pub fn with_key_press(mut self, at: Duration, key: impl Into<String>) -> Self {
        self.key_press = Some((at, key.into()));
        self
    }

    /// Rasterises every redrawn frame, keeping the last one.
    pub fn with_renderer(mut self, renderer: StimulusRenderer<StdRng>) -> Result<Self> {
        let (w, h) = renderer.size();
        let pixmap = Pixmap::new(w, h)
            .ok_or_else(|| Error::Display(format!("cannot allocate {w}x{h} canvas")))?;
        self.raster = Some((renderer, pixmap));
        Ok(self)
    }

    pub fn frames(&self) -> &[FrameSnapshot] {
        &self.frames
    }

    /// Last frame at or before `t` after state start.
    pub fn frame_at(&self, t: Duration) -> Option<&FrameSnapshot> {
        let start = self.frames.first()?.time_ns;
        let t = start + t.as_nanos() as u64;
        self.frames.iter().rev().find(|f| f.time_ns <= t)
    }

    pub fn last_frame_pixmap(&self) -> Option<&Pixmap> {
        self.raster.as_ref().map(|(_, p)| p)
    }

    fn snapshot<S: ScreenState>(&mut self, state: &S, now: u64, redrawn: bool) -> Result<()> {
        let target = state.stimuli().get(StimulusId::Target)?;
        self.frames.push(FrameSnapshot {
            time_ns: now,
            redrawn,
            visible: state.visible_ids().to_vec(),
            target_opacity: target.opacity,
            target_pos: target.pos,
        });
        Ok(())
    }
}

impl Presenter for SimulatedPresenter {
    fn present<S: ScreenState>(&mut self, state: &mut S) -> Result<TrialOutcome> {
        if self.frame_period.is_zero() {
            return Err(Error::Display("frame period must be > 0".into()));
        }
        self.frames.clear();
        let start = self.clock.now();
        state.start(start);
        let mut pending_key = self.key_press.clone();

        loop {
            let now = self.clock.now();
            let dirty = state.tick(now)?;
            if dirty {
                if let Some((renderer, pixmap)) = &mut self.raster {
                    renderer.render_frame(pixmap, &state.visible()?)?;
                }
                self.clock.record_frame(self.frame_period);
            }
            self.snapshot(state, now, dirty)?;

            if let Some((at, key)) = &pending_key {
                if now - start >= at.as_nanos() as u64 {
                    let key = key.clone();
                    pending_key = None;
                    match state.on_key(&key, now) {
                        Some(response) => return Ok(TrialOutcome::Response(response)),
                        None => log::debug!("Ignoring key '{key}'"),
                    }
                }
            }

            if let Some(timeout) = state.check_timeout(now) {
                return Ok(timeout);
            }
            self.clock.advance(self.frame_period);
        }
    }
}
