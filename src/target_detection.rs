//! Target detection trial.
//!
//! Two dynamic masks flank a fixation cross. A target circle is revealed
//! over one of the masks after `target_onset`, then fixation and target make
//! way for a `?` probe at `probe_onset`. The trial ends on the first accepted
//! key press or at the timeout.

use crate::config::TrialConfig;
use crate::error::{Error, Result};
use crate::screen::{Presenter, Response, ScreenState, TrialOutcome};
use crate::stimulus::{Cue, CueType, Location, Stimulus, StimulusId, StimulusSet};
use crate::trigger::{
    KeyTrigger, Repeat, StartTime, TimeTrigger, TriggerAction, TriggerSchedule,
};

const TRIAL_START: [StimulusId; 4] = [
    StimulusId::LeftMask,
    StimulusId::RightMask,
    StimulusId::Fixation,
    StimulusId::Target,
];

const PROBE: [StimulusId; 3] = [StimulusId::LeftMask, StimulusId::RightMask, StimulusId::Probe];

pub struct TargetDetection {
    config: TrialConfig,
    stim: StimulusSet,
    stim_names: Vec<StimulusId>,
    triggers: TriggerSchedule,
    responder: KeyTrigger,

    /// Opacity applied at reveal; set on switch.
    target_opacity: Option<f32>,
    start_time: Option<u64>,
    last_frame: Option<u64>,
    dirty: bool,
}

impl TargetDetection {
    pub fn new(config: TrialConfig, resolution: (u32, u32)) -> Result<Self> {
        config.validate()?;
        let stim = StimulusSet::new(&config, resolution);

        let mut triggers = TriggerSchedule::new();
        triggers.add(TimeTrigger::new(
            StartTime::LastFlip,
            config.refresh_delay(),
            Repeat::Forever,
            TriggerAction::Refresh,
        ));
        triggers.add(TimeTrigger::new(
            StartTime::StateStart,
            config.target_onset(),
            Repeat::Times(1),
            TriggerAction::Reveal,
        ));
        triggers.add(TimeTrigger::new(
            StartTime::StateStart,
            config.probe_onset(),
            Repeat::Times(1),
            TriggerAction::Probe,
        ));
        let responder = KeyTrigger::new(config.response_keys.clone());

        Ok(Self {
            config,
            stim,
            stim_names: Vec::new(),
            triggers,
            responder,
            target_opacity: None,
            start_time: None,
            last_frame: None,
            dirty: true,
        })
    }

    /// Configures the target and runs the trial on `presenter`.
    ///
    /// Without a location the trial is target-absent: the target stays at
    /// the centre with opacity 0 whatever `opacity` says.
    pub fn switch_to<P: Presenter>(
        &mut self,
        presenter: &mut P,
        opacity: f32,
        location: Option<Location>,
        cue: Option<Cue>,
    ) -> Result<TrialOutcome> {
        self.prepare(opacity, location, cue)?;
        log::info!(
            "Trial: target {} (opacity {:.2}), cue {:?}",
            location.map_or("absent", |l| l.name()),
            self.target_opacity.unwrap_or(0.0),
            cue.map(|c| c.kind),
        );
        log::debug!(
            "Response keys: {}",
            self.responder.keys().collect::<Vec<_>>().join(", ")
        );

        let outcome = presenter.present(self)?;
        match &outcome {
            TrialOutcome::Response(r) => log::info!(
                "Response '{}' ({}) after {:.3} ms",
                r.key,
                r.label,
                r.rt_ns as f64 / 1_000_000.0
            ),
            TrialOutcome::Timeout { elapsed_ns } => log::warn!(
                "No response within {:.3} ms",
                *elapsed_ns as f64 / 1_000_000.0
            ),
        }
        Ok(outcome)
    }

    /// Sets up the stimuli for a trial without presenting it.
    pub fn prepare(
        &mut self,
        opacity: f32,
        location: Option<Location>,
        cue: Option<Cue>,
    ) -> Result<()> {
        if !opacity.is_finite() {
            return Err(Error::InvalidOpacity(opacity));
        }
        let pos = match location {
            Some(location) => {
                self.target_opacity = Some(opacity.clamp(0.0, 1.0));
                location.offset(self.config.gutter_px)
            }
            None => {
                self.target_opacity = Some(0.0);
                (0.0, 0.0)
            }
        };
        self.stim.set_pos(StimulusId::Target, pos)?;
        self.stim.set_opacity(StimulusId::Target, 0.0)?;

        self.stim_names = TRIAL_START.to_vec();
        if let Some(cue) = cue {
            self.place_cue(cue)?;
            // behind the target, in front of the fixation
            self.stim_names.insert(3, cue.stimulus_id());
        }
        Ok(())
    }

    fn place_cue(&mut self, cue: Cue) -> Result<()> {
        let id = cue.stimulus_id();
        let pos = cue
            .location
            .map_or((0.0, 0.0), |l| l.offset(self.config.gutter_px));
        self.stim.set_pos(id, pos)?;
        let offset = self.config.text_height_px * 1.5;
        match (cue.kind, cue.location) {
            (CueType::Word, location) => {
                let word = location.map_or("BOTH".to_string(), |l| l.name().to_uppercase());
                self.stim.set_text(id, &word)?;
                // above the fixation when centred
                if location.is_none() {
                    self.stim.set_pos(id, (0.0, offset))?;
                }
            }
            // below the fixation when centred
            (CueType::Dot, None) => self.stim.set_pos(id, (0.0, -offset))?,
            (CueType::Dot, Some(_)) => {}
        }
        Ok(())
    }

    /// Time of the last flip, or the state start before the first refresh.
    pub fn interval(&self) -> Option<u64> {
        self.last_frame.or(self.start_time)
    }

    pub fn refresh(&mut self, now: u64) {
        self.dirty = true;
        self.last_frame = Some(now);
    }

    pub fn reveal(&mut self, now: u64) -> Result<()> {
        let opacity = self.target_opacity.unwrap_or(0.0);
        self.stim.set_opacity(StimulusId::Target, opacity)?;
        log::debug!("Target revealed at {now} ns (opacity {opacity:.2})");
        self.refresh(now);
        Ok(())
    }

    pub fn probe(&mut self, now: u64) {
        self.stim_names = PROBE.to_vec();
        log::debug!("Probe shown at {now} ns");
        self.refresh(now);
    }

    pub fn visible_names(&self) -> &[StimulusId] {
        &self.stim_names
    }

    pub fn target(&self) -> Result<&Stimulus> {
        self.stim.get(StimulusId::Target)
    }

    pub fn target_position(&self) -> Result<(f32, f32)> {
        Ok(self.target()?.pos)
    }

    /// Opacity the target gets at reveal, once a trial is set up.
    pub fn target_opacity(&self) -> Option<f32> {
        self.target_opacity
    }

    pub fn config(&self) -> &TrialConfig {
        &self.config
    }

    fn dispatch(&mut self, action: TriggerAction, now: u64) -> Result<()> {
        match action {
            TriggerAction::Refresh => self.refresh(now),
            TriggerAction::Reveal => self.reveal(now)?,
            TriggerAction::Probe => self.probe(now),
        }
        Ok(())
    }
}

impl ScreenState for TargetDetection {
    fn start(&mut self, now: u64) {
        self.start_time = Some(now);
        self.last_frame = None;
        self.triggers.reset();
        self.dirty = true;
    }

    fn state_start(&self) -> Option<u64> {
        self.start_time
    }

    fn tick(&mut self, now: u64) -> Result<bool> {
        let Some(start) = self.start_time else {
            return Ok(false);
        };
        for action in self.triggers.due(now, start, self.last_frame) {
            self.dispatch(action, now)?;
        }
        Ok(std::mem::take(&mut self.dirty))
    }

    fn on_key(&mut self, key: &str, now: u64) -> Option<Response> {
        let start = self.start_time?;
        let label = self.responder.matches(key)?;
        Some(Response {
            key: key.to_string(),
            label: label.to_string(),
            rt_ns: now.saturating_sub(start),
            timestamp_ns: now,
        })
    }

    fn timed_out(&self, now: u64) -> bool {
        self.start_time.is_some_and(|start| {
            now.saturating_sub(start) >= self.config.timeout().as_nanos() as u64
        })
    }

    fn set_resolution(&mut self, width: u32, height: u32) -> Result<()> {
        self.stim.set_resolution(width, height)
    }

    fn stimuli(&self) -> &StimulusSet {
        &self.stim
    }

    fn visible_ids(&self) -> &[StimulusId] {
        &self.stim_names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::SimulatedPresenter;
    use std::time::Duration;

    const MS: u64 = 1_000_000;

    fn trial() -> TargetDetection {
        TargetDetection::new(TrialConfig::default(), (1920, 1080)).unwrap()
    }

    fn presenter() -> SimulatedPresenter {
        SimulatedPresenter::new(Duration::from_millis(1))
            .with_key_press(Duration::from_millis(1200), "y")
    }

    #[test]
    fn present_trial_reveals_target_at_onset() {
        let mut state = trial();
        let mut p = presenter();
        state
            .switch_to(&mut p, 1.0, Some(Location::Right), None)
            .unwrap();

        let before = p.frame_at(Duration::from_millis(499)).unwrap();
        assert_eq!(before.target_opacity, 0.0);
        assert_eq!(before.target_pos, (300.0, 0.0));

        let at = p.frame_at(Duration::from_millis(500)).unwrap();
        assert_eq!(at.target_opacity, 1.0);
        assert_eq!(at.target_pos, (300.0, 0.0));
        assert!(at.redrawn);
    }

    #[test]
    fn absent_trial_keeps_target_hidden_at_centre() {
        let mut state = trial();
        let mut p = presenter();
        state.switch_to(&mut p, 1.0, None, None).unwrap();

        assert_eq!(state.target_opacity(), Some(0.0));
        for t in [0, 499, 500, 999] {
            let frame = p.frame_at(Duration::from_millis(t)).unwrap();
            assert_eq!(frame.target_opacity, 0.0, "at {t} ms");
            assert_eq!(frame.target_pos, (0.0, 0.0), "at {t} ms");
        }
    }

    #[test]
    fn probe_replaces_fixation_and_target() {
        let mut state = trial();
        let mut p = presenter();
        state
            .switch_to(&mut p, 0.5, Some(Location::Left), None)
            .unwrap();

        let probe = [StimulusId::LeftMask, StimulusId::RightMask, StimulusId::Probe];
        assert_eq!(p.frame_at(Duration::from_millis(1000)).unwrap().visible, probe);
        assert_eq!(p.frame_at(Duration::from_millis(1199)).unwrap().visible, probe);
        assert_eq!(state.visible_names(), probe);
        assert_eq!(
            p.frame_at(Duration::from_millis(999)).unwrap().visible,
            TRIAL_START
        );
    }

    #[test]
    fn trial_starts_with_masks_fixation_and_hidden_target() {
        let mut state = trial();
        let mut p = presenter();
        state
            .switch_to(&mut p, 1.0, Some(Location::Left), None)
            .unwrap();

        for t in [0, 10, 250, 499] {
            let frame = p.frame_at(Duration::from_millis(t)).unwrap();
            assert_eq!(frame.visible, TRIAL_START, "at {t} ms");
            assert_eq!(frame.target_opacity, 0.0, "at {t} ms");
        }
    }

    #[test]
    fn interval_tracks_state_start_then_flips() {
        let mut state = trial();
        state.prepare(1.0, Some(Location::Right), None).unwrap();
        assert_eq!(state.interval(), None);

        state.start(100 * MS);
        assert_eq!(state.interval(), Some(100 * MS));

        // first frame only redraws, the refresh trigger is 10 ms out
        assert!(state.tick(105 * MS).unwrap());
        assert_eq!(state.interval(), Some(100 * MS));

        assert!(state.tick(110 * MS).unwrap());
        assert_eq!(state.interval(), Some(110 * MS));

        assert!(!state.tick(115 * MS).unwrap());
        state.refresh(117 * MS);
        assert_eq!(state.interval(), Some(117 * MS));
    }

    #[test]
    fn refresh_repeats_every_delay() {
        let mut state = trial();
        let mut p = presenter();
        state
            .switch_to(&mut p, 1.0, Some(Location::Right), None)
            .unwrap();

        let redraws = p
            .frames()
            .iter()
            .filter(|f| f.redrawn)
            .count();
        // initial flip + one refresh per 10 ms up to 1200 ms
        assert_eq!(redraws, 1 + 120);
    }

    #[test]
    fn response_reports_key_label_and_rt() {
        let mut state = trial();
        let mut p = presenter();
        let outcome = state
            .switch_to(&mut p, 1.0, Some(Location::Right), None)
            .unwrap();

        let response = outcome.response().unwrap();
        assert_eq!(response.key, "y");
        assert_eq!(response.label, "present");
        assert_eq!(response.rt(), Duration::from_millis(1200));
    }

    #[test]
    fn unknown_key_is_ignored_until_timeout() {
        let config = TrialConfig {
            timeout_ms: 1500,
            ..TrialConfig::default()
        };
        let mut state = TargetDetection::new(config, (800, 600)).unwrap();
        let mut p = SimulatedPresenter::new(Duration::from_millis(1))
            .with_key_press(Duration::from_millis(1200), "x");

        let outcome = state
            .switch_to(&mut p, 1.0, Some(Location::Right), None)
            .unwrap();
        assert_eq!(outcome, TrialOutcome::Timeout { elapsed_ns: 1500 * MS });
    }

    #[test]
    fn dot_cue_shown_before_probe() {
        let mut state = trial();
        let mut p = presenter();
        let cue = Cue {
            kind: CueType::Dot,
            location: Some(Location::Left),
        };
        state
            .switch_to(&mut p, 1.0, Some(Location::Left), Some(cue))
            .unwrap();

        let early = p.frame_at(Duration::from_millis(100)).unwrap();
        assert_eq!(
            early.visible,
            [
                StimulusId::LeftMask,
                StimulusId::RightMask,
                StimulusId::Fixation,
                StimulusId::CueDot,
                StimulusId::Target
            ]
        );
        assert_eq!(
            state.stimuli().get(StimulusId::CueDot).unwrap().pos,
            (-300.0, 0.0)
        );
        assert!(!p
            .frame_at(Duration::from_millis(1000))
            .unwrap()
            .visible
            .contains(&StimulusId::CueDot));
    }

    #[test]
    fn word_cue_spells_location() {
        let mut state = trial();
        let cue = Cue {
            kind: CueType::Word,
            location: Some(Location::Right),
        };
        state.prepare(1.0, Some(Location::Right), Some(cue)).unwrap();
        assert!(matches!(
            &state.stimuli().get(StimulusId::CueWord).unwrap().kind,
            crate::stimulus::StimulusKind::Text { content, .. } if content == "RIGHT"
        ));
    }

    #[test]
    fn centred_word_cue_sits_above_fixation() {
        let mut state = trial();
        let cue = Cue {
            kind: CueType::Word,
            location: None,
        };
        state.prepare(1.0, Some(Location::Left), Some(cue)).unwrap();
        let word = state.stimuli().get(StimulusId::CueWord).unwrap();
        assert!(matches!(
            &word.kind,
            crate::stimulus::StimulusKind::Text { content, .. } if content == "BOTH"
        ));
        assert_eq!(word.pos, (0.0, 60.0));
        assert_eq!(state.visible_names()[3], StimulusId::CueWord);
    }

    #[test]
    fn centred_dot_cue_sits_below_fixation() {
        let mut state = trial();
        let cue = Cue {
            kind: CueType::Dot,
            location: None,
        };
        state.prepare(1.0, Some(Location::Right), Some(cue)).unwrap();
        let fixation = state.stimuli().get(StimulusId::Fixation).unwrap().pos;
        let dot = state.stimuli().get(StimulusId::CueDot).unwrap().pos;
        assert_eq!(dot, (0.0, -60.0));
        assert_ne!(dot, fixation);
    }

    #[test]
    fn non_finite_opacity_leaves_trial_untouched() {
        let mut state = trial();
        state.prepare(0.4, Some(Location::Left), None).unwrap();
        for bad in [f32::NAN, f32::INFINITY] {
            assert!(matches!(
                state.prepare(bad, Some(Location::Right), None),
                Err(Error::InvalidOpacity(_))
            ));
        }
        assert_eq!(state.target_opacity(), Some(0.4));
        assert_eq!(state.target_position().unwrap(), (-300.0, 0.0));
    }

    #[test]
    fn target_position_follows_location() {
        let mut state = trial();
        state.prepare(1.0, Some(Location::Right), None).unwrap();
        assert_eq!(state.target_position().unwrap(), (300.0, 0.0));
        state.prepare(1.0, None, None).unwrap();
        assert_eq!(state.target_position().unwrap(), (0.0, 0.0));
    }

    #[test]
    fn second_trial_rearms_triggers() {
        let mut state = trial();
        let mut p = presenter();
        state
            .switch_to(&mut p, 1.0, Some(Location::Right), None)
            .unwrap();
        state
            .switch_to(&mut p, 0.3, Some(Location::Left), None)
            .unwrap();

        let before = p.frame_at(Duration::from_millis(499)).unwrap();
        assert_eq!(before.target_opacity, 0.0);
        assert_eq!(before.visible, TRIAL_START);
        let after = p.frame_at(Duration::from_millis(500)).unwrap();
        assert!((after.target_opacity - 0.3).abs() < f32::EPSILON);
        assert_eq!(after.target_pos, (-300.0, 0.0));
    }

    #[test]
    fn keys_before_start_are_ignored() {
        let mut state = trial();
        assert!(state.on_key("y", 10).is_none());
        assert!(!state.timed_out(u64::MAX));
        assert!(!state.tick(10).unwrap());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = TrialConfig {
            refresh_delay_ms: 0,
            ..TrialConfig::default()
        };
        assert!(TargetDetection::new(config, (800, 600)).is_err());
    }
}
