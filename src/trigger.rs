use std::collections::BTreeMap;
use std::time::Duration;

/// What a time trigger does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAction {
    Refresh,
    Reveal,
    Probe,
}

/// The point a trigger's delay is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartTime {
    StateStart,
    /// Last recorded flip, or the state start before the first flip.
    LastFlip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Forever,
    Times(u32),
}

#[derive(Debug, Clone)]
pub struct TimeTrigger {
    pub start: StartTime,
    pub delay: Duration,
    pub repeat: Repeat,
    pub action: TriggerAction,
    fired: u32,
}

impl TimeTrigger {
    pub fn new(start: StartTime, delay: Duration, repeat: Repeat, action: TriggerAction) -> Self {
        Self {
            start,
            delay,
            repeat,
            action,
            fired: 0,
        }
    }

    pub fn exhausted(&self) -> bool {
        match self.repeat {
            Repeat::Forever => false,
            Repeat::Times(n) => self.fired >= n,
        }
    }

    pub fn is_due(&self, now: u64, state_start: u64, last_flip: Option<u64>) -> bool {
        if self.exhausted() {
            return false;
        }
        let from = match self.start {
            StartTime::StateStart => state_start,
            StartTime::LastFlip => last_flip.unwrap_or(state_start),
        };
        now.saturating_sub(from) >= self.delay.as_nanos() as u64
    }

    pub fn fire(&mut self) -> TriggerAction {
        self.fired += 1;
        self.action
    }

    pub fn fired(&self) -> u32 {
        self.fired
    }

    pub fn reset(&mut self) {
        self.fired = 0;
    }
}

/// Time triggers registered once at setup and re-armed at every state start.
#[derive(Debug, Clone, Default)]
pub struct TriggerSchedule {
    triggers: Vec<TimeTrigger>,
}

impl TriggerSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, trigger: TimeTrigger) {
        self.triggers.push(trigger);
    }

    pub fn reset(&mut self) {
        self.triggers.iter_mut().for_each(TimeTrigger::reset);
    }

    /// Fires every due trigger at most once, in registration order.
    ///
    /// `last_flip` is read once up front, so a refresh fired by an earlier
    /// trigger in the same pass does not re-time the ones after it.
    pub fn due(&mut self, now: u64, state_start: u64, last_flip: Option<u64>) -> Vec<TriggerAction> {
        self.triggers
            .iter_mut()
            .filter(|t| t.is_due(now, state_start, last_flip))
            .map(TimeTrigger::fire)
            .collect()
    }

    pub fn triggers(&self) -> &[TimeTrigger] {
        &self.triggers
    }
}

/// Ends the trial when one of its keys is pressed.
#[derive(Debug, Clone)]
pub struct KeyTrigger {
    keys: BTreeMap<String, String>,
}

impl KeyTrigger {
    pub fn new(keys: BTreeMap<String, String>) -> Self {
        Self { keys }
    }

    /// Label of the pressed key, if it is one of ours.
    pub fn matches(&self, key: &str) -> Option<&str> {
        self.keys.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }
}
