use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::TrialConfig;
use crate::error::{Error, Result};

/// Where the target (or a cue) can appear, relative to the screen centre.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Left,
    Right,
}

impl Location {
    /// Centre-origin pixel offset, y up.
    pub fn offset(&self, gutter: f32) -> (f32, f32) {
        match self {
            Location::Left => (-gutter, 0.0),
            Location::Right => (gutter, 0.0),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Location::Left => "left",
            Location::Right => "right",
        }
    }
}

impl FromStr for Location {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "left" => Ok(Location::Left),
            "right" => Ok(Location::Right),
            _ => Err(Error::UnknownLocation(s.to_string())),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CueType {
    /// Dot drawn like the target.
    Dot,
    /// The cued side spelled out.
    Word,
}

impl FromStr for CueType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dot" => Ok(CueType::Dot),
            "word" => Ok(CueType::Word),
            _ => Err(Error::UnknownCueType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cue {
    pub kind: CueType,
    /// `None` puts the cue at the centre.
    pub location: Option<Location>,
}

impl Cue {
    pub fn stimulus_id(&self) -> StimulusId {
        match self.kind {
            CueType::Dot => StimulusId::CueDot,
            CueType::Word => StimulusId::CueWord,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StimulusId {
    Background,
    LeftMask,
    RightMask,
    Fixation,
    CueDot,
    CueWord,
    Target,
    Probe,
}

impl StimulusId {
    pub const ALL: [StimulusId; 8] = [
        StimulusId::Background,
        StimulusId::LeftMask,
        StimulusId::RightMask,
        StimulusId::Fixation,
        StimulusId::CueDot,
        StimulusId::CueWord,
        StimulusId::Target,
        StimulusId::Probe,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StimulusId::Background => "background",
            StimulusId::LeftMask => "left",
            StimulusId::RightMask => "right",
            StimulusId::Fixation => "fix",
            StimulusId::CueDot => "cue_dot",
            StimulusId::CueWord => "cue_word",
            StimulusId::Target => "target",
            StimulusId::Probe => "probe",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StimulusKind {
    Rect {
        width: f32,
        height: f32,
        color: [u8; 3],
    },
    /// Square of random grey cells, re-drawn on every frame.
    DynamicMask { size: f32, grain: f32 },
    Text {
        content: String,
        height: f32,
        color: [u8; 3],
    },
    Circle { radius: f32, color: [u8; 3] },
}

/// A drawable with a centre-origin (y up) position and an opacity in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Stimulus {
    pub kind: StimulusKind,
    pub pos: (f32, f32),
    pub opacity: f32,
}

impl Stimulus {
    fn new(kind: StimulusKind, pos: (f32, f32), opacity: f32) -> Self {
        Self { kind, pos, opacity }
    }
}

/// Every stimulus the trial can show, created once at setup.
#[derive(Debug, Clone)]
pub struct StimulusSet {
    stim: HashMap<StimulusId, Stimulus>,
}

impl StimulusSet {
    pub fn new(config: &TrialConfig, resolution: (u32, u32)) -> Self {
        let (w, h) = resolution;
        let text = |content: &str| StimulusKind::Text {
            content: content.to_string(),
            height: config.text_height_px,
            color: config.text_color,
        };
        let dot = StimulusKind::Circle {
            radius: config.target_radius_px,
            color: config.target_color,
        };
        let mask = StimulusKind::DynamicMask {
            size: config.mask_size_px,
            grain: config.mask_grain_px,
        };
        let centre = (0.0, 0.0);

        let stim = HashMap::from([
            (
                StimulusId::Background,
                Stimulus::new(
                    StimulusKind::Rect {
                        width: w as f32,
                        height: h as f32,
                        color: config.background_color,
                    },
                    centre,
                    1.0,
                ),
            ),
            (
                StimulusId::LeftMask,
                Stimulus::new(mask.clone(), Location::Left.offset(config.gutter_px), 1.0),
            ),
            (
                StimulusId::RightMask,
                Stimulus::new(mask, Location::Right.offset(config.gutter_px), 1.0),
            ),
            (StimulusId::Fixation, Stimulus::new(text("+"), centre, 1.0)),
            (StimulusId::CueDot, Stimulus::new(dot.clone(), centre, 1.0)),
            (StimulusId::CueWord, Stimulus::new(text(""), centre, 1.0)),
            // hidden until revealed
            (StimulusId::Target, Stimulus::new(dot, centre, 0.0)),
            (StimulusId::Probe, Stimulus::new(text("?"), centre, 1.0)),
        ]);

        Self { stim }
    }

    pub fn contains(&self, id: StimulusId) -> bool {
        self.stim.contains_key(&id)
    }

    pub fn get(&self, id: StimulusId) -> Result<&Stimulus> {
        self.stim.get(&id).ok_or(Error::MissingStimulus(id))
    }

    pub fn get_mut(&mut self, id: StimulusId) -> Result<&mut Stimulus> {
        self.stim.get_mut(&id).ok_or(Error::MissingStimulus(id))
    }

    pub fn set_pos(&mut self, id: StimulusId, pos: (f32, f32)) -> Result<()> {
        self.get_mut(id)?.pos = pos;
        Ok(())
    }

    pub fn set_opacity(&mut self, id: StimulusId, opacity: f32) -> Result<()> {
        if !opacity.is_finite() {
            return Err(Error::InvalidOpacity(opacity));
        }
        self.get_mut(id)?.opacity = opacity.clamp(0.0, 1.0);
        Ok(())
    }

    pub fn set_text(&mut self, id: StimulusId, text: &str) -> Result<()> {
        match &mut self.get_mut(id)?.kind {
            StimulusKind::Text { content, .. } => {
                *content = text.to_string();
                Ok(())
            }
            other => Err(Error::InvalidConfig(format!(
                "{} is not a text stimulus ({other:?})",
                id.name()
            ))),
        }
    }

    /// Stretches the background over a `width` x `height` display.
    pub fn set_resolution(&mut self, width: u32, height: u32) -> Result<()> {
        if let StimulusKind::Rect {
            width: w,
            height: h,
            ..
        } = &mut self.get_mut(StimulusId::Background)?.kind
        {
            *w = width as f32;
            *h = height as f32;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.stim.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stim.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StimulusId, &Stimulus)> {
        self.stim.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> StimulusSet {
        StimulusSet::new(&TrialConfig::default(), (1920, 1080))
    }

    #[test]
    fn parses_locations() {
        assert_eq!("left".parse::<Location>().unwrap(), Location::Left);
        assert_eq!("RIGHT".parse::<Location>().unwrap(), Location::Right);
        assert!(matches!(
            "up".parse::<Location>(),
            Err(Error::UnknownLocation(s)) if s == "up"
        ));
        assert_eq!(Location::Left.offset(300.0), (-300.0, 0.0));
        assert_eq!(Location::Right.to_string(), "right");
    }

    #[test]
    fn parses_cue_types() {
        assert_eq!("dot".parse::<CueType>().unwrap(), CueType::Dot);
        assert_eq!("Word".parse::<CueType>().unwrap(), CueType::Word);
        assert!("arrow".parse::<CueType>().is_err());
    }

    #[test]
    fn registers_every_stimulus_once() {
        let set = set();
        assert_eq!(set.len(), StimulusId::ALL.len());
        assert_eq!(set.iter().count(), set.len());
        for id in StimulusId::ALL {
            assert!(set.contains(id), "{id:?} missing");
        }
    }

    #[test]
    fn initial_layout() {
        let set = set();
        assert_eq!(set.get(StimulusId::LeftMask).unwrap().pos, (-300.0, 0.0));
        assert_eq!(set.get(StimulusId::RightMask).unwrap().pos, (300.0, 0.0));
        assert_eq!(set.get(StimulusId::Target).unwrap().opacity, 0.0);
        assert!(matches!(
            &set.get(StimulusId::Probe).unwrap().kind,
            StimulusKind::Text { content, .. } if content == "?"
        ));
        assert!(matches!(
            set.get(StimulusId::Background).unwrap().kind,
            StimulusKind::Rect { width, height, .. } if width == 1920.0 && height == 1080.0
        ));
    }

    #[test]
    fn opacity_is_clamped() {
        let mut set = set();
        set.set_opacity(StimulusId::Target, 1.7).unwrap();
        assert_eq!(set.get(StimulusId::Target).unwrap().opacity, 1.0);
        set.set_opacity(StimulusId::Target, -0.2).unwrap();
        assert_eq!(set.get(StimulusId::Target).unwrap().opacity, 0.0);
    }

    #[test]
    fn non_finite_opacity_is_rejected() {
        let mut set = set();
        set.set_opacity(StimulusId::Target, 0.4).unwrap();
        for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            assert!(matches!(
                set.set_opacity(StimulusId::Target, bad),
                Err(Error::InvalidOpacity(_))
            ));
        }
        assert_eq!(set.get(StimulusId::Target).unwrap().opacity, 0.4);
    }

    #[test]
    fn set_text_only_on_text() {
        let mut set = set();
        set.set_text(StimulusId::CueWord, "LEFT").unwrap();
        assert!(matches!(
            &set.get(StimulusId::CueWord).unwrap().kind,
            StimulusKind::Text { content, .. } if content == "LEFT"
        ));
        assert!(set.set_text(StimulusId::Target, "x").is_err());
    }

    #[test]
    fn background_follows_resolution() {
        let mut set = set();
        set.set_resolution(1280, 720).unwrap();
        assert!(matches!(
            set.get(StimulusId::Background).unwrap().kind,
            StimulusKind::Rect { width, height, .. } if width == 1280.0 && height == 720.0
        ));
    }
}
