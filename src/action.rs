use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Delay applied after a sequence that does not say how long to wait.
pub const DEFAULT_DELAY_SECS: f64 = 1.0;
/// Whole seconds a requested delay saturates at (one day).
const MAX_DELAY_SECS: f64 = 86_400.0;

// ========================= Geometry =========================

/// On-screen element frame: origin plus size.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn min_x(&self) -> f64 {
        self.x
    }

    pub fn mid_x(&self) -> f64 {
        self.x + self.width / 2.0
    }

    pub fn max_x(&self) -> f64 {
        self.x + self.width
    }

    pub fn min_y(&self) -> f64 {
        self.y
    }

    pub fn mid_y(&self) -> f64 {
        self.y + self.height / 2.0
    }

    pub fn max_y(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> (f64, f64) {
        (self.mid_x(), self.mid_y())
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{{{}, {}}}, {{{}, {}}}}}",
            self.x, self.y, self.width, self.height
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwipeDirection {
    Left,
    Right,
    Up,
    Down,
}

impl SwipeDirection {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Up => "up",
            Self::Down => "down",
        }
    }

    /// Start and end point of a swipe across `frame` towards this direction.
    pub fn gesture(&self, frame: &Rect) -> ((f64, f64), (f64, f64)) {
        match self {
            Self::Up => ((frame.mid_x(), frame.max_y()), (frame.mid_x(), frame.min_y())),
            Self::Down => ((frame.mid_x(), frame.min_y()), (frame.mid_x(), frame.max_y())),
            Self::Left => ((frame.max_x(), frame.mid_y()), (frame.min_x(), frame.mid_y())),
            Self::Right => ((frame.min_x(), frame.mid_y()), (frame.max_x(), frame.mid_y())),
        }
    }
}

impl fmt::Display for SwipeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ========================= Actions =========================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Tap { frame: Rect },
    EnterText { frame: Rect, text: String },
    Swipe { frame: Rect, direction: SwipeDirection },
    Idle,
    Success,
    Failure,
}

impl Action {
    /// `Success` and `Failure` end the run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Action::Success | Action::Failure)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionSequence {
    pub description: String,
    pub actions: Vec<Action>,
    /// Seconds to wait before asking for the next sequence.
    pub delay_until_next_sequence: Option<f64>,
}

impl ActionSequence {
    pub fn new(description: impl Into<String>, actions: Vec<Action>) -> Self {
        Self {
            description: description.into(),
            actions,
            delay_until_next_sequence: None,
        }
    }

    pub fn with_delay(mut self, seconds: f64) -> Self {
        self.delay_until_next_sequence = Some(seconds);
        self
    }

    /// Terminal sequence whose sole action is `Failure`.
    pub fn failure(description: impl Into<String>) -> Self {
        Self::new(description, vec![Action::Failure])
    }

    pub fn last_action(&self) -> Option<&Action> {
        self.actions.last()
    }

    pub fn is_terminal(&self) -> bool {
        self.last_action().is_some_and(Action::is_terminal)
    }

    /// Pause before the next sequence, rounded up to whole seconds.
    pub fn delay(&self) -> Duration {
        let secs = self
            .delay_until_next_sequence
            .filter(|d| d.is_finite())
            .unwrap_or(DEFAULT_DELAY_SECS)
            .clamp(0.0, MAX_DELAY_SECS)
            .ceil();
        Duration::from_secs(secs as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_defaults_to_one_second() {
        let seq = ActionSequence::new("wait", vec![Action::Idle]);
        assert_eq!(seq.delay(), Duration::from_secs(1));
    }

    #[test]
    fn delay_rounds_fractions_up() {
        let seq = ActionSequence::new("tap", vec![Action::Idle]).with_delay(0.3);
        assert_eq!(seq.delay(), Duration::from_secs(1));
        let seq = seq.with_delay(2.01);
        assert_eq!(seq.delay(), Duration::from_secs(3));
        let seq = seq.with_delay(0.0);
        assert_eq!(seq.delay(), Duration::ZERO);
    }

    #[test]
    fn huge_delay_saturates_at_one_day() {
        let seq = ActionSequence::new("wait", vec![Action::Idle]).with_delay(1e300);
        assert_eq!(seq.delay(), Duration::from_secs(86_400));
    }

    #[test]
    fn terminal_detection_uses_last_action() {
        let frame = Rect::new(0.0, 0.0, 10.0, 10.0);
        let done = ActionSequence::new("done", vec![Action::Tap { frame }, Action::Success]);
        assert!(done.is_terminal());
        let busy = ActionSequence::new("busy", vec![Action::Failure, Action::Tap { frame }]);
        assert!(!busy.is_terminal());
        assert!(!ActionSequence::new("empty", vec![]).is_terminal());
    }

    #[test]
    fn swipe_gesture_crosses_frame() {
        let frame = Rect::new(100.0, 200.0, 120.0, 60.0);
        assert_eq!(
            SwipeDirection::Right.gesture(&frame),
            ((100.0, 230.0), (220.0, 230.0))
        );
        assert_eq!(
            SwipeDirection::Up.gesture(&frame),
            ((160.0, 260.0), (160.0, 200.0))
        );
    }

    #[test]
    fn rect_displays_in_frame_notation() {
        let frame = Rect::new(10.0, 20.5, 30.0, -4.0);
        assert_eq!(frame.to_string(), "{{10, 20.5}, {30, -4}}");
    }
}
