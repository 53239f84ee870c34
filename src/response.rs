use crate::action::{Action, ActionSequence, Rect, SwipeDirection};
use crate::frame::{BracketFrameMapper, FrameDecodeError, FrameMapper};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ========================= Wire Schema =========================

/// Reply format the model is instructed to produce.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSequence {
    pub description: String,
    pub actions: Vec<WireAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_until_next_sequence: Option<f64>,
}

/// One flat action record; which optional fields are required depends on
/// `action_type`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAction {
    pub action_type: String,
    #[serde(default)]
    pub element_frame: Option<String>,
    #[serde(default)]
    pub swipe_direction: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

// ========================= Errors =========================

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResponseDecodeError {
    #[error("invalid response format: {0}")]
    Schema(String),
    #[error("response contains no actions")]
    NoActions,
    #[error("unknown action type: {0}")]
    UnknownActionType(String),
    #[error("invalid {action} action (no element location provided)")]
    MissingFrame { action: &'static str },
    #[error("invalid enter text action (text: nil or empty)")]
    EmptyText,
    #[error("invalid swipe action (unknown swipe direction: {0})")]
    UnknownSwipeDirection(String),
    #[error("invalid delay until next sequence: {0}")]
    InvalidDelay(f64),
    #[error(transparent)]
    Frame(#[from] FrameDecodeError),
}

// ========================= Mappers =========================

/// Converts raw model text into a validated sequence; either every action maps
/// or the whole reply is rejected.
pub trait ResponseMapper: Send + Sync {
    fn map(&self, raw: &str) -> Result<ActionSequence, ResponseDecodeError>;
}

#[derive(Clone, Debug, Default)]
pub struct JsonResponseMapper<F = BracketFrameMapper> {
    frames: F,
}

impl<F: FrameMapper> JsonResponseMapper<F> {
    pub fn new(frames: F) -> Self {
        Self { frames }
    }

    fn frame(&self, action: &'static str, raw: Option<&str>) -> Result<Rect, ResponseDecodeError> {
        match raw {
            Some(text) if !text.trim().is_empty() => Ok(self.frames.map(text)?),
            _ => Err(ResponseDecodeError::MissingFrame { action }),
        }
    }

    fn map_action(&self, action: &WireAction) -> Result<Action, ResponseDecodeError> {
        match action.action_type.as_str() {
            "tap" => {
                let frame = self.frame("tap", action.element_frame.as_deref())?;
                Ok(Action::Tap { frame })
            }
            "enterText" => {
                let text = match action.text.as_deref() {
                    Some(text) if !text.is_empty() => text.to_string(),
                    _ => return Err(ResponseDecodeError::EmptyText),
                };
                let frame = self.frame("enter text", action.element_frame.as_deref())?;
                Ok(Action::EnterText { frame, text })
            }
            "swipe" => {
                let direction = action
                    .swipe_direction
                    .as_deref()
                    .and_then(SwipeDirection::parse)
                    .ok_or_else(|| {
                        ResponseDecodeError::UnknownSwipeDirection(
                            action.swipe_direction.clone().unwrap_or_default(),
                        )
                    })?;
                let frame = self.frame("swipe", action.element_frame.as_deref())?;
                Ok(Action::Swipe { frame, direction })
            }
            "idle" => Ok(Action::Idle),
            "success" => Ok(Action::Success),
            "failure" => Ok(Action::Failure),
            other => Err(ResponseDecodeError::UnknownActionType(other.to_string())),
        }
    }
}

impl<F: FrameMapper> ResponseMapper for JsonResponseMapper<F> {
    fn map(&self, raw: &str) -> Result<ActionSequence, ResponseDecodeError> {
        let wire: WireSequence = serde_json::from_str(raw.trim())
            .map_err(|e| ResponseDecodeError::Schema(e.to_string()))?;
        if wire.actions.is_empty() {
            return Err(ResponseDecodeError::NoActions);
        }
        if let Some(delay) = wire.delay_until_next_sequence {
            if !delay.is_finite() || delay < 0.0 {
                return Err(ResponseDecodeError::InvalidDelay(delay));
            }
        }
        let actions = wire
            .actions
            .iter()
            .map(|a| self.map_action(a))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ActionSequence {
            description: wire.description,
            actions,
            delay_until_next_sequence: wire.delay_until_next_sequence,
        })
    }
}

/// Drops markdown code fences models like to wrap JSON replies in.
pub fn strip_code_fences(raw: &str) -> String {
    raw.replace("```json", "").replace("```", "").trim().to_string()
}
