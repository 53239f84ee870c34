use crate::action::Rect;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
#[error("{reason}")]
pub struct FrameDecodeError {
    pub reason: String,
}

/// Turns an element location string into a rectangle. The textual format is
/// owned by whichever environment serialized the screen.
pub trait FrameMapper: Send + Sync {
    fn map(&self, text: &str) -> Result<Rect, FrameDecodeError>;
}

static FRAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    let num = r"([-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)";
    Regex::new(&format!(
        r"\{{\{{\s*{num}\s*,\s*{num}\s*\}}\s*,\s*\{{\s*{num}\s*,\s*{num}\s*\}}\}}"
    ))
    .expect("frame regex")
});

/// Parses frames written as `{{x, y}, {width, height}}`.
#[derive(Clone, Copy, Debug, Default)]
pub struct BracketFrameMapper;

impl FrameMapper for BracketFrameMapper {
    fn map(&self, text: &str) -> Result<Rect, FrameDecodeError> {
        let invalid = || FrameDecodeError {
            reason: format!("invalid element frame: {text}"),
        };
        let caps = FRAME_REGEX.captures(text).ok_or_else(invalid)?;
        let mut values = [0.0f64; 4];
        for (i, slot) in values.iter_mut().enumerate() {
            let value: f64 = caps[i + 1].parse().map_err(|_| invalid())?;
            if !value.is_finite() {
                return Err(invalid());
            }
            *slot = value;
        }
        let [x, y, width, height] = values;
        Ok(Rect::new(x, y, width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_integer_frame() {
        let rect = BracketFrameMapper.map("{{10, 20}, {30, 40}}").unwrap();
        assert_eq!(rect, Rect::new(10.0, 20.0, 30.0, 40.0));
    }

    #[test]
    fn parses_negative_and_fractional_values() {
        let rect = BracketFrameMapper.map("{{-12.5, 0.25}, {390.0, 44}}").unwrap();
        assert_eq!(rect, Rect::new(-12.5, 0.25, 390.0, 44.0));
    }

    #[test]
    fn tolerates_surrounding_text_and_spacing() {
        let rect = BracketFrameMapper
            .map("Button 'Login' {{ 1,2 },{ 3 , 4 }} enabled")
            .unwrap();
        assert_eq!(rect, Rect::new(1.0, 2.0, 3.0, 4.0));
    }

    #[test]
    fn rejects_missing_bracket_pair() {
        assert!(BracketFrameMapper.map("{10, 20}, {30, 40}").is_err());
        assert!(BracketFrameMapper.map("{{10, 20}}").is_err());
        assert!(BracketFrameMapper.map("").is_err());
    }

    #[test]
    fn rejects_non_numeric_tokens() {
        let err = BracketFrameMapper.map("{{ten, 20}, {30, 40}}").unwrap_err();
        assert_eq!(err.reason, "invalid element frame: {{ten, 20}, {30, 40}}");
        assert!(BracketFrameMapper.map("{{10, 20}, {30, abc}}").is_err());
        assert!(BracketFrameMapper.map("{{1.2.3, 20}, {30, 40}}").is_err());
    }

    #[test]
    fn rejects_overflowing_numbers() {
        assert!(BracketFrameMapper.map("{{1e999, 0}, {1, 1}}").is_err());
    }
}
