use crate::action::ActionSequence;
use crate::agent::{AgentError, PromptProvider};
use crate::response::{WireAction, WireSequence};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ========================= Prompt Payload =========================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Screenshot {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Everything the model client needs to ask for the next sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptRequest {
    /// Agent behaviour and reply format instructions.
    pub system_prompt: String,
    /// The test to perform, in the author's words.
    pub test_goal: String,
    /// Progress so far, e.g. descriptions of sequences already attempted.
    pub test_context: Option<String>,
    pub screenshot: Option<Screenshot>,
    /// Serialized element tree, frames included.
    pub view_hierarchy: String,
}

#[derive(Clone, Debug, Default)]
pub struct ScreenState {
    pub screenshot: Option<Screenshot>,
    pub view_hierarchy: String,
}

/// Captures the current state of the system under test.
#[async_trait]
pub trait ScreenSource: Send + Sync {
    async fn capture(&self) -> Result<ScreenState, AgentError>;
}

#[async_trait]
impl<T: ScreenSource + ?Sized> ScreenSource for Arc<T> {
    async fn capture(&self) -> Result<ScreenState, AgentError> {
        (**self).capture().await
    }
}

// ========================= Template Provider =========================

const AGENT_ROLE: &str = "You are an agent testing software applications. You are given a series of instructions on the test to perform along with a snapshot of the current state of the software application (screenshot and debug view hierarchy). You must respond with the next action to take to continue on with the test. The response must be in the following JSON format.";

const FIELD_GUIDE: &str = r#"Explanation of the JSON properties:
"description" a description of the actions to take. If a longer delay until next action is used, also mention this in the description.
"actions" is an array (with at least one element) of actions to take. List multiple actions in the array if a simple action needs to be repeated, e.g. when entering keyboard input.
"actionType" is an enum for type of action to take. can be "tap", "swipe", "enterText", "idle", "success" or "failure".
"elementFrame" the frame (coordinates) of the element to tap as found in the debug view hierarchy (if action is tap, swipe or enterText), written as "{{x, y}, {width, height}}".
"text": the text to enter (if action is enterText).
"swipeDirection": the direction to swipe towards (if action is swipe). can be "left", "right", "up" or "down".
"delayUntilNextSequence" is the expected delay in seconds until next action sequence should be performed (if action is tap, swipe, enterText or idle), e.g. to take into account delays in presentation or loading states."#;

static HEX_ADDRESS: Lazy<Regex> = Lazy::new(|| Regex::new(r", 0x[0-9a-fA-F]+").expect("hex regex"));
static PID: Lazy<Regex> = Lazy::new(|| Regex::new(r", pid: \d+").expect("pid regex"));
static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"identifier: '.*?'\s?").expect("identifier regex"));

/// Removes per-process noise (addresses, pids, identifiers) from a view dump.
pub fn scrub_hierarchy(raw: &str) -> String {
    let out = HEX_ADDRESS.replace_all(raw, "");
    let out = PID.replace_all(&out, "");
    IDENTIFIER.replace_all(&out, "").into_owned()
}

/// Context line telling the model what has already been tried.
pub fn history_context(previous: &[&str]) -> String {
    if previous.is_empty() {
        "Additional context:\nThe test has just started.".to_string()
    } else {
        format!(
            "Additional context:\nThe test is already in progress and the following steps have been attempted prior to now. Try not to repeat any of the previous actions unless specifically needed: {}.",
            previous.join(", ")
        )
    }
}

fn frame_action(action_type: &str, frame: &str) -> WireAction {
    WireAction {
        action_type: action_type.into(),
        element_frame: Some(frame.into()),
        ..Default::default()
    }
}

fn text_action(frame: &str, text: &str) -> WireAction {
    WireAction {
        text: Some(text.into()),
        ..frame_action("enterText", frame)
    }
}

fn response_examples() -> Vec<(&'static str, WireSequence)> {
    let frame = "{{100.0, 200.0}, {120.0, 60.0}}";
    vec![
        (
            "Example response for tapping the screen",
            WireSequence {
                description: "Tap '111' on the keyboard.".into(),
                actions: vec![frame_action("tap", frame); 3],
                delay_until_next_sequence: Some(1.0),
            },
        ),
        (
            "Example response for entering text into a textfield",
            WireSequence {
                description: "Enter text '7258' into the reg nr. field.".into(),
                actions: vec![text_action(frame, "7258")],
                delay_until_next_sequence: Some(1.0),
            },
        ),
        (
            "Example response for entering text into two different textfields on the same screen",
            WireSequence {
                description: "Enter text '7258' into the reg nr. field and '123412333' into the account number field.".into(),
                actions: vec![
                    text_action(frame, "7258"),
                    text_action("{{250.0, 200.0}, {120.0, 60.0}}", "123412333"),
                ],
                delay_until_next_sequence: Some(1.0),
            },
        ),
        (
            "Example response for swiping an element from left to right",
            WireSequence {
                description: "Swipe the confirm to swipe control.".into(),
                actions: vec![WireAction {
                    swipe_direction: Some("right".into()),
                    ..frame_action("swipe", frame)
                }],
                delay_until_next_sequence: Some(1.0),
            },
        ),
        (
            "Example response for succeeding the test",
            WireSequence {
                description: "Succeed the test because the screen contains a photo of a dog as required.".into(),
                actions: vec![WireAction {
                    action_type: "success".into(),
                    ..Default::default()
                }],
                delay_until_next_sequence: None,
            },
        ),
    ]
}

/// Builds the system prompt: role, worked examples, then the field guide.
pub fn system_prompt() -> String {
    let mut prompt = AGENT_ROLE.to_string();
    for (label, example) in response_examples() {
        let json = serde_json::to_string(&example).unwrap_or_default();
        prompt.push_str("\n\n");
        prompt.push_str(label);
        prompt.push_str(":\n");
        prompt.push_str(&json);
    }
    prompt.push_str("\n\n");
    prompt.push_str(FIELD_GUIDE);
    prompt
}

/// Prompt provider that pairs fixed instructions with a fresh screen capture.
pub struct TemplatePromptProvider<S: ScreenSource> {
    screen: S,
    system_prompt: String,
}

impl<S: ScreenSource> TemplatePromptProvider<S> {
    pub fn new(screen: S) -> Self {
        Self { screen, system_prompt: system_prompt() }
    }
}

#[async_trait]
impl<S: ScreenSource> PromptProvider for TemplatePromptProvider<S> {
    async fn make_prompt(
        &self,
        goal: &str,
        history: &[ActionSequence],
    ) -> Result<PromptRequest, AgentError> {
        if goal.trim().is_empty() {
            return Err(AgentError::Prompt("test goal is empty".into()));
        }
        let state = self.screen.capture().await?;
        let previous: Vec<&str> = history.iter().map(|s| s.description.as_str()).collect();
        Ok(PromptRequest {
            system_prompt: self.system_prompt.clone(),
            test_goal: goal.to_string(),
            test_context: Some(history_context(&previous)),
            screenshot: state.screenshot,
            view_hierarchy: scrub_hierarchy(&state.view_hierarchy),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::response::{JsonResponseMapper, ResponseMapper};

    struct FixedScreen(&'static str);

    #[async_trait]
    impl ScreenSource for FixedScreen {
        async fn capture(&self) -> Result<ScreenState, AgentError> {
            Ok(ScreenState { screenshot: None, view_hierarchy: self.0.to_string() })
        }
    }

    struct BrokenScreen;

    #[async_trait]
    impl ScreenSource for BrokenScreen {
        async fn capture(&self) -> Result<ScreenState, AgentError> {
            Err(AgentError::Screen("no window".into()))
        }
    }

    #[test]
    fn examples_in_system_prompt_are_valid_replies() {
        let mapper: JsonResponseMapper = JsonResponseMapper::default();
        for (_, example) in response_examples() {
            let json = serde_json::to_string(&example).unwrap();
            let seq = mapper.map(&json).expect("example must map");
            assert_eq!(seq.actions.len(), example.actions.len());
        }
        let prompt = system_prompt();
        assert!(prompt.starts_with(AGENT_ROLE));
        assert!(prompt.contains("\"actionType\":\"swipe\""));
        assert!(prompt.ends_with(FIELD_GUIDE));
    }

    #[test]
    fn context_mentions_fresh_start() {
        assert!(history_context(&[]).ends_with("The test has just started."));
        let ctx = history_context(&["Tap login", "Enter password"]);
        assert!(ctx.ends_with("needed: Tap login, Enter password."));
    }

    #[test]
    fn scrubs_process_noise() {
        let raw = "Button, 0x7fa1b2c3, {{1, 2}, {3, 4}}, identifier: 'login' label: 'Log in'\nApplication, pid: 4242, label: 'Demo'";
        assert_eq!(
            scrub_hierarchy(raw),
            "Button, {{1, 2}, {3, 4}}, label: 'Log in'\nApplication, label: 'Demo'"
        );
    }

    #[tokio::test]
    async fn builds_prompt_from_history_descriptions() {
        let provider = TemplatePromptProvider::new(FixedScreen("Window, pid: 1, {{0, 0}, {390, 844}}"));
        let history = vec![
            ActionSequence::new("Open settings", vec![Action::Idle]),
            ActionSequence::new("Scroll down", vec![Action::Idle]),
        ];
        let request = provider.make_prompt("toggle dark mode", &history).await.unwrap();
        assert_eq!(request.test_goal, "toggle dark mode");
        assert_eq!(request.view_hierarchy, "Window, {{0, 0}, {390, 844}}");
        assert!(request
            .test_context
            .unwrap()
            .contains("Open settings, Scroll down"));
    }

    #[tokio::test]
    async fn capture_failure_fails_prompt() {
        let provider = TemplatePromptProvider::new(BrokenScreen);
        let err = provider.make_prompt("anything", &[]).await.unwrap_err();
        assert!(matches!(err, AgentError::Screen(_)));
    }

    #[tokio::test]
    async fn blank_goal_is_rejected_before_capture() {
        let provider = TemplatePromptProvider::new(BrokenScreen);
        let err = provider.make_prompt("  \n", &[]).await.unwrap_err();
        assert!(matches!(err, AgentError::Prompt(_)));
        assert_eq!(err.to_string(), "prompt error: test goal is empty");
    }
}
