pub mod action;
pub mod agent;
pub mod browser;
pub mod frame;
pub mod openai;
pub mod prompt;
pub mod response;

pub use action::{Action, ActionSequence, Rect, SwipeDirection};
pub use agent::{
    ActionPerformer, Agent, AgentConfig, AgentError, ModelClient, NoopPerformer, PromptProvider,
    RunOutcome, RunReport,
};
pub use browser::{Browser, BrowserConfig, ChromiumDriver};
pub use frame::{BracketFrameMapper, FrameDecodeError, FrameMapper};
pub use openai::{OpenAiClient, OpenAiConfig};
pub use prompt::{PromptRequest, ScreenSource, ScreenState, Screenshot, TemplatePromptProvider};
pub use response::{JsonResponseMapper, ResponseDecodeError, ResponseMapper};
