use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uitest_agent::{
    Agent, AgentConfig, BrowserConfig, ChromiumDriver, OpenAiClient, OpenAiConfig,
    TemplatePromptProvider,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let url = std::env::var("UITEST_URL").unwrap_or_else(|_| "https://example.com".into());
    let goal = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let goal = if goal.trim().is_empty() {
        "Open the 'More information' link and succeed once the IANA page is shown.".to_string()
    } else {
        goal
    };

    let driver = Arc::new(ChromiumDriver::launch(BrowserConfig { headless: false, ..Default::default() }).await?);
    driver.open_url(&url).await?;

    let client = OpenAiClient::new(OpenAiConfig::default())?;
    let prompts = TemplatePromptProvider::new(driver.clone());
    let mut agent = Agent::with_defaults(
        client,
        prompts,
        driver,
        AgentConfig { max_sequences: Some(30), ..Default::default() },
    );

    let report = agent.run(&goal).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.passed() {
        std::process::exit(1);
    }
    Ok(())
}
