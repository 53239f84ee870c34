use anyhow::Result;
use async_trait::async_trait;
use chromiumoxide::browser::Browser as OxideBrowser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, InsertTextParams, MouseButton,
};
use chromiumoxide::layout::Point;
use chromiumoxide::page::{Page, ScreenshotParamsBuilder};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::action::{Action, ActionSequence, Rect, SwipeDirection};
use crate::agent::{ActionPerformer, AgentError};
use crate::prompt::{ScreenSource, ScreenState, Screenshot};

// Lists visible elements, one per line, with frames in `{{x, y}, {w, h}}` form.
const DESCRIBE_ELEMENTS_JS: &str = r#"
(function() {
  const sel = 'a,button,input,textarea,select,label,img,h1,h2,h3,h4,p,li,[role],[onclick],[contenteditable]';
  const round = (n) => Math.round(n * 10) / 10;
  const lines = [];
  for (const el of document.querySelectorAll(sel)) {
    const r = el.getBoundingClientRect();
    if (r.width === 0 || r.height === 0) continue;
    const style = window.getComputedStyle(el);
    if (style.visibility === 'hidden' || style.display === 'none') continue;
    const kind = el.getAttribute('role') || el.tagName.toLowerCase();
    const label = (el.getAttribute('aria-label') || el.innerText || el.value || el.placeholder || el.alt || '')
      .trim().replace(/\s+/g, ' ').slice(0, 80);
    lines.push(`${kind} '${label}' {{${round(r.x)}, ${round(r.y)}}, {${round(r.width)}, ${round(r.height)}}}`);
  }
  return lines.join('\n');
})()
"#;

#[derive(Clone)]
pub struct BrowserConfig {
    pub headless: bool,
    pub user_agent: Option<String>,
    pub viewport: (u32, u32),
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self { headless: true, user_agent: None, viewport: (1280, 800) }
    }
}

pub struct Browser {
    page: Page,
    _browser: OxideBrowser,
}

impl Browser {
    pub async fn launch(cfg: BrowserConfig) -> Result<Self> {
        let mut builder = chromiumoxide::browser::BrowserConfig::builder();
        if !cfg.headless {
            builder = builder.with_head();
        }
        // Fresh profile per run; Chromium refuses to share a locked profile.
        let ts = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis();
        let mut profile_dir: PathBuf = std::env::temp_dir();
        profile_dir.push(format!("uitest-agent-profile-{}-{}", std::process::id(), ts));
        std::fs::create_dir_all(&profile_dir)?;
        builder = builder
            .user_data_dir(profile_dir)
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        let bcfg = builder.build().map_err(|e| anyhow::anyhow!(e))?;
        let (browser, mut handler) = OxideBrowser::launch(bcfg).await?;
        tokio::spawn(async move {
            while let Some(_ev) = handler.next().await {}
        });
        let page = browser.new_page("about:blank").await?;
        if let Some(ua) = cfg.user_agent {
            page.set_user_agent(ua).await?;
        }
        // Frames handed to the model are viewport relative, so pin the viewport.
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(cfg.viewport.0 as i64)
            .height(cfg.viewport.1 as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(|e| anyhow::anyhow!(e))?;
        page.execute(metrics).await?;
        Ok(Self { page, _browser: browser })
    }

    pub async fn goto(&self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    async fn mouse(&self, kind: DispatchMouseEventType, x: f64, y: f64) -> Result<()> {
        let cmd = DispatchMouseEventParams::builder()
            .r#type(kind)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(|e| anyhow::anyhow!(e))?;
        self.page.execute(cmd).await?;
        Ok(())
    }

    pub async fn click_at(&self, x: f64, y: f64) -> Result<()> {
        self.page.move_mouse(Point { x, y }).await?;
        self.mouse(DispatchMouseEventType::MousePressed, x, y).await?;
        self.mouse(DispatchMouseEventType::MouseReleased, x, y).await
    }

    pub async fn type_text(&self, text: &str) -> Result<()> {
        self.page
            .execute(InsertTextParams { text: text.to_string() })
            .await?;
        Ok(())
    }

    /// Press at `from`, move to `to` in a few steps, release.
    pub async fn drag(&self, from: (f64, f64), to: (f64, f64)) -> Result<()> {
        const STEPS: u32 = 8;
        self.page.move_mouse(Point { x: from.0, y: from.1 }).await?;
        self.mouse(DispatchMouseEventType::MousePressed, from.0, from.1).await?;
        sleep(Duration::from_millis(200)).await;
        for i in 1..=STEPS {
            let t = f64::from(i) / f64::from(STEPS);
            let x = from.0 + (to.0 - from.0) * t;
            let y = from.1 + (to.1 - from.1) * t;
            self.mouse(DispatchMouseEventType::MouseMoved, x, y).await?;
        }
        self.mouse(DispatchMouseEventType::MouseReleased, to.0, to.1).await
    }

    pub async fn screenshot_png(&self) -> Result<Vec<u8>> {
        let params = ScreenshotParamsBuilder::default().full_page(false).build();
        Ok(self.page.screenshot(params).await?)
    }

    pub async fn describe_elements(&self) -> Result<String> {
        let result = self.page.evaluate(DESCRIBE_ELEMENTS_JS).await?;
        Ok(result.into_value::<String>()?)
    }

    /// Gives the page time to settle after navigation or input.
    pub async fn wait_for_stable(&self) {
        sleep(Duration::from_millis(400)).await;
    }
}

// ========================= Chromium Adapter =========================

/// Performs actions in, and captures screens from, a Chromium page.
pub struct ChromiumDriver {
    browser: Browser,
}

impl ChromiumDriver {
    pub async fn launch(cfg: BrowserConfig) -> Result<Self, AgentError> {
        let browser = Browser::launch(cfg)
            .await
            .map_err(|e| AgentError::Other(e.to_string()))?;
        Ok(Self { browser })
    }

    pub async fn open_url(&self, url: &str) -> Result<(), AgentError> {
        self.browser
            .goto(url)
            .await
            .map_err(|e| AgentError::Other(e.to_string()))?;
        self.browser.wait_for_stable().await;
        Ok(())
    }

    async fn tap(&self, frame: &Rect) -> Result<()> {
        let (x, y) = frame.center();
        self.browser.click_at(x, y).await
    }

    async fn enter_text(&self, frame: &Rect, text: &str) -> Result<()> {
        self.tap(frame).await?;
        self.browser.type_text(text).await
    }

    async fn swipe(&self, frame: &Rect, direction: SwipeDirection) -> Result<()> {
        let (from, to) = direction.gesture(frame);
        self.browser.drag(from, to).await
    }

    async fn act(&self, action: &Action) -> Result<()> {
        match action {
            Action::Tap { frame } => self.tap(frame).await,
            Action::EnterText { frame, text } => self.enter_text(frame, text).await,
            Action::Swipe { frame, direction } => self.swipe(frame, *direction).await,
            Action::Idle | Action::Success | Action::Failure => Ok(()),
        }
    }
}

#[async_trait]
impl ActionPerformer for ChromiumDriver {
    async fn perform(&self, sequence: &ActionSequence) {
        for action in &sequence.actions {
            match action {
                Action::Success => info!(description = %sequence.description, "test passed"),
                Action::Failure => error!(description = %sequence.description, "test failed"),
                _ => {}
            }
            if let Err(e) = self.act(action).await {
                warn!(action = ?action, error = %e, "action failed");
            }
        }
        self.browser.wait_for_stable().await;
    }
}

#[async_trait]
impl ScreenSource for ChromiumDriver {
    async fn capture(&self) -> Result<ScreenState, AgentError> {
        let png = self
            .browser
            .screenshot_png()
            .await
            .map_err(|e| AgentError::Screen(e.to_string()))?;
        let view_hierarchy = self
            .browser
            .describe_elements()
            .await
            .map_err(|e| AgentError::Screen(e.to_string()))?;
        Ok(ScreenState {
            screenshot: Some(Screenshot { mime_type: "image/png".into(), data: png }),
            view_hierarchy,
        })
    }
}
