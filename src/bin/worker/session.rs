use anyhow::Result;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use browser_task_agent::Observation;

use crate::command::BrowserCommand;
use crate::dom;

/// One Chrome instance with a single working tab, alive for the whole run.
pub struct BrowserSession {
    _browser: Browser,
    tab: Arc<Tab>,
}

impl BrowserSession {
    pub fn launch(headless: bool, chrome: Option<PathBuf>) -> Result<Self> {
        let options = LaunchOptions {
            headless,
            path: chrome,
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
            ],
            // The agent may think for a while between commands.
            idle_browser_timeout: Duration::from_secs(600),
            ..Default::default()
        };

        info!(headless, "starting chrome");
        let browser = Browser::new(options)
            .map_err(|e| anyhow::anyhow!("Browser launch failed: {}", e))?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;
        info!("chrome ready");

        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    /// Apply one command and report the page afterwards.
    pub fn execute(&self, command: &BrowserCommand) -> Result<Observation> {
        let tab = &self.tab;

        match command {
            BrowserCommand::Navigate { url } => {
                tab.navigate_to(url)?;
                tab.wait_until_navigated()?;
            }
            BrowserCommand::Click { element_id } => {
                dom::click_by_id(tab, *element_id)?;
                // A click may start a navigation.
                let _ = tab.wait_until_navigated();
                std::thread::sleep(Duration::from_millis(200));
            }
            BrowserCommand::Type { element_id, text } => {
                dom::type_by_id(tab, *element_id, text)?;
                std::thread::sleep(Duration::from_millis(150));
            }
            BrowserCommand::Scroll { down } => dom::scroll(tab, *down)?,
            BrowserCommand::Wait { milliseconds } => {
                std::thread::sleep(Duration::from_millis(*milliseconds));
            }
            BrowserCommand::PressEnter => {
                tab.press_key("Enter")?;
                let _ = tab.wait_until_navigated();
            }
            BrowserCommand::Observe => {}
        }

        dom::observe(tab)
    }
}
