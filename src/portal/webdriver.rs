//! Minimal W3C WebDriver client for a running chromedriver.

use super::{Browser, BrowserError, ElementHandle};
use crate::config::PortalConfig;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

/// W3C element reference key.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct WebDriverBrowser {
    inner: reqwest::Client,
    session_url: Url,
}

impl WebDriverBrowser {
    /// Start a Chrome session that saves downloads into `download_dir`.
    pub async fn connect(config: &PortalConfig, download_dir: &Path) -> Result<Self, BrowserError> {
        let inner = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.click_timeout_secs.max(30)))
            .build()?;

        let base = Url::parse(&format!("{}/", config.webdriver_url.trim_end_matches('/')))
            .map_err(|e| BrowserError::Protocol(format!("webdriver url: {}", e)))?;

        let mut args = vec!["--window-size=1920,1080".to_string()];
        if config.headless {
            args.push("--headless=new".to_string());
        }
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": args,
                        "prefs": {
                            "download.default_directory": download_dir.to_string_lossy(),
                            "download.prompt_for_download": false,
                        }
                    }
                }
            }
        });

        let new_session = base
            .join("session")
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        let value = send(&inner, Method::POST, new_session, Some(capabilities)).await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::Protocol("no sessionId in new-session response".into()))?;

        let session_url = base
            .join(&format!("session/{}/", session_id))
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        info!("WebDriver session {} started", session_id);

        let browser = Self { inner, session_url };
        if let Err(e) = browser.command(Method::POST, "window/maximize", Some(json!({}))).await {
            warn!("Could not maximise window: {}", e);
        }
        Ok(browser)
    }

    /// End the session and close the browser window.
    pub async fn close(self) -> Result<(), BrowserError> {
        send(&self.inner, Method::DELETE, self.session_url.clone(), None).await?;
        info!("WebDriver session closed");
        Ok(())
    }

    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, BrowserError> {
        let url = self
            .session_url
            .join(path)
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        send(&self.inner, method, url, body).await
    }

    async fn find(&self, xpath: &str) -> Result<ElementHandle, BrowserError> {
        let value = self
            .command(
                Method::POST,
                "element",
                Some(json!({ "using": "xpath", "value": xpath })),
            )
            .await?;
        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(|id| ElementHandle(id.to_string()))
            .ok_or_else(|| BrowserError::Protocol(format!("no element reference for {}", xpath)))
    }

    async fn is_clickable(&self, element: &ElementHandle) -> Result<bool, BrowserError> {
        let displayed = self
            .command(Method::GET, &format!("element/{}/displayed", element.0), None)
            .await?;
        let enabled = self
            .command(Method::GET, &format!("element/{}/enabled", element.0), None)
            .await?;
        Ok(displayed.as_bool().unwrap_or(false) && enabled.as_bool().unwrap_or(false))
    }

    async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value, BrowserError> {
        self.command(
            Method::POST,
            "execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }
}

/// Send one WebDriver command and unwrap the `value` member of the reply.
async fn send(
    client: &reqwest::Client,
    method: Method,
    url: Url,
    body: Option<Value>,
) -> Result<Value, BrowserError> {
    debug!("{} {}", method, url);
    let mut req = client.request(method, url);
    if let Some(body) = body {
        req = req.json(&body);
    }
    let resp = req.send().await?;
    let status = resp.status();
    let mut payload: Value = resp.json().await?;
    let value = payload.get_mut("value").map(Value::take).unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(value);
    }
    let error = value.get("error").and_then(Value::as_str).unwrap_or("unknown error");
    let message = value.get("message").and_then(Value::as_str).unwrap_or_default();
    Err(BrowserError::Protocol(format!("HTTP {} {}: {}", status, error, message)))
}

#[async_trait]
impl Browser for WebDriverBrowser {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        self.command(Method::POST, "url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    async fn wait_clickable(
        &self,
        xpath: &str,
        timeout: Duration,
    ) -> Result<ElementHandle, BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.find(xpath).await {
                Ok(element) => match self.is_clickable(&element).await {
                    Ok(true) => return Ok(element),
                    Ok(false) => {}
                    Err(e) => debug!("{}: {}", xpath, e),
                },
                Err(BrowserError::Http(e)) => return Err(BrowserError::Http(e)),
                Err(e) => debug!("{}: {}", xpath, e),
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout {
                    locator: xpath.to_string(),
                    secs: timeout.as_secs(),
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn scroll_into_view(&self, element: &ElementHandle) -> Result<(), BrowserError> {
        self.execute(
            "arguments[0].scrollIntoView({block: 'center'});",
            vec![json!({ ELEMENT_KEY: element.0 })],
        )
        .await
        .map(|_| ())
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), BrowserError> {
        self.command(Method::POST, &format!("element/{}/click", element.0), Some(json!({})))
            .await
            .map(|_| ())
    }

    async fn body_html(&self) -> Result<String, BrowserError> {
        let value = self.execute("return document.body.innerHTML;", vec![]).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BrowserError::Protocol("document body is not a string".into()))
    }
}
