use std::time::Duration;

use fantoccini::{Client, ClientBuilder};
use serde_json::{json, Map, Value};

use crate::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Returns the search widget's shadow root markup once provider cards are in it, else null.
const SHADOW_RESULTS_SCRIPT: &str = r#"
const host = document.querySelector('#loyal-search');
const root = host && host.shadowRoot;
if (!root || !root.querySelector("a[href*='provider'], span.text-md")) {
    return null;
}
return root.innerHTML;
"#;

/// Renders results pages in a WebDriver-controlled Chrome, one session per page.
#[derive(Debug, Clone)]
pub struct Browser {
    webdriver_url: String,
    user_agent: String,
    timeout: Duration,
    headless: bool,
}

impl Browser {
    pub fn new(webdriver_url: &str, user_agent: &str, timeout: Duration, headless: bool) -> Self {
        Self {
            webdriver_url: webdriver_url.to_owned(),
            user_agent: user_agent.to_owned(),
            timeout,
            headless,
        }
    }

    fn capabilities(&self) -> Map<String, Value> {
        let mut args = vec![
            "--disable-notifications".to_owned(),
            "--no-sandbox".to_owned(),
            "--disable-dev-shm-usage".to_owned(),
            format!("--user-agent={}", self.user_agent),
        ];
        if self.headless {
            args.push("--headless=new".to_owned());
        }
        let mut capabilities = Map::new();
        capabilities.insert("goog:chromeOptions".to_owned(), json!({ "args": args }));
        capabilities
    }

    /// Loads `url` and returns the rendered `#loyal-search` shadow root.
    #[tracing::instrument(skip(self))]
    pub async fn render(&self, url: &str) -> Result<String, Error> {
        let mut builder = ClientBuilder::rustls();
        builder.capabilities(self.capabilities());
        let client = builder.connect(&self.webdriver_url).await.map_err(|err| {
            tracing::error!("Failed starting webdriver session at {}: {}", self.webdriver_url, err);
            err
        })?;

        let rendered = self.rendered_results(&client, url).await;
        if let Err(err) = client.close().await {
            tracing::warn!("failed closing webdriver session: {}", err);
        }
        rendered
    }

    async fn rendered_results(&self, client: &Client, url: &str) -> Result<String, Error> {
        tracing::debug!("navigating to {}", url);
        client.goto(url).await?;
        tokio::time::timeout(self.timeout, wait_for_cards(client))
            .await
            .map_err(|_| {
                Error::UnexpectedHtml(format!(
                    "no provider cards rendered in #loyal-search within {:?}",
                    self.timeout
                ))
            })?
    }
}

async fn wait_for_cards(client: &Client) -> Result<String, Error> {
    loop {
        let value = client.execute(SHADOW_RESULTS_SCRIPT, Vec::new()).await?;
        if let Some(html) = value.as_str() {
            return Ok(html.to_owned());
        }
        tracing::trace!("provider cards not rendered yet");
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
