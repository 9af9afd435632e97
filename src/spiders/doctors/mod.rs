use std::{
    fmt::Debug,
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use reqwest::{Client, Url};
use ulid::Ulid;

use crate::{db::DoctorStore, doctor::Doctor, Error};

mod browser;
mod cards;

use browser::Browser;
pub use cards::{CardParser, Listing};

pub const BASE_URL: &str = "https://www.andalusiahealth.com";

/// Scrapes the "find a doctor" results and stores every doctor found.
pub struct DoctorSpider {
    http_client: Client,
    store: Arc<dyn DoctorStore>,
    parser: CardParser,
    browser: Option<Browser>,
    start_url: String,
    archive_path: Option<PathBuf>,
    max_pages: usize,
    pages_seen: AtomicUsize,
}

impl DoctorSpider {
    pub fn new(options: DoctorSpiderOptions, store: Arc<dyn DoctorStore>) -> Result<Self, Error> {
        let start_url = options.start_url()?;
        let DoctorSpiderOptions {
            base_url,
            user_agent: user_agent_opt,
            archive_path,
            max_pages,
            webdriver_url,
            headless,
            render_timeout_secs,
            ..
        } = options;
        let user_agent = user_agent_opt.as_deref().unwrap_or(crate::APP_USER_AGENT);
        if let Some(path) = &archive_path {
            fs::create_dir_all(path)?;
        }
        tracing::info!(user_agent, start_url = %start_url, "configuring DoctorSpider");
        let http_client = Client::builder()
            .user_agent(user_agent)
            .brotli(true)
            .build()?;
        let browser = webdriver_url.map(|webdriver_url| {
            tracing::info!(webdriver_url = %webdriver_url, "rendering pages through webdriver");
            Browser::new(
                &webdriver_url,
                user_agent,
                Duration::from_secs(render_timeout_secs),
                headless,
            )
        });
        Ok(Self {
            http_client,
            store,
            parser: CardParser::new(&base_url)?,
            browser,
            start_url,
            archive_path,
            max_pages: max_pages.max(1),
            pages_seen: AtomicUsize::new(0),
        })
    }

    async fn fetch(&self, url: &str) -> Result<String, Error> {
        tracing::debug!("calling {}", url);
        let response = self.http_client.get(url).send().await.map_err(|err| {
            tracing::error!("Failed fetching: {:?}", err);
            err
        })?;

        tracing::trace!("response status: {}", response.status());

        if !response.status().is_success() {
            let status_code = response.status();
            tracing::error!(
                "The request returned '{}': '{}'",
                status_code,
                response.text().await?
            );
            return Err(Error::RequestReturnedError(status_code));
        }

        Ok(response.text().await?)
    }

    async fn read_snapshot(&self, url: &Url) -> Result<String, Error> {
        let path = url
            .to_file_path()
            .map_err(|()| Error::Internal(format!("not a local file: '{url}'")))?;
        tracing::debug!("reading snapshot {}", path.display());
        let bytes = tokio::fs::read(&path).await?;
        decode_page(&path, bytes)
    }
}

impl Debug for DoctorSpider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DoctorSpider {{ /* omitted */ }}")
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct DoctorSpiderOptions {
    pub base_url: String,
    /// Defaults to the Andalusia, AL results under `base_url`.
    pub search_url: Option<String>,
    pub user_agent: Option<String>,
    /// Saved results page (plain or `.gz`) to parse instead of the live site.
    pub snapshot: Option<PathBuf>,
    /// Directory receiving a gzipped copy of every page scraped.
    pub archive_path: Option<PathBuf>,
    pub max_pages: usize,
    /// WebDriver endpoint (e.g. chromedriver on `http://localhost:9515`). When set,
    /// pages are rendered in a browser and the `#loyal-search` shadow root is parsed.
    pub webdriver_url: Option<String>,
    pub headless: bool,
    /// How long to wait for provider cards to render.
    pub render_timeout_secs: u64,
}

impl DoctorSpiderOptions {
    fn start_url(&self) -> Result<String, Error> {
        if let Some(snapshot) = &self.snapshot {
            let path = snapshot.canonicalize().map_err(|err| {
                tracing::error!("can't open snapshot '{}'", snapshot.display());
                err
            })?;
            let url = Url::from_file_path(&path).map_err(|()| {
                Error::Internal(format!("can't use '{}' as snapshot", path.display()))
            })?;
            return Ok(url.into());
        }
        Ok(self.search_url.clone().unwrap_or_else(|| {
            format!(
                "{}/find-a-doctor/results?address=andalusia%2C+al&defaultSort=true",
                self.base_url.trim_end_matches('/')
            )
        }))
    }
}

impl Default for DoctorSpiderOptions {
    fn default() -> Self {
        Self {
            base_url: BASE_URL.to_owned(),
            search_url: None,
            user_agent: None,
            snapshot: None,
            archive_path: None,
            max_pages: 1,
            webdriver_url: None,
            headless: true,
            render_timeout_secs: 20,
        }
    }
}

#[async_trait]
impl super::Spider for DoctorSpider {
    type Item = Doctor;

    fn name(&self) -> String {
        String::from("doctors")
    }

    fn start_urls(&self) -> Vec<String> {
        vec![self.start_url.clone()]
    }

    #[tracing::instrument]
    async fn scrape(&self, url: String) -> Result<(Vec<Self::Item>, Vec<String>), Error> {
        let page_url =
            Url::parse(&url).map_err(|err| Error::Internal(format!("invalid url '{url}': {err}")))?;
        let html = match &self.browser {
            _ if page_url.scheme() == "file" => self.read_snapshot(&page_url).await?,
            Some(browser) => browser.render(&url).await?,
            None => self.fetch(&url).await?,
        };

        if let Some(dir) = &self.archive_path {
            match archive(dir, &html) {
                Ok(path) => tracing::debug!("archived page as {}", path.display()),
                Err(err) => tracing::error!("failed archiving page: {}", err),
            }
        }

        let Listing { doctors, next_page } = self.parser.parse(&html, &page_url);
        if doctors.is_empty() {
            tracing::warn!("No doctors found in the search results");
            if self.browser.is_none() && page_url.scheme() != "file" {
                tracing::warn!("the results are rendered client-side, set spider.webdriver_url to render them");
            }
        } else {
            tracing::info!("found {} doctors", doctors.len());
        }

        let pages = self.pages_seen.fetch_add(1, Ordering::SeqCst) + 1;
        let new_urls = match next_page {
            Some(next) if pages < self.max_pages => vec![next],
            _ => Vec::new(),
        };
        Ok((doctors, new_urls))
    }

    #[tracing::instrument(skip(self, item), fields(name = %item.name))]
    async fn process(&self, item: Self::Item) -> Result<(), Error> {
        let id = self.store.save_doctor(&item).await?;
        tracing::info!("Saved doctor: {} (ID: {})", item.name, id);
        Ok(())
    }
}

fn decode_page(path: &Path, bytes: Vec<u8>) -> Result<String, Error> {
    if path.extension().map_or(false, |ext| ext == "gz") {
        let mut html = String::new();
        GzDecoder::new(bytes.as_slice()).read_to_string(&mut html)?;
        return Ok(html);
    }
    String::from_utf8(bytes)
        .map_err(|err| Error::UnexpectedHtml(format!("'{}' is not utf-8: {}", path.display(), err)))
}

fn archive(dir: &Path, html: &str) -> Result<PathBuf, Error> {
    let mut path = dir.join(Ulid::new().to_string());
    path.set_extension("html.gz");
    let file = fs::File::create(&path).map_err(|err| {
        tracing::error!("failed creating file {}", path.display());
        err
    })?;
    let mut writer = GzEncoder::new(std::io::BufWriter::new(file), Compression::default());
    writer.write_all(html.as_bytes())?;
    writer.finish()?.flush()?;
    Ok(path)
}
