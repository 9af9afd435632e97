//! Settings loaded from an optional config file and `CRAWLER_*` environment variables.

use std::{path::PathBuf, time::Duration};

use config::{ConfigError, Environment, File};
use serde::Deserialize;

use crate::{db::DEFAULT_DB_URI, spiders::doctors::DoctorSpiderOptions};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub crawler: CrawlerSettings,
    pub spider: DoctorSpiderOptions,
    pub report: ReportSettings,
    pub log: LogSettings,
}

impl Settings {
    /// Loads settings from `path` (if it exists) overlaid with the environment,
    /// e.g. `CRAWLER_DATABASE__URL`.
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        Self::load(path, environment())
    }

    fn load(path: &str, environment: Environment) -> Result<Self, ConfigError> {
        config::Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(environment)
            .build()?
            .try_deserialize()
    }
}

fn environment() -> Environment {
    Environment::with_prefix("CRAWLER")
        .prefix_separator("_")
        .separator("__")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: usize,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_DB_URI.to_owned(),
            max_connections: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerSettings {
    /// Pause after every scraped page, in milliseconds.
    pub delay_ms: u64,
    pub crawling_concurrency: usize,
    pub processing_concurrency: usize,
}

impl CrawlerSettings {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self {
            delay_ms: 500,
            crawling_concurrency: 2,
            processing_concurrency: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub output: PathBuf,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            output: "doctor_analysis_report.json".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directives, used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "doctor_crawler=info,warn".to_owned(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, io::Write};

    use super::*;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        environment().source(Some(vars))
    }

    #[test]
    fn missing_file_gives_defaults() {
        let settings = Settings::load("/nonexistent/doctor-crawler", env(&[])).unwrap();
        assert_eq!(settings.database.url, DEFAULT_DB_URI);
        assert_eq!(settings.crawler.delay(), Duration::from_millis(500));
        assert_eq!(settings.crawler.crawling_concurrency, 2);
        assert_eq!(settings.spider.max_pages, 1);
        assert_eq!(
            settings.report.output,
            PathBuf::from("doctor_analysis_report.json")
        );
    }

    #[test]
    fn file_overrides_selected_fields() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[database]
url = "postgresql://crawler@db:5432/doctors"

[crawler]
delay_ms = 50

[spider]
max_pages = 3
user_agent = "test-agent"

[log]
json = true
"#
        )
        .unwrap();

        let settings = Settings::load(file.path().to_str().unwrap(), env(&[])).unwrap();
        assert_eq!(settings.database.url, "postgresql://crawler@db:5432/doctors");
        assert_eq!(settings.database.max_connections, 8);
        assert_eq!(settings.crawler.delay_ms, 50);
        assert_eq!(settings.crawler.processing_concurrency, 50);
        assert_eq!(settings.spider.max_pages, 3);
        assert_eq!(settings.spider.user_agent.as_deref(), Some("test-agent"));
        assert!(settings.log.json);
    }

    #[test]
    fn environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[spider]\nmax_pages = 3\nwebdriver_url = \"http://localhost:9515\"").unwrap();

        let settings = Settings::load(
            file.path().to_str().unwrap(),
            env(&[
                ("CRAWLER_DATABASE__URL", "postgresql://x@y/z"),
                ("CRAWLER_SPIDER__MAX_PAGES", "4"),
                ("CRAWLER_LOG__JSON", "true"),
                ("OTHER_SPIDER__MAX_PAGES", "9"),
            ]),
        )
        .unwrap();
        assert_eq!(settings.database.url, "postgresql://x@y/z");
        assert_eq!(settings.spider.max_pages, 4);
        assert_eq!(
            settings.spider.webdriver_url.as_deref(),
            Some("http://localhost:9515")
        );
        assert!(settings.log.json);
    }

    #[test]
    fn process_environment_is_read() {
        std::env::set_var("CRAWLER_REPORT__OUTPUT", "/tmp/report-from-env.json");
        let settings = Settings::new("/nonexistent/doctor-crawler");
        std::env::remove_var("CRAWLER_REPORT__OUTPUT");

        assert_eq!(
            settings.unwrap().report.output,
            PathBuf::from("/tmp/report-from-env.json")
        );
    }
}
