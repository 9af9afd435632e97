use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::{
    config::{LogSettings, Settings},
    crawler::Crawler,
    db::{DoctorStore, MemoryStore, PostgresStore},
    doctor::Doctor,
    spiders::{doctors::DoctorSpider, Spider},
};

mod analyze;
mod config;
mod crawler;
mod db;
mod doctor;
mod error;
mod spiders;

pub use error::Error;

#[derive(Debug, Parser)]
#[command(name = "doctor-crawler", version)]
#[command(about = "Collects the Andalusia Health doctor directory into PostgreSQL")]
struct Cli {
    /// Config file name, extension optional (config.toml, config.yaml, ...)
    #[arg(short, long, env = "DOCTOR_CRAWLER_CONFIG", default_value = "config")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Crawl the doctor search results and store every doctor (default)
    Crawl(CrawlArgs),

    /// Log statistics over the stored doctors and export them as JSON
    Analyze {
        /// Report file, overrides `report.output`
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print a stored doctor as JSON
    Show {
        /// Doctor ID
        id: i32,
    },
}

#[derive(Debug, Default, clap::Args)]
struct CrawlArgs {
    /// Keep doctors in memory and print them instead of writing to the database
    #[arg(long)]
    dry_run: bool,

    /// Parse a saved results page instead of fetching the live one
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Number of results pages to follow
    #[arg(long)]
    max_pages: Option<usize>,

    /// Render pages through this WebDriver endpoint, overrides `spider.webdriver_url`
    #[arg(long)]
    webdriver_url: Option<String>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = try_main().await {
        eprintln!("Error: {:?}", err);
        std::process::exit(1);
    }
}

async fn try_main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::new(&cli.config)
        .with_context(|| format!("loading configuration '{}'", cli.config))?;
    init_tracing(&settings.log)?;

    match cli.command.unwrap_or(Command::Crawl(CrawlArgs::default())) {
        Command::Crawl(args) => crawl(settings, args).await,
        Command::Analyze { output } => run_analysis(settings, output).await,
        Command::Show { id } => show(settings, id).await,
    }
}

fn init_tracing(log: &LogSettings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.filter))
        .context("telemetry: Creating EnvFilter")?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    // use that subscriber to process traces emitted after this point
    if log.json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

async fn connect(settings: &Settings) -> anyhow::Result<PostgresStore> {
    let store = PostgresStore::new(&settings.database).context("creating connection pool")?;
    store.migrate().await.context("running database migrations")?;
    Ok(store)
}

async fn crawl(settings: Settings, args: CrawlArgs) -> anyhow::Result<()> {
    let CrawlArgs {
        dry_run,
        snapshot,
        max_pages,
        webdriver_url,
    } = args;
    let mut options = settings.spider.clone();
    if snapshot.is_some() {
        options.snapshot = snapshot;
    }
    if let Some(max_pages) = max_pages {
        options.max_pages = max_pages;
    }
    if webdriver_url.is_some() {
        options.webdriver_url = webdriver_url;
    }

    let store: Arc<dyn DoctorStore> = if dry_run {
        tracing::warn!("dry run: doctors are not written to the database");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(connect(&settings).await?)
    };

    tracing::info!("Starting Andalusia Health doctor search...");
    let spider: Arc<dyn Spider<Item = Doctor>> =
        Arc::new(DoctorSpider::new(options, store.clone()).context("configuring spider")?);
    let crawler = Crawler::new(
        settings.crawler.delay(),
        settings.crawler.crawling_concurrency,
        settings.crawler.processing_concurrency,
    );
    let stats = crawler.run(spider).await;

    println!("Found {} doctors:", stats.items_scraped);
    if dry_run {
        for record in store.all_doctors().await? {
            println!("{}", serde_json::to_string(&record)?);
        }
    }
    if stats.pages_failed > 0 || stats.items_failed > 0 {
        tracing::warn!(
            pages_failed = stats.pages_failed,
            items_failed = stats.items_failed,
            "crawl finished with errors"
        );
    }
    if stats.items_scraped == 0 {
        anyhow::bail!(
            "no doctors found in {} page(s); if the live page renders its results \
             client-side, set spider.webdriver_url or pass --snapshot",
            stats.pages_scraped + stats.pages_failed
        );
    }
    Ok(())
}

async fn run_analysis(settings: Settings, output: Option<PathBuf>) -> anyhow::Result<()> {
    let store = connect(&settings).await?;
    let doctors = store.all_doctors().await.context("loading doctors")?;
    let report = analyze::analyze(&doctors);
    report.log();
    let output = output.unwrap_or(settings.report.output);
    report
        .write_json(&output)
        .with_context(|| format!("writing report to {}", output.display()))?;
    Ok(())
}

async fn show(settings: Settings, id: i32) -> anyhow::Result<()> {
    let store = connect(&settings).await?;
    match store.doctor_by_id(id).await? {
        Some(record) => {
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        None => anyhow::bail!("no doctor with ID {}", id),
    }
}

/// Default `User-Agent` for page requests, `doctor-crawler/<version>`.
pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn crawl_is_the_default_command() {
        let cli = Cli::try_parse_from(["doctor-crawler"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, "config");
    }

    #[test]
    fn crawl_flags() {
        let cli = Cli::try_parse_from([
            "doctor-crawler",
            "--config",
            "prod.toml",
            "crawl",
            "--dry-run",
            "--snapshot",
            "page.html.gz",
            "--max-pages",
            "3",
            "--webdriver-url",
            "http://localhost:9515",
        ])
        .unwrap();
        assert_eq!(cli.config, "prod.toml");
        let Some(Command::Crawl(args)) = cli.command else {
            panic!("expected crawl, got {:?}", cli.command);
        };
        assert!(args.dry_run);
        assert_eq!(args.snapshot, Some(PathBuf::from("page.html.gz")));
        assert_eq!(args.max_pages, Some(3));
        assert_eq!(args.webdriver_url.as_deref(), Some("http://localhost:9515"));
    }

    fn dry_run_on(dir: &std::path::Path, html: &str) -> CrawlArgs {
        let snapshot = dir.join("results.html");
        std::fs::write(&snapshot, html).unwrap();
        CrawlArgs {
            dry_run: true,
            snapshot: Some(snapshot),
            ..CrawlArgs::default()
        }
    }

    #[tokio::test]
    async fn crawl_without_doctors_fails() {
        let dir = tempfile::tempdir().unwrap();
        let args = dry_run_on(
            dir.path(),
            "<html><body><div id=\"loyal-search\"></div></body></html>",
        );
        let err = crawl(Settings::default(), args).await.unwrap_err();
        assert!(err.to_string().contains("no doctors found"), "{err}");
        assert!(err.to_string().contains("webdriver_url"), "{err}");
    }

    #[tokio::test]
    async fn crawl_with_doctors_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let args = dry_run_on(
            dir.path(),
            include_str!("spiders/doctors/testdata/results.html"),
        );
        crawl(Settings::default(), args).await.unwrap();
    }

    #[test]
    fn user_agent_names_the_crate() {
        assert_eq!(
            APP_USER_AGENT,
            format!("doctor-crawler/{}", env!("CARGO_PKG_VERSION"))
        );
    }

    #[test]
    fn show_requires_numeric_id() {
        assert!(Cli::try_parse_from(["doctor-crawler", "show", "abc"]).is_err());
        let cli = Cli::try_parse_from(["doctor-crawler", "show", "42"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Show { id: 42 })));
    }
}
