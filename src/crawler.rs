use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::StreamExt;
use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tokio_stream::wrappers::{ReceiverStream, UnboundedReceiverStream};

use crate::spiders::Spider;

pub struct Crawler {
    delay: Duration,
    crawling_concurrency: usize,
    processing_concurrency: usize,
}

/// Totals of a finished [`Crawler::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub pages_scraped: usize,
    pub pages_failed: usize,
    pub items_scraped: usize,
    pub items_processed: usize,
    pub items_failed: usize,
}

#[derive(Debug, Default)]
struct Counters {
    pages_scraped: AtomicUsize,
    pages_failed: AtomicUsize,
    items_scraped: AtomicUsize,
    items_processed: AtomicUsize,
    items_failed: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> CrawlStats {
        CrawlStats {
            pages_scraped: self.pages_scraped.load(Ordering::SeqCst),
            pages_failed: self.pages_failed.load(Ordering::SeqCst),
            items_scraped: self.items_scraped.load(Ordering::SeqCst),
            items_processed: self.items_processed.load(Ordering::SeqCst),
            items_failed: self.items_failed.load(Ordering::SeqCst),
        }
    }
}

impl Crawler {
    pub fn new(
        delay: Duration,
        crawling_concurrency: usize,
        processing_concurrency: usize,
    ) -> Self {
        Self {
            delay,
            crawling_concurrency: crawling_concurrency.max(1),
            processing_concurrency: processing_concurrency.max(1),
        }
    }

    /// Crawls from the spider's start urls until no url is queued or being
    /// scraped, then waits for every scraped item to be processed.
    pub async fn run<T: Send + 'static>(&self, spider: Arc<dyn Spider<Item = T>>) -> CrawlStats {
        let spider_name = spider.name();
        tracing::info!(spider = %spider_name, "crawler: starting");

        let mut visited_urls = HashSet::<String>::new();
        let counters = Arc::new(Counters::default());
        let processing_queue_capacity = self.processing_concurrency * 10;

        let (urls_to_visit_tx, urls_to_visit_rx) = mpsc::unbounded_channel::<String>();
        let (items_tx, items_rx) = mpsc::channel(processing_queue_capacity);
        let (new_urls_tx, mut new_urls_rx) = mpsc::unbounded_channel::<(String, Vec<String>)>();

        // urls queued or being scraped
        let mut in_flight = 0usize;
        for url in spider.start_urls() {
            if visited_urls.insert(url.clone()) {
                in_flight += 1;
                let _ = urls_to_visit_tx.send(url);
            }
        }

        let processors = self.launch_processors(spider.clone(), items_rx, counters.clone());
        let scrapers = self.launch_scrapers(
            spider.clone(),
            urls_to_visit_rx,
            new_urls_tx,
            items_tx,
            counters.clone(),
        );

        while in_flight > 0 {
            let Some((visited_url, new_urls)) = new_urls_rx.recv().await else {
                break;
            };
            in_flight -= 1;
            tracing::trace!("visited: {}", visited_url);
            for url in new_urls {
                if visited_urls.insert(url.clone()) {
                    tracing::debug!("queueing: {}", url);
                    in_flight += 1;
                    let _ = urls_to_visit_tx.send(url);
                }
            }
        }
        tracing::debug!("crawler: control loop exited");

        drop(urls_to_visit_tx);
        if let Err(err) = scrapers.await {
            tracing::error!("crawler: scrapers task failed: {}", err);
        }
        if let Err(err) = processors.await {
            tracing::error!("crawler: processors task failed: {}", err);
        }

        let stats = counters.snapshot();
        tracing::info!(spider = %spider_name, ?stats, "crawler: finished");
        stats
    }

    fn launch_processors<T: Send + 'static>(
        &self,
        spider: Arc<dyn Spider<Item = T>>,
        items: mpsc::Receiver<T>,
        counters: Arc<Counters>,
    ) -> JoinHandle<()> {
        let concurrency = self.processing_concurrency;
        tokio::spawn(async move {
            ReceiverStream::new(items)
                .for_each_concurrent(concurrency, |item| {
                    let spider = spider.clone();
                    let counters = counters.clone();
                    async move {
                        match spider.process(item).await {
                            Ok(()) => {
                                counters.items_processed.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(err) => {
                                tracing::error!("processing item failed: {}", err);
                                counters.items_failed.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                    }
                })
                .await;
        })
    }

    fn launch_scrapers<T: Send + 'static>(
        &self,
        spider: Arc<dyn Spider<Item = T>>,
        urls_to_visit: mpsc::UnboundedReceiver<String>,
        new_urls_tx: mpsc::UnboundedSender<(String, Vec<String>)>,
        items_tx: mpsc::Sender<T>,
        counters: Arc<Counters>,
    ) -> JoinHandle<()> {
        let concurrency = self.crawling_concurrency;
        let delay = self.delay;
        tokio::spawn(async move {
            UnboundedReceiverStream::new(urls_to_visit)
                .for_each_concurrent(concurrency, |url| {
                    let spider = spider.clone();
                    let new_urls_tx = new_urls_tx.clone();
                    let items_tx = items_tx.clone();
                    let counters = counters.clone();
                    async move {
                        let new_urls = match spider.scrape(url.clone()).await {
                            Ok((items, new_urls)) => {
                                counters.pages_scraped.fetch_add(1, Ordering::SeqCst);
                                counters.items_scraped.fetch_add(items.len(), Ordering::SeqCst);
                                for item in items {
                                    let _ = items_tx.send(item).await;
                                }
                                new_urls
                            }
                            Err(err) => {
                                tracing::error!("scraping '{}' failed: {}", url, err);
                                counters.pages_failed.fetch_add(1, Ordering::SeqCst);
                                Vec::new()
                            }
                        };
                        let _ = new_urls_tx.send((url, new_urls));
                        sleep(delay).await;
                    }
                })
                .await;
            drop(items_tx);
        })
    }
}
