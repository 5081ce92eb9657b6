//! Integration tests for the crawler
//!
//! The first test runs a whole session against a wiremock server with the
//! real HTTP fetcher and a SQLite database. The rest drive the controller
//! with in-process fetchers so they can shape timing and failures.

use async_trait::async_trait;
use kumo_crawl::config::{CrawlerConfig, UserAgentConfig};
use kumo_crawl::crawler::{
    CrawlController, FetchError, FetchedPage, Fetcher, MemorySessionStore, PageStatus,
    SqliteSinkProvider,
};
use kumo_crawl::state::SessionState;
use kumo_crawl::storage::{MemorySink, SqliteSink};
use kumo_crawl::CrawlResult;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/html")
}

/// Zero delays and fast retries so the tests finish quickly
fn fast_config(base_url: &str, max_depth: u32, max_pages: u32) -> CrawlerConfig {
    let mut config = CrawlerConfig::new(base_url, max_depth, max_pages);
    config.delay_min_ms = 0;
    config.delay_max_ms = 0;
    config.retry_backoff_ms = 1;
    config.grace_period_ms = 50;
    config.respect_robots = false;
    config
}

fn memory_controller(sink: &MemorySink, fetcher: Arc<dyn Fetcher>) -> CrawlController {
    CrawlController::new(
        Arc::new(MemorySessionStore::new()),
        Arc::new(sink.clone()),
        &UserAgentConfig::default(),
    )
    .unwrap()
    .with_fetcher(fetcher)
}

fn paths(results: &[CrawlResult]) -> BTreeSet<String> {
    results
        .iter()
        .map(|r| Url::parse(&r.url).unwrap().path().to_string())
        .collect()
}

/// Serves a fixed set of HTML pages; anything else is a 404
struct StaticSite {
    pages: HashMap<&'static str, &'static str>,
}

impl StaticSite {
    fn new(pages: &[(&'static str, &'static str)]) -> Arc<Self> {
        Arc::new(Self {
            pages: pages.iter().copied().collect(),
        })
    }
}

#[async_trait]
impl Fetcher for StaticSite {
    async fn fetch(&self, url: &Url, _timeout: Duration) -> Result<FetchedPage, FetchError> {
        Ok(match self.pages.get(url.path()) {
            Some(body) => FetchedPage::new(url.clone(), 200, "text/html", *body),
            None => FetchedPage::new(url.clone(), 404, "text/html", ""),
        })
    }
}

fn five_page_site() -> Arc<StaticSite> {
    StaticSite::new(&[
        ("/", r#"<a href="/a">a</a> <a href="/b">b</a>"#),
        ("/a", r#"<p>alpha</p><a href="/c">c</a>"#),
        ("/b", r#"<p>bravo</p><a href="/d">d</a>"#),
        ("/c", r#"<p>charlie</p><a href="/">home</a> <a href="/e">e</a>"#),
        ("/d", r#"<p>delta</p><a href="/a">a</a>"#),
        // Depth 3 from the base URL
        ("/e", "<p>echo</p>"),
    ])
}

#[tokio::test]
async fn test_full_crawl_against_http_server() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(&format!(
            r#"<html><head><title>Home</title></head><body>
               <p>Welcome home</p>
               <a href="{base}/about">About</a>
               <a href="{base}/private/secret">Secret</a>
               <a href="https://elsewhere.test/">Offsite</a>
               </body></html>"#
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(html(
            "<html><head><title>About</title></head><body><p>About us</p></body></html>",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private/secret"))
        .respond_with(html("<p>should never be fetched</p>"))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("data").join("crawl.db");

    let mut config = fast_config(&base, 2, 50);
    config.respect_robots = true;

    let controller = CrawlController::new(
        Arc::new(MemorySessionStore::new()),
        Arc::new(SqliteSinkProvider::new(&db_path)),
        &UserAgentConfig::default(),
    )
    .unwrap();
    let id = controller.start(config).unwrap();
    let session = controller.wait(&id).await.unwrap();

    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.pages_crawled, 2);
    assert_eq!(session.pages_blocked, 1);
    assert!(session.error.is_none());

    let storage = SqliteSink::new(&db_path).unwrap();
    let stored = storage.load_session(&id).unwrap().unwrap();
    assert_eq!(stored.state, SessionState::Completed);
    assert_eq!(stored.pages_crawled, 2);

    let pages = storage.load_pages(&id).unwrap();
    assert_eq!(pages.len(), 3);
    let by_path: HashMap<String, CrawlResult> = pages
        .into_iter()
        .map(|r| (Url::parse(&r.url).unwrap().path().to_string(), r))
        .collect();

    let home = &by_path["/"];
    assert_eq!(home.status, PageStatus::Ok(200));
    assert_eq!(home.depth, 0);
    assert_eq!(home.title.as_deref(), Some("Home"));
    assert!(home.extracted_text.contains("Welcome home"));
    assert!(home.outbound_links.iter().any(|l| l.ends_with("/about")));

    let about = &by_path["/about"];
    assert_eq!(about.depth, 1);
    assert!(about.discovered_from.is_some());

    assert_eq!(by_path["/private/secret"].status, PageStatus::Blocked);

    let stats = storage.load_statistics(Some(&id)).unwrap();
    assert_eq!(stats.total_pages, 3);
    assert_eq!(stats.blocked_pages, 1);
}

#[tokio::test]
async fn test_same_pages_regardless_of_worker_count() {
    let expected: BTreeSet<String> = ["/", "/a", "/b", "/c", "/d"]
        .iter()
        .map(|p| p.to_string())
        .collect();

    for workers in [1, 2, 8] {
        let sink = MemorySink::new();
        let controller = memory_controller(&sink, five_page_site());

        let mut config = fast_config("https://five.test/", 2, 10);
        config.worker_count = workers;
        let id = controller.start(config).unwrap();
        let session = controller.wait(&id).await.unwrap();

        assert_eq!(session.state, SessionState::Completed, "workers={}", workers);
        assert_eq!(session.pages_crawled, 5, "workers={}", workers);
        let results = sink.results_for(&id);
        assert_eq!(results.len(), 5, "each URL is crawled once (workers={})", workers);
        assert_eq!(paths(&results), expected, "workers={}", workers);
        assert!(results.iter().all(|r| r.depth <= 2), "workers={}", workers);
    }
}

#[tokio::test]
async fn test_duplicate_content_still_expands_links() {
    let site = StaticSite::new(&[
        ("/", r#"<a href="/a">a</a> <a href="/b">b</a>"#),
        ("/a", r#"<p>Shared body text</p><a href="/c">next</a>"#),
        ("/b", r#"<p>Shared body text</p><a href="/d">next</a>"#),
        ("/c", "<p>charlie</p>"),
        ("/d", "<p>delta</p>"),
    ]);
    let sink = MemorySink::new();
    let controller = memory_controller(&sink, site);

    let id = controller.start(fast_config("https://dup.test/", 3, 100)).unwrap();
    let session = controller.wait(&id).await.unwrap();

    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.duplicate_pages, 1);

    let results = sink.results_for(&id);
    let duplicates: Vec<_> = results.iter().filter(|r| r.is_duplicate).collect();
    assert_eq!(duplicates.len(), 1);
    let originals: Vec<_> = results
        .iter()
        .filter(|r| !r.is_duplicate && r.content_hash == duplicates[0].content_hash)
        .collect();
    assert_eq!(originals.len(), 1);

    // Both /c and /d are reached even though one parent was a duplicate
    assert!(paths(&results).contains("/c"));
    assert!(paths(&results).contains("/d"));
}

/// Times out a fixed number of times before answering
struct Flaky {
    timeouts: u32,
    calls: AtomicU32,
}

#[async_trait]
impl Fetcher for Flaky {
    async fn fetch(&self, url: &Url, _timeout: Duration) -> Result<FetchedPage, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.timeouts {
            return Err(FetchError::Timeout);
        }
        Ok(FetchedPage::new(url.clone(), 200, "text/html", "<p>finally</p>"))
    }
}

#[tokio::test]
async fn test_timeouts_are_retried_until_success() {
    let flaky = Arc::new(Flaky {
        timeouts: 2,
        calls: AtomicU32::new(0),
    });
    let sink = MemorySink::new();
    let controller = memory_controller(&sink, flaky.clone());

    let mut config = fast_config("https://flaky.test/", 0, 10);
    config.retry_count = 2;
    let id = controller.start(config).unwrap();
    let session = controller.wait(&id).await.unwrap();

    assert_eq!(session.pages_crawled, 1);
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    let results = sink.results_for(&id);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, PageStatus::Ok(200));
    assert_eq!(results[0].attempts, 3);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let flaky = Arc::new(Flaky {
        timeouts: u32::MAX,
        calls: AtomicU32::new(0),
    });
    let sink = MemorySink::new();
    let controller = memory_controller(&sink, flaky.clone());

    let mut config = fast_config("https://flaky.test/", 0, 10);
    config.retry_count = 2;
    let id = controller.start(config).unwrap();
    let session = controller.wait(&id).await.unwrap();

    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.pages_crawled, 0);
    assert_eq!(session.pages_failed, 1);
    let results = sink.results_for(&id);
    assert_eq!(results[0].status, PageStatus::Timeout);
    assert_eq!(results[0].attempts, 3);
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
}

/// Every page links to ten fresh pages
struct Fanout;

#[async_trait]
impl Fetcher for Fanout {
    async fn fetch(&self, url: &Url, _timeout: Duration) -> Result<FetchedPage, FetchError> {
        let links: String = (0..10)
            .map(|i| format!(r#"<a href="{}/{}">{}</a>"#, url.path().trim_end_matches('/'), i, i))
            .collect();
        Ok(FetchedPage::new(url.clone(), 200, "text/html", format!("<p>{}</p>{}", url, links)))
    }
}

#[tokio::test]
async fn test_page_budget_is_never_exceeded() {
    let sink = MemorySink::new();
    let controller = memory_controller(&sink, Arc::new(Fanout));

    let mut config = fast_config("https://fan.test/", 5, 7);
    config.worker_count = 4;
    let id = controller.start(config).unwrap();
    let session = controller.wait(&id).await.unwrap();

    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.pages_crawled, 7);
    assert_eq!(sink.results_for(&id).len(), 7);
}

/// Never answers within the test's lifetime
struct Stalled;

#[async_trait]
impl Fetcher for Stalled {
    async fn fetch(&self, url: &Url, _timeout: Duration) -> Result<FetchedPage, FetchError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(FetchedPage::new(url.clone(), 200, "text/html", ""))
    }
}

/// robots.txt never answers; pages answer at once
struct StalledRobots;

#[async_trait]
impl Fetcher for StalledRobots {
    async fn fetch(&self, url: &Url, _timeout: Duration) -> Result<FetchedPage, FetchError> {
        if url.path() == "/robots.txt" {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        let body = if url.path() == "/" { r#"<a href="/next">next</a>"# } else { "<p>next</p>" };
        Ok(FetchedPage::new(url.clone(), 200, "text/html", body))
    }
}

#[tokio::test]
async fn test_unanswered_robots_does_not_hang_session() {
    let sink = MemorySink::new();
    let controller = memory_controller(&sink, Arc::new(StalledRobots));

    let mut config = fast_config("https://slow-robots.test/", 1, 10);
    config.respect_robots = true;
    config.request_timeout_ms = 100;
    let id = controller.start(config).unwrap();

    let session = tokio::time::timeout(Duration::from_secs(3), controller.wait(&id))
        .await
        .expect("robots.txt fetch should be bounded by the request timeout")
        .unwrap();
    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.pages_crawled, 2);
}

#[tokio::test]
async fn test_cancelled_session_is_aborted() {
    let sink = MemorySink::new();
    let controller = memory_controller(&sink, Arc::new(Stalled));

    let mut config = fast_config("https://stalled.test/", 2, 10);
    config.request_timeout_ms = 60_000;
    let id = controller.start(config).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(controller.status(&id).unwrap().state, SessionState::Running);
    assert!(controller.cancel(&id));

    let session = tokio::time::timeout(Duration::from_secs(5), controller.wait(&id))
        .await
        .expect("cancellation should finish within the grace period")
        .unwrap();
    assert_eq!(session.state, SessionState::Aborted);
    assert!(session.error.is_none());
    assert!(session.finished_at.is_some());
    assert!(!controller.cancel(&id));

    let recorded = sink.session(&id).unwrap();
    assert_eq!(recorded.state, SessionState::Aborted);
}

#[tokio::test]
async fn test_cancel_during_backoff_records_failure() {
    let flaky = Arc::new(Flaky {
        timeouts: u32::MAX,
        calls: AtomicU32::new(0),
    });
    let sink = MemorySink::new();
    let controller = memory_controller(&sink, flaky.clone());

    let mut config = fast_config("https://flaky.test/", 0, 10);
    config.retry_count = 3;
    config.retry_backoff_ms = 2_000;
    let id = controller.start(config).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(controller.cancel(&id));
    let session = controller.wait(&id).await.unwrap();

    assert_eq!(session.state, SessionState::Aborted);
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.pages_failed, 1);
    let results = sink.results_for(&id);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, PageStatus::Timeout);
    assert_eq!(results[0].attempts, 1);
}

#[tokio::test]
async fn test_storage_failure_aborts_session() {
    let sink = MemorySink::failing_after(1);
    let controller = memory_controller(&sink, five_page_site());

    let id = controller.start(fast_config("https://five.test/", 3, 100)).unwrap();
    let session = controller.wait(&id).await.unwrap();

    assert_eq!(session.state, SessionState::Aborted);
    assert!(session.error.is_some());
    assert_eq!(sink.results_for(&id).len(), 1);
}

/// Records when each request started; robots.txt is missing
struct Recording {
    starts: Mutex<Vec<Instant>>,
}

#[async_trait]
impl Fetcher for Recording {
    async fn fetch(&self, url: &Url, _timeout: Duration) -> Result<FetchedPage, FetchError> {
        self.starts.lock().push(Instant::now());
        let (status, body) = match url.path() {
            "/robots.txt" => (404, String::new()),
            "/" => (
                200,
                (1..=4)
                    .map(|i| format!(r#"<a href="/p{}">p{}</a>"#, i, i))
                    .collect::<String>(),
            ),
            other => (200, format!("<p>{}</p>", other)),
        };
        Ok(FetchedPage::new(url.clone(), status, "text/html", body))
    }
}

async fn request_gaps(respect_robots: bool) -> Vec<Duration> {
    let recording = Arc::new(Recording {
        starts: Mutex::new(Vec::new()),
    });
    let sink = MemorySink::new();
    let controller = memory_controller(&sink, recording.clone());

    let mut config = fast_config("https://polite.test/", 1, 10);
    config.delay_min_ms = 50;
    config.delay_max_ms = 50;
    config.worker_count = 4;
    config.respect_robots = respect_robots;
    let id = controller.start(config).unwrap();
    let session = controller.wait(&id).await.unwrap();
    assert_eq!(session.pages_crawled, 5);

    let mut starts = recording.starts.lock().clone();
    starts.sort();
    starts
        .windows(2)
        .map(|pair| pair[1].duration_since(pair[0]))
        .collect()
}

#[tokio::test]
async fn test_requests_to_one_domain_are_spaced() {
    let gaps = request_gaps(false).await;
    assert_eq!(gaps.len(), 4);
    for gap in gaps {
        assert!(gap >= Duration::from_millis(40), "gap too small: {:?}", gap);
    }
}

#[tokio::test]
async fn test_robots_request_is_spaced_like_pages() {
    // robots.txt plus five pages
    let gaps = request_gaps(true).await;
    assert_eq!(gaps.len(), 5);
    for gap in gaps {
        assert!(gap >= Duration::from_millis(40), "gap too small: {:?}", gap);
    }
}
