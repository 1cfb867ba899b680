//! EWA Crawler - Web page fetching and readable text extraction
//!
//! Fetches a page over HTTP and keeps the text of its headings and
//! paragraphs. Tags are collected in the configured order, every instance
//! of one tag before moving on to the next, so output order is stable for
//! a given page. Chunks that are too short or contain no letters are
//! dropped, and whitespace runs are collapsed.

use async_trait::async_trait;
use ewa_core::{EwaError, FetchConfig, TextSource};
use regex::Regex;
use reqwest::{Client, Url};
use scraper::{Html, Selector};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while fetching or extracting a page
#[derive(Error, Debug)]
pub enum CrawlerError {
    /// URL could not be parsed or uses an unsupported scheme
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// Transport-level failure
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Server answered with a non-success status
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// A configured tag is not a valid CSS selector
    #[error("Invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },

    /// Internal whitespace pattern failed to compile
    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),

    /// HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    Client(String),
}

impl From<CrawlerError> for EwaError {
    fn from(err: CrawlerError) -> Self {
        match &err {
            CrawlerError::InvalidUrl { url, .. }
            | CrawlerError::Request { url, .. }
            | CrawlerError::Status { url, .. } => EwaError::fetch(url.clone(), err.to_string()),
            CrawlerError::InvalidSelector { .. }
            | CrawlerError::Pattern(_)
            | CrawlerError::Client(_) => EwaError::Configuration(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CrawlerError>;

// ============================================================================
// Text Extraction
// ============================================================================

/// Pulls readable text out of an HTML document
pub struct TextExtractor {
    /// Tag selectors in collection order
    selectors: Vec<Selector>,
    min_chunk_chars: usize,
    newline_runs: Regex,
    tab_runs: Regex,
    space_runs: Regex,
}

impl TextExtractor {
    /// Create an extractor for the given tags
    pub fn new<S: AsRef<str>>(tags: &[S], min_chunk_chars: usize) -> Result<Self> {
        let selectors = tags
            .iter()
            .map(|tag| {
                let tag = tag.as_ref();
                Selector::parse(tag).map_err(|e| CrawlerError::InvalidSelector {
                    selector: tag.to_string(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            selectors,
            min_chunk_chars,
            newline_runs: Regex::new(r"[\r\n]+")?,
            tab_runs: Regex::new(r"\t+")?,
            space_runs: Regex::new(r" +")?,
        })
    }

    /// Create from config
    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        Self::new(&config.tags, config.min_chunk_chars)
    }

    /// Whether a chunk of element text is worth keeping
    ///
    /// Any Unicode letter counts, so pages in non-Latin scripts still
    /// reach language detection and fall back to `other`.
    pub fn should_keep(&self, chunk: &str) -> bool {
        if chunk.chars().count() < self.min_chunk_chars {
            return false;
        }
        chunk.chars().any(char::is_alphabetic)
    }

    /// Extract and normalize the text of an HTML document
    pub fn extract(&self, html: &str) -> String {
        let document = Html::parse_document(html);
        let mut text = String::new();

        for selector in &self.selectors {
            for element in document.select(selector) {
                let chunk: String = element.text().collect();
                if !self.should_keep(&chunk) {
                    continue;
                }
                text.push('\n');
                text.push_str(chunk.trim());
            }
        }

        self.normalize(&text)
    }

    /// Collapse newline, tab and space runs, then trim
    pub fn normalize(&self, text: &str) -> String {
        let text = self.newline_runs.replace_all(text, "\n");
        let text = self.tab_runs.replace_all(&text, " ");
        let text = self.space_runs.replace_all(&text, " ");
        text.trim().to_string()
    }
}

// ============================================================================
// HTTP Text Source
// ============================================================================

/// Text source that downloads pages over HTTP(S)
pub struct HttpTextSource {
    client: Client,
    extractor: TextExtractor,
}

impl HttpTextSource {
    /// Create a new HTTP text source
    pub fn new(client: Client, extractor: TextExtractor) -> Self {
        Self { client, extractor }
    }

    /// Create from config
    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CrawlerError::Client(e.to_string()))?;

        Ok(Self::new(client, TextExtractor::from_config(config)?))
    }

    /// Download a page and return its raw HTML
    pub async fn fetch_html(&self, url: &str) -> Result<String> {
        let parsed = parse_http_url(url)?;

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| CrawlerError::Request {
                url: url.to_string(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrawlerError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| CrawlerError::Request {
            url: url.to_string(),
            source: e,
        })
    }

    pub fn extractor(&self) -> &TextExtractor {
        &self.extractor
    }
}

#[async_trait]
impl TextSource for HttpTextSource {
    async fn fetch(&self, url: &str) -> ewa_core::Result<String> {
        let html = self.fetch_html(url).await?;
        let text = self.extractor.extract(&html);
        tracing::debug!(url, html_len = html.len(), text_len = text.len(), "Page text extracted");
        Ok(text)
    }
}

/// Only absolute http(s) URLs are fetched
fn parse_http_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url.trim()).map_err(|e| CrawlerError::InvalidUrl {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(CrawlerError::InvalidUrl {
            url: url.to_string(),
            message: format!("unsupported scheme '{scheme}'"),
        }),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn extractor() -> TextExtractor {
        TextExtractor::from_config(&FetchConfig::default()).unwrap()
    }

    #[test]
    fn test_short_letter_chunk_excluded() {
        let chunk = "abcdefghijklmnopqrs";
        assert_eq!(chunk.chars().count(), 19);
        assert!(!extractor().should_keep(chunk));
    }

    #[test]
    fn test_chunk_without_letters_excluded() {
        let chunk = "12345 67890, 12345-67890!";
        assert_eq!(chunk.len(), 25);
        assert!(!extractor().should_keep(chunk));
    }

    #[test]
    fn test_chunk_with_a_letter_included() {
        let chunk = "12345 67890, 12345-6789x!";
        assert_eq!(chunk.len(), 25);
        assert!(extractor().should_keep(chunk));
    }

    #[test]
    fn test_non_ascii_letters_count() {
        // 20 characters, more bytes
        let chunk = "İstanbul'da güneşli ";
        assert_eq!(chunk.chars().count(), 20);
        assert!(extractor().should_keep(chunk));
    }

    #[test]
    fn test_non_latin_script_kept() {
        assert!(extractor().should_keep("Москва это столица России"));
        assert!(!extractor().should_keep("٣٤٥٦٧٨ ٩٠١٢٣٤ ٥٦٧٨٩٠ ---"));
    }

    #[test]
    fn test_tags_collected_in_configured_order() {
        let html = r#"
            <html><body>
              <p>First paragraph comes before the heading in markup.</p>
              <h2>A secondary heading that is long enough</h2>
              <h1>The main heading of this test document</h1>
              <p>Second paragraph of the document body text.</p>
            </body></html>
        "#;

        let text = extractor().extract(html);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines,
            vec![
                "The main heading of this test document",
                "A secondary heading that is long enough",
                "First paragraph comes before the heading in markup.",
                "Second paragraph of the document body text.",
            ]
        );
    }

    #[test]
    fn test_filtered_chunks_and_untracked_tags_dropped() {
        let html = r#"
            <h1>Short</h1>
            <h3>2024-01-01 12:00:00 +0000</h3>
            <div>Text in a div is not collected even if long enough</div>
            <p>Only this paragraph should survive extraction.</p>
        "#;

        let text = extractor().extract(html);
        assert_eq!(text, "Only this paragraph should survive extraction.");
    }

    #[test]
    fn test_whitespace_collapsed() {
        let html = "<p>  Tabs\t\tand   spaces\n\n\nacross lines inside a paragraph  </p>";

        let text = extractor().extract(html);
        assert_eq!(text, "Tabs and spaces\nacross lines inside a paragraph");
    }

    #[test]
    fn test_nested_inline_text_joined() {
        let html = "<p>Text with <b>bold</b> and <a href='#'>a link</a> inside it.</p>";

        let text = extractor().extract(html);
        assert_eq!(text, "Text with bold and a link inside it.");
    }

    #[test]
    fn test_empty_document() {
        assert_eq!(extractor().extract("<html></html>"), "");
    }

    #[test]
    fn test_invalid_selector_rejected() {
        let result = TextExtractor::new(&["p[", "h1"], 20);
        assert!(matches!(result, Err(CrawlerError::InvalidSelector { .. })));
    }

    #[test]
    fn test_url_validation() {
        assert!(parse_http_url("https://example.com/a").is_ok());
        assert!(matches!(
            parse_http_url("not a url"),
            Err(CrawlerError::InvalidUrl { .. })
        ));
        assert!(matches!(
            parse_http_url("ftp://example.com/file"),
            Err(CrawlerError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_url_is_fetch_error() {
        let source = HttpTextSource::from_config(&FetchConfig::default()).unwrap();

        let err = source.fetch("file:///etc/passwd").await.unwrap_err();
        assert!(matches!(err, EwaError::Fetch { .. }));
    }

    /// Serve one canned HTTP response on a local port
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }

            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });

        format!("http://{addr}/page")
    }

    #[tokio::test]
    async fn test_not_found_page_is_fetch_error() {
        let url = serve_once("404 Not Found", "gone").await;
        let source = HttpTextSource::from_config(&FetchConfig::default()).unwrap();

        match source.fetch(&url).await {
            Err(EwaError::Fetch { url: failed, reason }) => {
                assert_eq!(failed, url);
                assert!(reason.contains("404"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_page_text_fetched_and_extracted() {
        let url = serve_once(
            "200 OK",
            "<html><body><h1>Ankara is the capital city</h1><p>short</p></body></html>",
        )
        .await;
        let source = HttpTextSource::from_config(&FetchConfig::default()).unwrap();

        let text = source.fetch(&url).await.unwrap();
        assert_eq!(text, "Ankara is the capital city");
    }

    #[test]
    fn test_status_error_maps_to_fetch() {
        let err: EwaError = CrawlerError::Status {
            url: "https://example.com".to_string(),
            status: 404,
        }
        .into();

        match err {
            EwaError::Fetch { url, reason } => {
                assert_eq!(url, "https://example.com");
                assert!(reason.contains("404"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn prop_chunks_under_limit_never_kept(chunk in "[a-zA-Z ]{0,19}") {
            prop_assert!(!extractor().should_keep(&chunk));
        }

        #[test]
        fn prop_letterless_chunks_never_kept(chunk in "[0-9 .,;:!?()-]{20,60}") {
            prop_assert!(!extractor().should_keep(&chunk));
        }

        #[test]
        fn prop_long_chunks_with_a_letter_kept(
            prefix in "[0-9 .,]{19,40}",
            letter in "[a-zA-Z]",
        ) {
            let chunk = format!("{prefix}{letter}");
            prop_assert!(extractor().should_keep(&chunk));
        }

        #[test]
        fn prop_normalized_text_has_no_runs(text in "[a-z \t\n]{0,80}") {
            let normalized = extractor().normalize(&text);
            prop_assert!(!normalized.contains("  "));
            prop_assert!(!normalized.contains("\n\n"));
            prop_assert!(!normalized.contains('\t'));
        }
    }
}
