//! Outbound feed fetching.
//!
//! [`HttpFeedFetcher`] issues conditional GETs with bounded timeouts, caps
//! the body size, refuses private and loopback destinations and parses the
//! document with feed-rs.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use feed_rs::parser;
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, StatusCode};

use crate::config::RefreshConfig;
use crate::feeds::{FetchValidators, FetchedMeta, NewArticle};
use crate::{FeedgateError, Result};

/// User agent string for feed fetching.
const USER_AGENT: &str = concat!("feedgate/", env!("CARGO_PKG_VERSION"), " (feed reader)");

/// Maximum characters kept from an article summary.
const MAX_SUMMARY_CHARS: usize = 2000;

/// A parsed feed document.
#[derive(Debug, Clone, Default)]
pub struct FetchedFeed {
    /// Feed metadata and the response's validators.
    pub meta: FetchedMeta,
    /// Entries in document order.
    pub articles: Vec<NewArticle>,
}

/// Result of a fetch.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The server answered 304 to the conditional request.
    NotModified,
    /// A fresh document.
    Fetched(FetchedFeed),
}

/// Fetches feed documents.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetch `url`, sending `validators` as conditional headers.
    async fn fetch(&self, url: &str, validators: &FetchValidators) -> Result<FetchOutcome>;
}

/// reqwest-backed [`FeedFetcher`].
#[derive(Debug, Clone)]
pub struct HttpFeedFetcher {
    client: Client,
    max_feed_size: u64,
    max_items: usize,
}

impl HttpFeedFetcher {
    /// Create a fetcher from the `[refresh]` section.
    pub fn from_config(config: &RefreshConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .timeout(Duration::from_secs(config.total_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FeedgateError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_feed_size: config.max_feed_size_bytes,
            max_items: config.max_items_per_feed,
        })
    }

    async fn read_body(&self, mut response: reqwest::Response) -> Result<Vec<u8>> {
        if let Some(content_length) = response.content_length() {
            if content_length > self.max_feed_size {
                return Err(too_large(content_length, self.max_feed_size));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FeedgateError::UpstreamFetch(format!("failed to read response: {e}")))?
        {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > self.max_feed_size {
                return Err(too_large(body.len() as u64, self.max_feed_size));
            }
        }
        Ok(body)
    }
}

fn too_large(size: u64, max: u64) -> FeedgateError {
    FeedgateError::UpstreamFetch(format!("feed too large: {size} bytes (max {max} bytes)"))
}

fn header_string(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, url: &str, validators: &FetchValidators) -> Result<FetchOutcome> {
        validate_url(url)?;

        let mut request = self.client.get(url);
        if let Some(etag) = &validators.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &validators.last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FeedgateError::UpstreamFetch(format!("failed to fetch feed: {e}")))?;

        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::NotModified);
        }
        if !response.status().is_success() {
            return Err(FeedgateError::UpstreamFetch(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let validators = FetchValidators {
            etag: header_string(&response, ETAG),
            last_modified: header_string(&response, LAST_MODIFIED),
        };

        let body = self.read_body(response).await?;
        let mut feed = parse_feed(&body, self.max_items)?;
        feed.meta.validators = validators;

        Ok(FetchOutcome::Fetched(feed))
    }
}

/// Validate a feed URL for SSRF protection.
///
/// Only http and https are allowed, and the host must not be a loopback,
/// private or link-local address or a reserved internal hostname.
pub fn validate_url(url: &str) -> Result<()> {
    let parsed =
        url::Url::parse(url).map_err(|e| FeedgateError::Validation(format!("invalid URL: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(FeedgateError::Validation(format!(
                "unsupported URL scheme: {scheme}"
            )));
        }
    }

    let host = parsed
        .host()
        .ok_or_else(|| FeedgateError::Validation("URL has no host".to_string()))?;

    match host {
        url::Host::Domain(domain) => {
            if is_forbidden_hostname(domain) {
                return Err(FeedgateError::Validation(format!("forbidden host: {domain}")));
            }
        }
        url::Host::Ipv4(ipv4) => check_ip(IpAddr::V4(ipv4))?,
        url::Host::Ipv6(ipv6) => check_ip(IpAddr::V6(ipv6))?,
    }

    Ok(())
}

fn check_ip(ip: IpAddr) -> Result<()> {
    if is_private_ip(&ip) {
        return Err(FeedgateError::Validation(format!(
            "private IP address not allowed: {ip}"
        )));
    }
    Ok(())
}

fn is_forbidden_hostname(host: &str) -> bool {
    const FORBIDDEN_SUFFIXES: [&str; 7] = [
        ".local",
        ".localhost",
        ".internal",
        ".intranet",
        ".corp",
        ".home",
        ".lan",
    ];

    let host = host.to_ascii_lowercase();
    host == "localhost" || FORBIDDEN_SUFFIXES.iter().any(|s| host.ends_with(s))
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            let octets = ipv4.octets();
            ipv4.is_loopback()
                || ipv4.is_private()
                || ipv4.is_link_local()
                || ipv4.is_broadcast()
                || ipv4.is_unspecified()
                // Carrier-grade NAT: 100.64.0.0/10
                || (octets[0] == 100 && (64..=127).contains(&octets[1]))
        }
        IpAddr::V6(ipv6) => {
            let segments = ipv6.segments();
            ipv6.is_loopback()
                || ipv6.is_unspecified()
                // Unique local: fc00::/7
                || (segments[0] & 0xfe00) == 0xfc00
                // Link-local: fe80::/10
                || (segments[0] & 0xffc0) == 0xfe80
                || ipv6.to_ipv4_mapped().is_some_and(|v4| is_private_ip(&IpAddr::V4(v4)))
        }
    }
}

/// Parse a feed document, keeping at most `max_items` entries.
pub fn parse_feed(bytes: &[u8], max_items: usize) -> Result<FetchedFeed> {
    let feed = parser::parse(bytes)
        .map_err(|e| FeedgateError::UpstreamFetch(format!("failed to parse feed: {e}")))?;

    let meta = FetchedMeta {
        title: feed.title.map(|t| t.content),
        site_url: feed.links.first().map(|l| l.href.clone()),
        validators: FetchValidators::default(),
    };

    let articles = feed
        .entries
        .into_iter()
        .take(max_items)
        .map(|entry| {
            let title = entry
                .title
                .map(|t| strip_html(&t.content))
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Untitled".to_string());

            let mut article = NewArticle::new(entry.id, title);
            if let Some(link) = entry.links.first() {
                article = article.with_link(link.href.clone());
            }
            let summary = entry
                .summary
                .map(|t| t.content)
                .or(entry.content.and_then(|c| c.body))
                .map(|s| truncate_chars(&strip_html(&s), MAX_SUMMARY_CHARS));
            if let Some(summary) = summary.filter(|s| !s.is_empty()) {
                article = article.with_summary(summary);
            }
            if let Some(published_at) = entry.published.or(entry.updated) {
                article = article.with_published_at(published_at);
            }
            article
        })
        .collect();

    Ok(FetchedFeed { meta, articles })
}

/// Strip HTML tags and decode common entities.
fn strip_html(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut entity: Option<String> = None;

    for ch in html.chars() {
        if let Some(name) = entity.as_mut() {
            if ch == ';' {
                push_entity(&mut result, name);
                entity = None;
            } else if ch.is_ascii_alphanumeric() || ch == '#' {
                name.push(ch);
            } else {
                // Not an entity after all
                result.push('&');
                result.push_str(name);
                result.push(ch);
                entity = None;
            }
            continue;
        }

        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            '&' if !in_tag => entity = Some(String::new()),
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    if let Some(name) = entity {
        result.push('&');
        result.push_str(&name);
    }

    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn push_entity(out: &mut String, name: &str) {
    let decoded = match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => parse_numeric_entity(name).and_then(char::from_u32),
    };
    match decoded {
        Some(c) => out.push(c),
        None => {
            out.push('&');
            out.push_str(name);
            out.push(';');
        }
    }
}

/// Parse a numeric HTML entity (e.g., "#123" or "#x7B").
fn parse_numeric_entity(entity: &str) -> Option<u32> {
    let digits = entity.strip_prefix('#')?;
    match digits.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => digits.parse().ok(),
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example Blog</title>
    <link>https://example.com/</link>
    <item>
      <guid>post-2</guid>
      <title>Second &amp; newer</title>
      <link>https://example.com/2</link>
      <description>&lt;p&gt;Hello &lt;b&gt;world&lt;/b&gt;&lt;/p&gt;</description>
      <pubDate>Tue, 02 Jan 2024 10:00:00 GMT</pubDate>
    </item>
    <item>
      <guid>post-1</guid>
      <title>First</title>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_feed() {
        let feed = parse_feed(RSS.as_bytes(), 100).unwrap();

        assert_eq!(feed.meta.title.as_deref(), Some("Example Blog"));
        assert_eq!(feed.articles.len(), 2);

        let newest = &feed.articles[0];
        assert_eq!(newest.guid, "post-2");
        assert_eq!(newest.title, "Second & newer");
        assert_eq!(newest.link.as_deref(), Some("https://example.com/2"));
        assert_eq!(newest.summary.as_deref(), Some("Hello world"));
        assert!(newest.published_at.is_some());
    }

    #[test]
    fn test_parse_feed_caps_items() {
        let feed = parse_feed(RSS.as_bytes(), 1).unwrap();
        assert_eq!(feed.articles.len(), 1);
    }

    #[test]
    fn test_parse_feed_rejects_garbage() {
        let err = parse_feed(b"not a feed", 10).unwrap_err();
        assert!(matches!(err, FeedgateError::UpstreamFetch(_)));
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("<p>Hello <b>world</b></p>"), "Hello world");
        assert_eq!(strip_html("a &lt; b &#x41; &#66;"), "a < b A B");
        assert_eq!(strip_html("fish & chips"), "fish & chips");
        assert_eq!(strip_html("  spaced \n\t out  "), "spaced out");
    }

    #[test]
    fn test_validate_url_valid() {
        assert!(validate_url("https://example.com/feed.xml").is_ok());
        assert!(validate_url("http://example.com/feed.xml").is_ok());
    }

    #[test]
    fn test_validate_url_invalid_scheme() {
        let err = validate_url("ftp://example.com/feed.xml").unwrap_err();
        assert!(err.to_string().contains("unsupported URL scheme"));
    }

    #[test]
    fn test_validate_url_forbidden_hosts() {
        for url in [
            "http://localhost/feed.xml",
            "http://server.local/feed.xml",
            "http://api.internal/feed.xml",
        ] {
            let err = validate_url(url).unwrap_err();
            assert!(err.to_string().contains("forbidden host"), "{url}");
        }
        assert!(validate_url("http://localhost.example.com/feed.xml").is_ok());
    }

    #[test]
    fn test_validate_url_private_ips() {
        for url in [
            "http://127.0.0.1/feed.xml",
            "http://10.0.0.1/feed.xml",
            "http://172.16.0.1/feed.xml",
            "http://192.168.1.1/feed.xml",
            "http://169.254.1.1/feed.xml",
            "http://100.64.0.1/feed.xml",
            "http://[::1]/feed.xml",
            "http://[fd00::1]/feed.xml",
            "http://[::ffff:127.0.0.1]/feed.xml",
        ] {
            let err = validate_url(url).unwrap_err();
            assert!(err.to_string().contains("private IP"), "{url}");
        }
        assert!(validate_url("http://172.32.0.1/feed.xml").is_ok());
        assert!(validate_url("http://93.184.216.34/feed.xml").is_ok());
    }
}
