//! Scraped HTML providers. Selectors here are data, not design: each
//! provider module owns a regex set over its current theme markup.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub mod animasu;
pub mod samehadaku;

pub const BROWSER_UA: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Scrape retry schedule: immediate, then 500 ms, then 1000 ms.
const RETRY_DELAYS_MS: [u64; 3] = [0, 500, 1000];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Animasu,
    Samehadaku,
}

impl ProviderKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Animasu => "animasu",
            Self::Samehadaku => "samehadaku",
        }
    }

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "animasu" => Some(Self::Animasu),
            "samehadaku" => Some(Self::Samehadaku),
            _ => None,
        }
    }

    #[must_use]
    pub const fn all() -> [Self; 2] {
        [Self::Animasu, Self::Samehadaku]
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Card on a listing or search page.
#[derive(Debug, Clone)]
pub struct AnimeCard {
    pub slug: String,
    pub title: String,
    pub cover_url: String,
}

/// Transient detail-page scrape result; lives only for one discovery pass.
#[derive(Debug, Clone)]
pub struct ScrapedDetail {
    pub provider: ProviderKind,
    pub slug: String,
    pub title: String,
    pub cover_url: String,
    pub year: Option<i32>,
    pub total_episodes: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct EpisodeEntry {
    pub number: i32,
    pub title: Option<String>,
    pub url: String,
}

/// One mirror on an episode page, before host resolution.
#[derive(Debug, Clone)]
pub struct EmbedServer {
    pub label: String,
    pub embed_url: String,
    pub resolution: Option<String>,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Hostname suffixes of the provider's own domain and CDN family.
    /// A scraped cover living elsewhere is treated as decoration, not a
    /// poster, and discarded before hashing.
    fn cover_domains(&self) -> &'static [&'static str];

    /// Card titles that are full romaji titles over small result sets can
    /// skip card-level title pre-filtering during cross-provider search.
    fn card_titles_reliable(&self) -> bool {
        false
    }

    fn episode_url(&self, slug: &str, episode: i32) -> String;

    async fn home_cards(&self) -> Result<Vec<AnimeCard>>;

    async fn search(&self, query: &str) -> Result<Vec<AnimeCard>>;

    async fn detail(&self, slug: &str) -> Result<ScrapedDetail>;

    async fn episodes(&self, slug: &str) -> Result<Vec<EpisodeEntry>>;

    async fn streaming_servers(&self, slug: &str, episode: i32) -> Result<Vec<EmbedServer>>;
}

impl dyn Provider {
    #[must_use]
    pub fn is_cover_host(&self, cover_url: &str) -> bool {
        let Ok(parsed) = Url::parse(cover_url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        self.cover_domains()
            .iter()
            .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
    }
}

/// Fetch a page with the browser UA and the scrape retry schedule.
/// Transient transport errors and 5xx retry; 4xx is permanent and returns
/// an error immediately.
pub async fn fetch_html(client: &Client, url: &str) -> Result<String> {
    let mut last_error = None;

    for delay_ms in RETRY_DELAYS_MS {
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        match client
            .get(url)
            .header(reqwest::header::USER_AGENT, BROWSER_UA)
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.text().await?);
                }
                if status.is_client_error() {
                    anyhow::bail!("{url} returned {status}");
                }
                debug!(url = %url, status = %status, "scrape got server error, retrying");
                last_error = Some(anyhow::anyhow!("{url} returned {status}"));
            }
            Err(e) => {
                debug!(url = %url, error = %e, "scrape transport error, retrying");
                last_error = Some(e.into());
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("scrape failed: {url}")))
}

/// Pull a `720p`-style quality tag out of a mirror label.
#[must_use]
pub fn extract_resolution(label: &str) -> Option<String> {
    static RE: std::sync::OnceLock<Option<regex::Regex>> = std::sync::OnceLock::new();
    let re = RE
        .get_or_init(|| regex::Regex::new(r"(?i)\b(\d{3,4})\s*p\b").ok())
        .as_ref()?;
    re.captures(label)
        .and_then(|c| c.get(1))
        .map(|m| format!("{}p", m.as_str()))
}

/// All registered providers, scrape-client included.
pub struct ProviderSet {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderSet {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .unwrap_or_default();

        Self {
            providers: vec![
                Arc::new(animasu::Animasu::new(client.clone())),
                Arc::new(samehadaku::Samehadaku::new(client)),
            ],
        }
    }

    #[must_use]
    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.kind() == kind).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        self.providers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_roundtrip() {
        for kind in ProviderKind::all() {
            assert_eq!(ProviderKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ProviderKind::parse("unknown"), None);
    }

    #[test]
    fn test_extract_resolution() {
        assert_eq!(extract_resolution("Mirror 720p HD").as_deref(), Some("720p"));
        assert_eq!(extract_resolution("1080P ULTRA").as_deref(), Some("1080p"));
        assert_eq!(extract_resolution("Server A"), None);
    }
}
