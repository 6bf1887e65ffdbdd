//! Animasu scraper. WordPress theme with `bsx` cards, base64-encoded
//! iframe mirrors and Indonesian info labels.

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use reqwest::Client;
use std::sync::OnceLock;

use super::{
    AnimeCard, EmbedServer, EpisodeEntry, Provider, ProviderKind, ScrapedDetail, extract_resolution,
    fetch_html,
};

const BASE: &str = "https://v9.animasu.cc";

struct AnimasuRegex {
    card: Regex,
    title_h1: Regex,
    cover: Regex,
    year: Regex,
    total_episodes: Regex,
    episode_link: Regex,
    mirror_option: Regex,
    iframe_src: Regex,
}

impl AnimasuRegex {
    fn get() -> Option<&'static Self> {
        static INSTANCE: OnceLock<Option<AnimasuRegex>> = OnceLock::new();
        INSTANCE
            .get_or_init(|| {
                Some(Self {
                    card: Regex::new(
                        r#"(?s)<div class="bsx">\s*<a href="[^"]*/anime/([^/"]+)/?"[^>]*title="([^"]*)".*?<img[^>]*src="([^"]+)""#,
                    )
                    .ok()?,
                    title_h1: Regex::new(r#"<h1[^>]*class="entry-title"[^>]*>([^<]+)</h1>"#).ok()?,
                    cover: Regex::new(r#"(?s)<div class="thumb[^"]*">.*?<img[^>]*src="([^"]+)""#)
                        .ok()?,
                    year: Regex::new(r"(?i)(?:Rilis|Tahun)[^0-9]{0,40}(\d{4})").ok()?,
                    total_episodes: Regex::new(r"(?i)Total\s+Episode[^0-9]{0,40}(\d+)").ok()?,
                    episode_link: Regex::new(
                        r#"<a href="([^"]*?-episode-(\d+)[^"]*)"[^>]*>([^<]*)</a>"#,
                    )
                    .ok()?,
                    mirror_option: Regex::new(
                        r#"(?s)<option value="([^"]+)"[^>]*>\s*([^<]+?)\s*</option>"#,
                    )
                    .ok()?,
                    iframe_src: Regex::new(r#"<iframe[^>]*src="([^"]+)""#).ok()?,
                })
            })
            .as_ref()
    }
}

fn parse_cards(html: &str) -> Vec<AnimeCard> {
    let Some(re) = AnimasuRegex::get() else {
        return Vec::new();
    };
    re.card
        .captures_iter(html)
        .filter_map(|c| {
            Some(AnimeCard {
                slug: c.get(1)?.as_str().to_string(),
                title: html_escape::decode_html_entities(c.get(2)?.as_str())
                    .trim()
                    .to_string(),
                cover_url: c.get(3)?.as_str().to_string(),
            })
        })
        .collect()
}

/// Mirror options hold a base64-encoded `<iframe>` fragment; the embed URL
/// is that iframe's `src`.
fn parse_mirrors(html: &str) -> Vec<EmbedServer> {
    let Some(re) = AnimasuRegex::get() else {
        return Vec::new();
    };

    re.mirror_option
        .captures_iter(html)
        .filter_map(|c| {
            let encoded = c.get(1)?.as_str();
            let label = html_escape::decode_html_entities(c.get(2)?.as_str())
                .trim()
                .to_string();
            let decoded = BASE64.decode(encoded.trim()).ok()?;
            let fragment = String::from_utf8(decoded).ok()?;
            let embed_url = re
                .iframe_src
                .captures(&fragment)?
                .get(1)?
                .as_str()
                .to_string();
            let resolution = extract_resolution(&label);
            Some(EmbedServer {
                label,
                embed_url,
                resolution,
            })
        })
        .collect()
}

pub struct Animasu {
    client: Client,
}

impl Animasu {
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Provider for Animasu {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Animasu
    }

    fn cover_domains(&self) -> &'static [&'static str] {
        &["animasu.cc", "animasu.top", "wp.com"]
    }

    fn episode_url(&self, slug: &str, episode: i32) -> String {
        format!("{BASE}/{slug}-episode-{episode}/")
    }

    async fn home_cards(&self) -> Result<Vec<AnimeCard>> {
        let html = fetch_html(&self.client, &format!("{BASE}/")).await?;
        Ok(parse_cards(&html))
    }

    async fn search(&self, query: &str) -> Result<Vec<AnimeCard>> {
        let url = format!("{BASE}/?s={}", urlencoding::encode(query));
        let html = fetch_html(&self.client, &url).await?;
        Ok(parse_cards(&html))
    }

    async fn detail(&self, slug: &str) -> Result<ScrapedDetail> {
        let url = format!("{BASE}/anime/{slug}/");
        let html = fetch_html(&self.client, &url).await?;
        let re = AnimasuRegex::get()
            .ok_or_else(|| anyhow::anyhow!("animasu regex set failed to build"))?;

        let title = re
            .title_h1
            .captures(&html)
            .and_then(|c| c.get(1))
            .map(|m| html_escape::decode_html_entities(m.as_str()).trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("animasu detail page for {slug} has no title"))?;

        let cover_url = re
            .cover
            .captures(&html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        let year = re
            .year
            .captures(&html)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok());

        let total_episodes = re
            .total_episodes
            .captures(&html)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok());

        Ok(ScrapedDetail {
            provider: ProviderKind::Animasu,
            slug: slug.to_string(),
            title,
            cover_url,
            year,
            total_episodes,
        })
    }

    async fn episodes(&self, slug: &str) -> Result<Vec<EpisodeEntry>> {
        let url = format!("{BASE}/anime/{slug}/");
        let html = fetch_html(&self.client, &url).await?;
        let Some(re) = AnimasuRegex::get() else {
            return Ok(Vec::new());
        };

        let mut entries: Vec<EpisodeEntry> = re
            .episode_link
            .captures_iter(&html)
            .filter_map(|c| {
                let link = c.get(1)?.as_str();
                if !link.contains(slug) {
                    return None;
                }
                Some(EpisodeEntry {
                    number: c.get(2)?.as_str().parse().ok()?,
                    title: c.get(3).map(|m| {
                        html_escape::decode_html_entities(m.as_str())
                            .trim()
                            .to_string()
                    }),
                    url: link.to_string(),
                })
            })
            .collect();

        entries.sort_by_key(|e| e.number);
        entries.dedup_by_key(|e| e.number);
        Ok(entries)
    }

    async fn streaming_servers(&self, slug: &str, episode: i32) -> Result<Vec<EmbedServer>> {
        let url = self.episode_url(slug, episode);
        let html = fetch_html(&self.client, &url).await?;
        Ok(parse_mirrors(&html))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cards() {
        let html = r#"
            <div class="bsx"><a href="https://v9.animasu.cc/anime/jigokuraku-s2/" title="Jigokuraku S2">
            <img src="https://v9.animasu.cc/wp-content/uploads/cover.jpg"></a></div>
        "#;
        let cards = parse_cards(html);
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].slug, "jigokuraku-s2");
        assert_eq!(cards[0].title, "Jigokuraku S2");
    }

    #[test]
    fn test_parse_mirrors_decodes_iframe() {
        let iframe = r#"<iframe src="https://vidhidepro.com/v/abc123" allowfullscreen></iframe>"#;
        let encoded = BASE64.encode(iframe);
        let html = format!(
            r#"<select class="mirror"><option value="{encoded}">Vidhide 720p</option></select>"#
        );

        let mirrors = parse_mirrors(&html);
        assert_eq!(mirrors.len(), 1);
        assert_eq!(mirrors[0].embed_url, "https://vidhidepro.com/v/abc123");
        assert_eq!(mirrors[0].resolution.as_deref(), Some("720p"));
    }

    #[test]
    fn test_episode_url_format() {
        let provider = Animasu::new(Client::new());
        assert_eq!(
            provider.episode_url("jigokuraku-s2", 3),
            format!("{BASE}/jigokuraku-s2-episode-3/")
        );
    }
}
