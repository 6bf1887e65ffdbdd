//! Samehadaku scraper. Card titles here are full romaji titles and search
//! result sets are small and specific, which the cross-provider search
//! exploits. Mirrors are loaded through the theme's admin-ajax player
//! endpoint.

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use std::sync::OnceLock;
use tracing::debug;

use super::{
    AnimeCard, EmbedServer, EpisodeEntry, Provider, ProviderKind, ScrapedDetail, BROWSER_UA,
    extract_resolution, fetch_html,
};

const BASE: &str = "https://samehadaku.care";

struct SamehadakuRegex {
    card: Regex,
    title_h1: Regex,
    cover: Regex,
    year: Regex,
    total_episodes: Regex,
    episode_link: Regex,
    player_option: Regex,
    iframe_src: Regex,
}

impl SamehadakuRegex {
    fn get() -> Option<&'static Self> {
        static INSTANCE: OnceLock<Option<SamehadakuRegex>> = OnceLock::new();
        INSTANCE
            .get_or_init(|| {
                Some(Self {
                    card: Regex::new(
                        r#"(?s)<div class="animepost">.*?<a href="[^"]*/anime/([^/"]+)/?"[^>]*(?:title="([^"]*)")?.*?<img[^>]*src="([^"]+)"[^>]*(?:title="([^"]*)")?"#,
                    )
                    .ok()?,
                    title_h1: Regex::new(r#"<h1[^>]*class="entry-title"[^>]*>([^<]+)</h1>"#).ok()?,
                    cover: Regex::new(
                        r#"(?s)<div class="thumb[^"]*">.*?<img[^>]*src="([^"]+)""#,
                    )
                    .ok()?,
                    year: Regex::new(r"(?i)(?:Released|Tahun|Rilis)[^0-9]{0,40}(\d{4})").ok()?,
                    total_episodes: Regex::new(r"(?i)Total\s+Episode[^0-9]{0,40}(\d+)").ok()?,
                    episode_link: Regex::new(
                        r#"<a href="([^"]*?-episode-(\d+)[^"]*)"[^>]*>([^<]*)</a>"#,
                    )
                    .ok()?,
                    player_option: Regex::new(
                        r#"(?s)<div class="east_player_option"[^>]*data-post="(\d+)"[^>]*data-nume="(\d+)"[^>]*data-type="([^"]+)"[^>]*>\s*<span>([^<]*)</span>"#,
                    )
                    .ok()?,
                    iframe_src: Regex::new(r#"<iframe[^>]*src="([^"]+)""#).ok()?,
                })
            })
            .as_ref()
    }
}

fn parse_cards(html: &str) -> Vec<AnimeCard> {
    let Some(re) = SamehadakuRegex::get() else {
        return Vec::new();
    };
    re.card
        .captures_iter(html)
        .filter_map(|c| {
            let title = c
                .get(2)
                .or_else(|| c.get(4))
                .map(|m| m.as_str())
                .unwrap_or_default();
            Some(AnimeCard {
                slug: c.get(1)?.as_str().to_string(),
                title: html_escape::decode_html_entities(title).trim().to_string(),
                cover_url: c.get(3)?.as_str().to_string(),
            })
        })
        .collect()
}

pub struct Samehadaku {
    client: Client,
}

impl Samehadaku {
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    /// The theme serves each mirror through a `player_ajax` POST returning
    /// an iframe fragment.
    async fn load_player(&self, post: &str, nume: &str, kind: &str) -> Option<String> {
        let response = self
            .client
            .post(format!("{BASE}/wp-admin/admin-ajax.php"))
            .header(reqwest::header::USER_AGENT, BROWSER_UA)
            .header(reqwest::header::REFERER, BASE)
            .form(&[
                ("action", "player_ajax"),
                ("post", post),
                ("nume", nume),
                ("type", kind),
            ])
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            debug!(post = %post, nume = %nume, status = %response.status(), "player_ajax failed");
            return None;
        }

        let fragment = response.text().await.ok()?;
        let re = SamehadakuRegex::get()?;
        re.iframe_src
            .captures(&fragment)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }
}

#[async_trait]
impl Provider for Samehadaku {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Samehadaku
    }

    fn cover_domains(&self) -> &'static [&'static str] {
        &["samehadaku.care", "samehadaku.email", "wp.com"]
    }

    fn card_titles_reliable(&self) -> bool {
        true
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
        let re = SamehadakuRegex::get()
            .ok_or_else(|| anyhow::anyhow!("samehadaku regex set failed to build"))?;

        let title = re
            .title_h1
            .captures(&html)
            .and_then(|c| c.get(1))
            .map(|m| {
                html_escape::decode_html_entities(m.as_str())
                    .trim()
                    .to_string()
            })
            .ok_or_else(|| anyhow::anyhow!("samehadaku detail page for {slug} has no title"))?;

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
            provider: ProviderKind::Samehadaku,
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
        let Some(re) = SamehadakuRegex::get() else {
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
        let Some(re) = SamehadakuRegex::get() else {
            return Ok(Vec::new());
        };

        let options: Vec<(String, String, String, String)> = re
            .player_option
            .captures_iter(&html)
            .filter_map(|c| {
                Some((
                    c.get(1)?.as_str().to_string(),
                    c.get(2)?.as_str().to_string(),
                    c.get(3)?.as_str().to_string(),
                    html_escape::decode_html_entities(c.get(4)?.as_str())
                        .trim()
                        .to_string(),
                ))
            })
            .collect();

        let mut servers = Vec::with_capacity(options.len());
        for (post, nume, kind, label) in options {
            if let Some(embed_url) = self.load_player(&post, &nume, &kind).await {
                let resolution = extract_resolution(&label);
                servers.push(EmbedServer {
                    label,
                    embed_url,
                    resolution,
                });
            }
        }

        Ok(servers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cards() {
        let html = r#"
            <div class="animepost"><div class="animposx">
            <a href="https://samehadaku.care/anime/jigokuraku-season-2/" title="Jigokuraku Season 2">
            <img src="https://samehadaku.care/wp-content/uploads/poster.jpg"></a></div></div>
        "#;
        let cards = parse_cards(html);
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].slug, "jigokuraku-season-2");
        assert_eq!(cards[0].title, "Jigokuraku Season 2");
    }

    #[test]
    fn test_player_option_extraction() {
        let re = SamehadakuRegex::get().unwrap();
        let html = r#"<div class="east_player_option" data-post="5521" data-nume="2" data-type="schtml"> <span>Vidhide 1080p</span></div>"#;
        let caps = re.player_option.captures(html).unwrap();
        assert_eq!(&caps[1], "5521");
        assert_eq!(&caps[2], "2");
        assert_eq!(&caps[4], "Vidhide 1080p");
    }
}
