//! Resolver for hosts with an in-page videojs/jwplayer setup: the direct
//! URL sits in a `player.src({...})` call or a bare `file:` literal.

use regex::Regex;
use reqwest::Client;
use std::sync::OnceLock;
use tracing::debug;

use super::BROWSER_UA;

struct PlayerRegex {
    player_src: Regex,
    file_literal: Regex,
}

impl PlayerRegex {
    fn get() -> Option<&'static Self> {
        static INSTANCE: OnceLock<Option<PlayerRegex>> = OnceLock::new();
        INSTANCE
            .get_or_init(|| {
                Some(Self {
                    player_src: Regex::new(
                        r#"(?s)player\.src\(\s*\{[^}]*?["'](?:src|file)["']\s*:\s*["']([^"']+)["']"#,
                    )
                    .ok()?,
                    file_literal: Regex::new(r#"file\s*:\s*["'](https?://[^"']+)["']"#).ok()?,
                })
            })
            .as_ref()
    }
}

#[must_use]
pub fn extract_player_url(html: &str) -> Option<String> {
    let re = PlayerRegex::get()?;
    if let Some(caps) = re.player_src.captures(html) {
        return Some(caps[1].to_string());
    }
    re.file_literal
        .captures(html)
        .map(|caps| caps[1].to_string())
}

pub async fn resolve(client: &Client, embed_url: &str) -> Option<String> {
    let response = client
        .get(embed_url)
        .header(reqwest::header::USER_AGENT, BROWSER_UA)
        .send()
        .await
        .ok()?;

    if !response.status().is_success() {
        debug!(url = %embed_url, status = %response.status(), "player page fetch failed");
        return None;
    }

    let html = response.text().await.ok()?;
    extract_player_url(&html)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_player_src() {
        let html = r#"player.src({ type: "video/mp4", src: "https://s1.example/v.mp4" });"#;
        assert_eq!(
            extract_player_url(html).as_deref(),
            Some("https://s1.example/v.mp4")
        );
    }

    #[test]
    fn test_extract_file_literal() {
        let html = r#"jwplayer("vplayer").setup({file: "https://cdn.example/x.mp4", image: "p.jpg"});"#;
        assert_eq!(
            extract_player_url(html).as_deref(),
            Some("https://cdn.example/x.mp4")
        );
    }

    #[test]
    fn test_no_player_config() {
        assert!(extract_player_url("<html><body>static page</body></html>").is_none());
    }
}
