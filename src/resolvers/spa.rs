//! Resolver for cloud SPA hosts that inline their page state as an
//! HTML-entity-encoded JSON blob in a `data-page` attribute.

use regex::Regex;
use reqwest::Client;
use std::sync::OnceLock;
use tracing::debug;

use super::BROWSER_UA;

fn data_page_regex() -> Option<&'static Regex> {
    static INSTANCE: OnceLock<Option<Regex>> = OnceLock::new();
    INSTANCE
        .get_or_init(|| Regex::new(r#"data-page="([^"]+)""#).ok())
        .as_ref()
}

/// Decode and parse the `data-page` payload, returning `props.url`.
#[must_use]
pub fn extract_props_url(html: &str) -> Option<String> {
    let caps = data_page_regex()?.captures(html)?;
    let decoded = html_escape::decode_html_entities(caps.get(1)?.as_str());
    let page: serde_json::Value = serde_json::from_str(&decoded).ok()?;
    page.pointer("/props/url")?
        .as_str()
        .map(str::to_string)
}

pub async fn resolve(client: &Client, embed_url: &str) -> Option<String> {
    let response = client
        .get(embed_url)
        .header(reqwest::header::USER_AGENT, BROWSER_UA)
        .send()
        .await
        .ok()?;

    if !response.status().is_success() {
        debug!(url = %embed_url, status = %response.status(), "SPA page fetch failed");
        return None;
    }

    let html = response.text().await.ok()?;
    extract_props_url(&html)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_props_url() {
        let html = r#"<div id="app" data-page="{&quot;component&quot;:&quot;Embed&quot;,&quot;props&quot;:{&quot;url&quot;:&quot;https://cdn.example/video.mp4&quot;}}"></div>"#;
        assert_eq!(
            extract_props_url(html).as_deref(),
            Some("https://cdn.example/video.mp4")
        );
    }

    #[test]
    fn test_extract_props_url_missing() {
        assert!(extract_props_url("<div>no state here</div>").is_none());
        let html = r#"<div data-page="{&quot;props&quot;:{}}"></div>"#;
        assert!(extract_props_url(html).is_none());
    }
}
