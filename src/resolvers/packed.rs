//! Resolver for hosts shipping a Dean Edwards packed player snippet.
//!
//! The packed block is unpacked by base-N token substitution, the `links`
//! object is read in `hls2` > `hls4` > `hls3` priority, and the master
//! playlist is resolved down to its first variant.

use regex::Regex;
use reqwest::Client;
use std::sync::OnceLock;
use tracing::{debug, warn};
use url::Url;

use super::BROWSER_UA;

const HLS_KEYS: [&str; 3] = ["hls2", "hls4", "hls3"];

struct PackedRegex {
    packed_block: Regex,
    bare_m3u8: Regex,
}

impl PackedRegex {
    fn get() -> Option<&'static Self> {
        static INSTANCE: OnceLock<Option<PackedRegex>> = OnceLock::new();
        INSTANCE
            .get_or_init(|| {
                Some(Self {
                    packed_block: Regex::new(
                        r"(?s)eval\(function\(p,a,c,k,e,(?:d|r)\)\{.*?\}\('(.*?)',(\d+),(\d+),'(.*?)'\.split\('\|'\)\)",
                    )
                    .ok()?,
                    bare_m3u8: Regex::new(r#"https?://[^"'\s\\]+\.m3u8[^"'\s\\]*"#).ok()?,
                })
            })
            .as_ref()
    }
}

fn base_n(mut num: usize, base: usize) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if num == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while num > 0 {
        out.push(DIGITS[num % base]);
        num /= base;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Standard packer inversion: every base-`a` token in `p` is replaced by
/// its dictionary word, highest index first.
#[must_use]
pub fn unpack(p: &str, a: usize, c: usize, k: &[&str]) -> String {
    let mut text = p.to_string();
    for i in (0..c).rev() {
        let Some(word) = k.get(i) else {
            continue;
        };
        if word.is_empty() {
            continue;
        }
        let token = base_n(i, a);
        let Ok(re) = Regex::new(&format!(r"\b{}\b", regex::escape(&token))) else {
            continue;
        };
        text = re.replace_all(&text, *word).to_string();
    }
    text
}

/// Find and unpack the packed block in a page, if any.
#[must_use]
pub fn unpack_page(html: &str) -> Option<String> {
    let re = PackedRegex::get()?;
    let caps = re.packed_block.captures(html)?;
    let p = caps.get(1)?.as_str();
    let a: usize = caps.get(2)?.as_str().parse().ok()?;
    let c: usize = caps.get(3)?.as_str().parse().ok()?;
    let k: Vec<&str> = caps.get(4)?.as_str().split('|').collect();
    Some(unpack(p, a, c, &k))
}

/// Read the `links` object out of unpacked player code, in quality
/// priority order, falling back to any bare playlist URL.
#[must_use]
pub fn extract_hls_url(unpacked: &str) -> Option<String> {
    for key in HLS_KEYS {
        let Ok(re) = Regex::new(&format!(r#""{key}"\s*:\s*"([^"]+)""#)) else {
            continue;
        };
        if let Some(caps) = re.captures(unpacked) {
            return Some(caps[1].replace("\\/", "/"));
        }
    }

    PackedRegex::get()?
        .bare_m3u8
        .find(unpacked)
        .map(|m| m.as_str().to_string())
}

/// Pick the first variant URI after `#EXT-X-STREAM-INF`, absolutised
/// against the master's own URL.
#[must_use]
pub fn first_variant(master_body: &str, master_url: &str) -> Option<String> {
    let lines: Vec<&str> = master_body.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        if !line.starts_with("#EXT-X-STREAM-INF") {
            continue;
        }
        let Some(next) = lines.get(i + 1) else {
            continue;
        };
        let uri = next.trim();
        if uri.is_empty() || uri.starts_with('#') {
            continue;
        }
        if uri.starts_with("http") {
            return Some(uri.to_string());
        }
        return Url::parse(master_url)
            .ok()?
            .join(uri)
            .ok()
            .map(|u| u.to_string());
    }
    None
}

pub async fn resolve(client: &Client, embed_url: &str) -> Option<String> {
    let referer = Url::parse(embed_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| format!("https://{h}/")))?;

    let response = client
        .get(embed_url)
        .header(reqwest::header::USER_AGENT, BROWSER_UA)
        .header(reqwest::header::REFERER, referer)
        .send()
        .await
        .ok()?;

    let final_url = response.url().to_string();
    let html = response.text().await.ok()?;

    let Some(unpacked) = unpack_page(&html) else {
        debug!(url = %embed_url, "no packed block in page");
        return None;
    };

    let master_url = extract_hls_url(&unpacked)?;
    let master_url = if master_url.starts_with("http") {
        master_url
    } else {
        Url::parse(&final_url).ok()?.join(&master_url).ok()?.to_string()
    };

    let master_response = match client
        .get(&master_url)
        .header(reqwest::header::USER_AGENT, BROWSER_UA)
        .send()
        .await
    {
        Ok(r) if r.status().is_success() => r,
        _ => {
            warn!(url = %master_url, "master playlist fetch failed, returning master URL");
            return Some(master_url);
        }
    };

    let resolved_master_url = master_response.url().to_string();
    let body = master_response.text().await.ok()?;

    Some(first_variant(&body, &resolved_master_url).unwrap_or(master_url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_n() {
        assert_eq!(base_n(0, 36), "0");
        assert_eq!(base_n(10, 36), "a");
        assert_eq!(base_n(36, 36), "10");
    }

    #[test]
    fn test_unpack_substitutes_tokens() {
        let out = unpack("1 0=\"2\"", 36, 3, &["var", "player", "ready"]);
        assert_eq!(out, "player var=\"ready\"");
    }

    #[test]
    fn test_unpack_page_literal_block() {
        let html = r#"<script>eval(function(p,a,c,k,e,d){while(c--)if(k[c])p=p.replace(new RegExp('\\b'+c.toString(a)+'\\b','g'),k[c]);return p}('0("1")',2,2,'alert|hi'.split('|')))</script>"#;
        let unpacked = unpack_page(html).unwrap();
        assert_eq!(unpacked, r#"alert("hi")"#);
    }

    #[test]
    fn test_extract_hls_priority() {
        let unpacked = r#"var links={"hls3":"https:\/\/cdn\/c.m3u8","hls2":"https:\/\/cdn\/a.m3u8"};"#;
        assert_eq!(
            extract_hls_url(unpacked).as_deref(),
            Some("https://cdn/a.m3u8")
        );
    }

    #[test]
    fn test_extract_hls_bare_fallback() {
        let unpacked = r#"player.setup("https://edge.cdn.example/stream/index.m3u8?t=1")"#;
        assert_eq!(
            extract_hls_url(unpacked).as_deref(),
            Some("https://edge.cdn.example/stream/index.m3u8?t=1")
        );
    }

    #[test]
    fn test_first_variant_absolutises() {
        let master = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000\nindex-v1-a1.m3u8?t=X\n";
        let variant = first_variant(master, "https://cdn.example/hls/master.m3u8").unwrap();
        assert_eq!(variant, "https://cdn.example/hls/index-v1-a1.m3u8?t=X");
    }

    #[test]
    fn test_first_variant_absolute_passthrough() {
        let master = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000\nhttps://other.cdn/v.m3u8\n";
        assert_eq!(
            first_variant(master, "https://cdn.example/master.m3u8").as_deref(),
            Some("https://other.cdn/v.m3u8")
        );
    }
}
