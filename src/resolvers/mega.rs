//! Mega resolver and key plumbing.
//!
//! An embed URL looks like `https://mega.nz/embed/<NODE>#<KEY>`. The node
//! resolves to a CDN URL through the batch command endpoint; the payload
//! on that CDN URL is AES-128-CTR encrypted with a key that only ever
//! exists in the URL fragment, which is why archival keeps the embed URL.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use regex::Regex;
use reqwest::Client;
use serde_json::json;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

use super::BROWSER_UA;

const MEGA_API: &str = "https://g.api.mega.co.nz/cs";
const MAX_API_RETRIES: u32 = 5;

/// Subset of the API's negative result codes worth naming in logs.
fn error_name(code: i64) -> &'static str {
    match code {
        -2 => "invalid arguments",
        -3 | -4 => "rate limited",
        -9 => "not found",
        -17 => "too many connections",
        _ => "api error",
    }
}

fn embed_regex() -> Option<&'static Regex> {
    static INSTANCE: OnceLock<Option<Regex>> = OnceLock::new();
    INSTANCE
        .get_or_init(|| {
            Regex::new(r"mega\.(?:co\.)?nz/(?:embed|file)/([A-Za-z0-9_-]+)#?([A-Za-z0-9_-]*)").ok()
        })
        .as_ref()
}

/// Node id and (possibly empty) key fragment from an embed URL.
#[must_use]
pub fn parse_embed(url: &str) -> Option<(String, String)> {
    let caps = embed_regex()?.captures(url)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// Decode the 32-byte file key: the AES key is the XOR of the two halves,
/// the CTR nonce is bytes 16..24 (counter starts at zero).
#[must_use]
pub fn decode_key(key_b64: &str) -> Option<([u8; 16], [u8; 8])> {
    let raw = URL_SAFE_NO_PAD.decode(key_b64).ok()?;
    if raw.len() != 32 {
        return None;
    }

    let mut aes_key = [0u8; 16];
    for i in 0..16 {
        aes_key[i] = raw[i] ^ raw[i + 16];
    }

    let mut nonce = [0u8; 8];
    nonce.copy_from_slice(&raw[16..24]);

    Some((aes_key, nonce))
}

#[derive(Debug, Clone)]
pub struct MegaNode {
    pub cdn_url: String,
    pub size: u64,
}

/// Resolve a node to its CDN URL via the batch command endpoint, retrying
/// rate-limit codes with exponential backoff.
pub async fn fetch_node(client: &Client, node_id: &str) -> Option<MegaNode> {
    for attempt in 0..MAX_API_RETRIES {
        let mut nonce = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut nonce);
        let url = format!("{MEGA_API}?id={}", hex::encode(nonce));

        let response = client
            .post(&url)
            .header(reqwest::header::USER_AGENT, BROWSER_UA)
            .header(reqwest::header::ORIGIN, "https://mega.nz")
            .header(reqwest::header::REFERER, "https://mega.nz/")
            .json(&json!([{"a": "g", "g": 1, "p": node_id}]))
            .send()
            .await
            .ok()?;

        let body: serde_json::Value = response.json().await.ok()?;
        let first = body.as_array()?.first()?.clone();

        if let Some(code) = first.as_i64() {
            if code == -3 || code == -4 {
                let wait = 1u64 << attempt;
                warn!(node = %node_id, code, "Mega API {}, retrying in {wait}s", error_name(code));
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }
            warn!(node = %node_id, code, "Mega API {}", error_name(code));
            return None;
        }

        let cdn_url = first.get("g")?.as_str()?.to_string();
        let size = first.get("s").and_then(serde_json::Value::as_u64).unwrap_or(0);
        return Some(MegaNode { cdn_url, size });
    }

    warn!(node = %node_id, "Mega API still rate limited after {MAX_API_RETRIES} retries");
    None
}

pub async fn resolve(client: &Client, embed_url: &str) -> Option<String> {
    let (node_id, _key) = parse_embed(embed_url)?;
    fetch_node(client, &node_id).await.map(|node| node.cdn_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_embed_variants() {
        let (node, key) = parse_embed("https://mega.nz/embed/AbC123-_#k3y_-fragment").unwrap();
        assert_eq!(node, "AbC123-_");
        assert_eq!(key, "k3y_-fragment");

        let (node, key) = parse_embed("https://mega.co.nz/file/NODEID").unwrap();
        assert_eq!(node, "NODEID");
        assert!(key.is_empty());

        assert!(parse_embed("https://example.com/embed/x").is_none());
    }

    #[test]
    fn test_decode_key_xor_and_nonce() {
        let mut raw = [0u8; 32];
        for (i, byte) in raw.iter_mut().enumerate() {
            *byte = i as u8;
        }
        let encoded = URL_SAFE_NO_PAD.encode(raw);
        let (aes_key, nonce) = decode_key(&encoded).unwrap();

        for (i, byte) in aes_key.iter().enumerate() {
            assert_eq!(*byte, (i as u8) ^ (i as u8 + 16));
        }
        assert_eq!(nonce, [16, 17, 18, 19, 20, 21, 22, 23]);
    }

    #[test]
    fn test_decode_key_rejects_wrong_length() {
        let encoded = URL_SAFE_NO_PAD.encode([0u8; 16]);
        assert!(decode_key(&encoded).is_none());
    }
}
