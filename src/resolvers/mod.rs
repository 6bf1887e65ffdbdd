//! Host resolvers: one embed URL in, one direct playable URL out.
//!
//! Dispatch is a linear scan over a small closed table of hostname
//! predicates. Unknown hosts resolve to nothing; no resolver ever throws.

use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub mod mega;
pub mod packed;
pub mod player;
pub mod spa;

pub const BROWSER_UA: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Hosts that pack the player setup with the Dean Edwards packer and serve
/// ASN-bound HLS tokens.
const PACKED_HOSTS: &[&str] = &["vidhidepro", "vidhidefast", "callistanise"];

/// Mega embeds carry the AES key in the URL fragment; the CDN URL alone is
/// useless to anyone who did not see the embed.
const MEGA_HOSTS: &[&str] = &["mega.nz", "mega.co.nz"];

/// Inertia-style SPA file hosts exposing the page state in `data-page`.
const SPA_HOSTS: &[&str] = &["wibufile.com"];

/// Plain player-config hosts with a `file:`/`src:` literal in the page.
const PLAYER_HOSTS: &[&str] = &["mp4upload.com", "yourupload.com"];

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

fn host_matches(host: &str, needles: &[&str]) -> bool {
    needles
        .iter()
        .any(|n| host == *n || host.ends_with(&format!(".{n}")) || host.contains(n))
}

/// True when the archival worker must receive the embed URL instead of the
/// resolved CDN URL: either the CDN token is bound to the resolver's
/// network (packed family) or the decryption key never reaches the CDN URL
/// at all (Mega).
#[must_use]
pub fn requires_embed_archival(url: &str) -> bool {
    let Some(host) = host_of(url) else {
        return false;
    };
    host_matches(&host, PACKED_HOSTS) || host_matches(&host, MEGA_HOSTS)
}

pub struct ResolverSet {
    client: Client,
}

impl ResolverSet {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Resolve one embed to a direct playable URL. Unknown host or any
    /// failure inside a resolver yields `None`.
    pub async fn resolve(&self, embed_url: &str) -> Option<String> {
        let host = host_of(embed_url)?;

        if host_matches(&host, PACKED_HOSTS) {
            return packed::resolve(&self.client, embed_url).await;
        }
        if host_matches(&host, MEGA_HOSTS) {
            return mega::resolve(&self.client, embed_url).await;
        }
        if host_matches(&host, SPA_HOSTS) {
            return spa::resolve(&self.client, embed_url).await;
        }
        if host_matches(&host, PLAYER_HOSTS) {
            return player::resolve(&self.client, embed_url).await;
        }

        debug!(url = %embed_url, host = %host, "no resolver registered for host");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_embed_archival() {
        assert!(requires_embed_archival("https://vidhidepro.com/v/abc"));
        assert!(requires_embed_archival("https://mega.nz/embed/xyz#key"));
        assert!(!requires_embed_archival("https://mp4upload.com/embed-x.html"));
        assert!(!requires_embed_archival("not a url"));
    }

    #[test]
    fn test_host_matching_is_suffix_aware() {
        assert!(host_matches("www.mega.co.nz", MEGA_HOSTS));
        assert!(host_matches("vidhidefast.com", PACKED_HOSTS));
        assert!(!host_matches("example.com", PACKED_HOSTS));
    }
}
