//! Per-episode streaming enrichment.
//!
//! Scrapes embed mirrors from every provider, resolves them to direct CDN
//! URLs, and wraps each in a stable proxied stream URL. Direct URLs are
//! ephemeral, so every request also checks the durable store and quietly
//! enqueues anything not yet archived.

use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::db::Store;
use crate::entities::mapping;
use crate::providers::{ProviderKind, ProviderSet};
use crate::resolvers::{ResolverSet, requires_embed_archival};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// One fully enriched mirror as served to clients.
#[derive(Debug, Clone, Serialize)]
pub struct StreamingServer {
    pub provider: String,
    pub url: String,
    pub url_resolved: Option<String>,
    pub resolution: Option<String>,
    pub stream: Option<String>,
}

/// Scrape + resolution output cached per episode; the store check runs
/// again on every request regardless.
#[derive(Debug, Clone)]
struct ScrapedServer {
    label: String,
    embed_url: String,
    resolved_url: Option<String>,
    resolution: Option<String>,
}

struct CacheEntry {
    servers: HashMap<ProviderKind, Option<Vec<ScrapedServer>>>,
    inserted_at: Instant,
}

pub struct StreamingService {
    store: Store,
    providers: Arc<ProviderSet>,
    resolvers: Arc<ResolverSet>,
    http: Client,
    proxy_base: String,
    worker_base: String,
    salt: String,
    cache_ttl: Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl StreamingService {
    #[must_use]
    pub fn new(
        store: Store,
        providers: Arc<ProviderSet>,
        resolvers: Arc<ResolverSet>,
        proxy_base: String,
        worker_base: String,
        salt: String,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            store,
            providers,
            resolvers,
            http: Client::new(),
            proxy_base: proxy_base.trim_end_matches('/').to_string(),
            worker_base: worker_base.trim_end_matches('/').to_string(),
            salt,
            cache_ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn proxy_url(&self, target: &str) -> String {
        format!(
            "{}/proxy?url={}",
            self.proxy_base,
            urlencoding::encode(target)
        )
    }

    /// Salt-gated cache invalidation so freshly archived URLs show up
    /// without waiting out the TTL.
    pub async fn invalidate(&self, mal_id: i32, episode: i32, secret: &str) -> bool {
        if secret != self.salt {
            return false;
        }
        let key = format!("{mal_id}:{episode}");
        self.cache.lock().await.remove(&key).is_some()
    }

    pub async fn get_streaming(
        &self,
        mapping: &mapping::Model,
        episode: i32,
    ) -> HashMap<String, Option<Vec<StreamingServer>>> {
        let scraped = self.scraped_servers(mapping, episode).await;

        let mut enriched: HashMap<String, Option<Vec<StreamingServer>>> = HashMap::new();
        for (kind, servers) in scraped {
            let value = match servers {
                None => None,
                Some(list) => {
                    let mut out = Vec::with_capacity(list.len());
                    for server in list {
                        out.push(self.enrich(mapping.mal_id, episode, kind, server).await);
                    }
                    Some(out)
                }
            };
            enriched.insert(kind.as_str().to_string(), value);
        }

        enriched
    }

    /// Per-episode scrape with the TTL cache. Strictly-less-than-TTL
    /// elapsed counts as a hit.
    async fn scraped_servers(
        &self,
        mapping: &mapping::Model,
        episode: i32,
    ) -> HashMap<ProviderKind, Option<Vec<ScrapedServer>>> {
        let key = format!("{}:{episode}", mapping.mal_id);

        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&key) {
                if entry.inserted_at.elapsed() < self.cache_ttl {
                    debug!(key = %key, "scrape cache hit");
                    return entry.servers.clone();
                }
            }
        }

        let mut servers: HashMap<ProviderKind, Option<Vec<ScrapedServer>>> = HashMap::new();

        let futures: Vec<_> = self
            .providers
            .iter()
            .map(|provider| {
                let kind = provider.kind();
                let slug = match kind {
                    ProviderKind::Animasu => mapping.slug_animasu.clone(),
                    ProviderKind::Samehadaku => mapping.slug_samehadaku.clone(),
                };
                let provider = provider.clone();
                async move {
                    let Some(slug) = slug else {
                        return (kind, None);
                    };
                    match provider.streaming_servers(&slug, episode).await {
                        Ok(embeds) => {
                            let resolutions =
                                futures::future::join_all(embeds.iter().map(|embed| {
                                    let resolvers = self.resolvers.clone();
                                    let url = embed.embed_url.clone();
                                    async move { resolvers.resolve(&url).await }
                                }))
                                .await;

                            let list = embeds
                                .into_iter()
                                .zip(resolutions)
                                .map(|(embed, resolved_url)| ScrapedServer {
                                    label: embed.label,
                                    embed_url: embed.embed_url,
                                    resolved_url,
                                    resolution: embed.resolution,
                                })
                                .collect();
                            (kind, Some(list))
                        }
                        Err(e) => {
                            warn!(provider = %kind, episode, error = %e, "episode scrape failed");
                            (kind, None)
                        }
                    }
                }
            })
            .collect();

        for (kind, list) in futures::future::join_all(futures).await {
            servers.insert(kind, list);
        }

        let mut cache = self.cache.lock().await;
        cache.insert(
            key,
            CacheEntry {
                servers: servers.clone(),
                inserted_at: Instant::now(),
            },
        );

        servers
    }

    /// The store check that runs on every request: archived entries swap in
    /// the durable URL; everything else gets enqueued exactly once.
    async fn enrich(
        &self,
        mal_id: i32,
        episode: i32,
        kind: ProviderKind,
        server: ScrapedServer,
    ) -> StreamingServer {
        let provider = kind.as_str();
        let resolution = server.resolution.as_deref();

        let archived = self
            .store
            .get_archived(mal_id, episode, provider, resolution)
            .await
            .unwrap_or(None);

        if let Some(entry) = archived {
            let stream = self.proxy_url(&entry.direct_url);
            return StreamingServer {
                provider: server.label,
                url: server.embed_url,
                url_resolved: Some(entry.direct_url),
                resolution: server.resolution,
                stream: Some(stream),
            };
        }

        let stream = server.resolved_url.as_deref().map(|u| self.proxy_url(u));

        // Hosts with network-bound tokens or fragment-carried keys are
        // archived from the embed URL; the worker re-resolves on its own
        // network. Everything else archives the resolved URL directly.
        let download_url = if requires_embed_archival(&server.embed_url) {
            Some(server.embed_url.clone())
        } else {
            server.resolved_url.clone()
        };

        if let Some(download_url) = download_url {
            let in_progress = self
                .store
                .queue_entry_in_progress(mal_id, episode, provider, resolution)
                .await
                .unwrap_or(false);

            if !in_progress {
                match self
                    .store
                    .enqueue_video(mal_id, episode, provider, &download_url, resolution)
                    .await
                {
                    Ok(_) => {
                        info!(mal_id, episode, provider, "queued for archival");
                        self.fire_webhook(mal_id, episode, provider, &download_url, resolution);
                    }
                    Err(e) => warn!(mal_id, episode, provider, error = %e, "enqueue failed"),
                }
            }
        }

        StreamingServer {
            provider: server.label,
            url: server.embed_url,
            url_resolved: server.resolved_url,
            resolution: server.resolution,
            stream,
        }
    }

    /// Fire-and-forget worker nudge. The scheduled poller is the durable
    /// path; this only shortens the cold-start latency.
    fn fire_webhook(
        &self,
        mal_id: i32,
        episode: i32,
        provider: &str,
        video_url: &str,
        resolution: Option<&str>,
    ) {
        let url = format!("{}/trigger", self.worker_base);
        let body = serde_json::json!({
            "mal_id": mal_id,
            "episode": episode,
            "provider": provider,
            "video_url": video_url,
            "resolution": resolution,
        });
        let client = self.http.clone();
        let salt = self.salt.clone();

        tokio::spawn(async move {
            let result = client
                .post(&url)
                .bearer_auth(salt)
                .timeout(WEBHOOK_TIMEOUT)
                .json(&body)
                .send()
                .await;
            if let Err(e) = result {
                debug!(url = %url, error = %e, "archival webhook not delivered");
            }
        });
    }
}
