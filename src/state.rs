use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;

use crate::clients::jikan::JikanClient;
use crate::config::Config;
use crate::db::Store;
use crate::providers::ProviderSet;
use crate::resolvers::ResolverSet;
use crate::services::{HomeService, MappingService, StreamingService};

/// Everything the API process shares across requests. Process-wide mutable
/// state (the scrape cache, the resolver lock table, the MAL throttle) is
/// owned by the services and synchronised internally.
#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<Config>,

    pub store: Store,

    pub jikan: Arc<JikanClient>,

    pub providers: Arc<ProviderSet>,

    pub resolvers: Arc<ResolverSet>,

    pub mappings: Arc<MappingService>,

    pub streaming: Arc<StreamingService>,

    pub home: Arc<HomeService>,

    pub prometheus_handle: Option<PrometheusHandle>,
}

impl SharedState {
    pub async fn new(
        config: Config,
        prometheus_handle: Option<PrometheusHandle>,
    ) -> anyhow::Result<Self> {
        let store = Store::new(&config.database.url).await?;

        let jikan = Arc::new(JikanClient::new(
            config.mal.throttle_ms,
            config.matching.similarity_threshold,
        ));

        let providers = Arc::new(ProviderSet::new(Duration::from_secs(
            config.scrape.request_timeout_seconds,
        )));

        let resolvers = Arc::new(ResolverSet::new(Duration::from_secs(
            config.scrape.resolver_timeout_seconds,
        )));

        let mappings = Arc::new(MappingService::new(
            store.clone(),
            jikan.clone(),
            providers.clone(),
            config.matching.clone(),
        ));

        let streaming = Arc::new(StreamingService::new(
            store.clone(),
            providers.clone(),
            resolvers.clone(),
            config.proxy.base_url.clone(),
            config.archival.worker_base_url.clone(),
            config.archival.salt.clone(),
            Duration::from_secs(config.scrape.cache_ttl_minutes * 60),
        ));

        let home = Arc::new(HomeService::new(providers.clone(), jikan.clone()));

        Ok(Self {
            config: Arc::new(config),
            store,
            jikan,
            providers,
            resolvers,
            mappings,
            streaming,
            home,
            prometheus_handle,
        })
    }
}
