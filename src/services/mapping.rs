//! Cross-provider mapping discovery.
//!
//! A lookup that misses the store runs the full pipeline: scrape the source
//! detail page, hash the poster, try a visual match against known hashes,
//! fall back to MAL fuzzy search, then hunt for the same show on every
//! other provider. Concurrent lookups for the same key are coalesced onto
//! a single in-flight discovery.

use anyhow::Result;
use regex::Regex;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use crate::clients::jikan::{JikanClient, MalCandidate, ScrapedFacts, validate_metadata};
use crate::config::MatchingConfig;
use crate::db::{MappingPatch, Store};
use crate::entities::mapping;
use crate::matching::phash::{hamming, phash};
use crate::matching::title::{
    canonical_slug, clean_title, normalise_season, similarity, slug_prefix_match,
};
use crate::providers::{Provider, ProviderKind, ProviderSet};

/// Slug fragments that separate a light-novel-style main title from its
/// subtitle; direct-slug derivation cuts at the first of these.
const SLUG_SEPARATORS: [&str; 6] = ["-to-", "-no-", "-ga-", "-de-", "-ni-", "-wo-"];

#[derive(Debug, Clone)]
pub struct Resolved {
    pub mapping: mapping::Model,
    pub cached: bool,
}

#[derive(Debug, Clone)]
struct Discovery {
    slug: String,
    phash: Option<String>,
}

fn season_number_regex() -> Option<&'static Regex> {
    static INSTANCE: OnceLock<Option<Regex>> = OnceLock::new();
    INSTANCE
        .get_or_init(|| Regex::new(r"\bpart (\d+)\b").ok())
        .as_ref()
}

/// Season ordinal carried by a title, via the canonical `part N` form.
fn season_number(title: &str) -> Option<i32> {
    let normalised = normalise_season(title);
    season_number_regex()?
        .captures(&normalised)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

pub struct MappingService {
    store: Store,
    jikan: Arc<JikanClient>,
    providers: Arc<ProviderSet>,
    http: Client,
    matching: MatchingConfig,
    /// In-flight discoveries keyed by `provider:slug` or `mal:<id>`.
    /// Insert-before-start, remove-on-finish; late subscribers share the
    /// one result.
    inflight: Mutex<HashMap<String, broadcast::Sender<Option<mapping::Model>>>>,
}

impl MappingService {
    #[must_use]
    pub fn new(
        store: Store,
        jikan: Arc<JikanClient>,
        providers: Arc<ProviderSet>,
        matching: MatchingConfig,
    ) -> Self {
        Self {
            store,
            jikan,
            providers,
            http: Client::new(),
            matching,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn resolve_by_slug(
        &self,
        provider: ProviderKind,
        slug: &str,
    ) -> Result<Option<Resolved>> {
        if let Some(existing) = self.store.get_mapping_by_slug(provider, slug).await? {
            return Ok(Some(Resolved {
                mapping: existing,
                cached: true,
            }));
        }

        let key = format!("{provider}:{slug}");
        let mapping = self
            .coalesced(&key, self.discover_from_slug(provider, slug))
            .await;

        Ok(mapping.map(|m| Resolved {
            mapping: m,
            cached: false,
        }))
    }

    pub async fn resolve_by_mal_id(&self, mal_id: i32) -> Result<Option<Resolved>> {
        if let Some(existing) = self.store.get_mapping(mal_id).await? {
            return Ok(Some(Resolved {
                mapping: existing,
                cached: true,
            }));
        }

        let key = format!("mal:{mal_id}");
        let mapping = self
            .coalesced(&key, self.discover_from_mal_id(mal_id))
            .await;

        Ok(mapping.map(|m| Resolved {
            mapping: m,
            cached: false,
        }))
    }

    /// Collapse duplicate concurrent discoveries for one key into a single
    /// run; everyone else awaits the broadcast result.
    async fn coalesced<F>(&self, key: &str, work: F) -> Option<mapping::Model>
    where
        F: std::future::Future<Output = Result<Option<mapping::Model>>>,
    {
        let mut receiver = {
            let mut inflight = self.inflight.lock().await;
            match inflight.get(key) {
                Some(sender) => Some(sender.subscribe()),
                None => {
                    let (sender, _) = broadcast::channel(1);
                    inflight.insert(key.to_string(), sender);
                    None
                }
            }
        };

        if let Some(receiver) = receiver.as_mut() {
            return receiver.recv().await.ok().flatten();
        }

        let outcome = match work.await {
            Ok(found) => found,
            Err(e) => {
                warn!(key = %key, error = %e, "discovery failed");
                None
            }
        };

        let mut inflight = self.inflight.lock().await;
        if let Some(sender) = inflight.remove(key) {
            let _ = sender.send(outcome.clone());
        }

        outcome
    }

    async fn discover_from_slug(
        &self,
        provider: ProviderKind,
        slug: &str,
    ) -> Result<Option<mapping::Model>> {
        let source = self
            .providers
            .get(provider)
            .ok_or_else(|| anyhow::anyhow!("provider {provider} is not registered"))?;

        let detail = source.detail(slug).await?;
        info!(provider = %provider, slug = %slug, title = %detail.title, "discovery started");

        let source_phash = if source.is_cover_host(&detail.cover_url) {
            phash(&self.http, &detail.cover_url).await
        } else {
            debug!(cover = %detail.cover_url, "cover not on provider domain, skipping hash");
            None
        };

        // Visual match first: a sub-threshold Hamming hit confirms the MAL
        // id without spending a Jikan search.
        let mut candidate: Option<MalCandidate> = None;
        let mut mal_id = None;
        if let Some(ref hash) = source_phash {
            if let Some((row, _)) = self
                .store
                .find_mapping_by_phash(hash, self.matching.phash_threshold)
                .await
                .unwrap_or(None)
            {
                let verified = row
                    .phash_v1
                    .as_deref()
                    .map(|stored| hamming(hash, stored))
                    .is_some_and(|d| d >= 0 && d < self.matching.phash_threshold);
                if verified {
                    info!(mal_id = row.mal_id, "visual match confirmed");
                    mal_id = Some(row.mal_id);
                    candidate = self.jikan.get_full_by_id(row.mal_id).await;
                }
            }
        }

        if mal_id.is_none() {
            let facts = ScrapedFacts {
                year: detail.year,
                total_episodes: detail.total_episodes,
            };
            let accepted = match self
                .jikan
                .search_by_title(&clean_title(&detail.title), detail.year)
                .await
            {
                Some((found, _score)) => {
                    // Known scraped year demands both gates; otherwise the
                    // title gate alone carried the search.
                    if detail.year.is_some() {
                        validate_metadata(&found, facts, self.matching.episode_tolerance)
                            .then_some(found)
                    } else {
                        Some(found)
                    }
                }
                None => None,
            };

            match accepted {
                Some(found) => {
                    mal_id = Some(found.mal_id);
                    candidate = self.jikan.get_full_by_id(found.mal_id).await.or(Some(found));
                }
                None => {
                    info!(slug = %slug, "no MAL candidate accepted");
                    return Ok(None);
                }
            }
        }

        let Some(mal_id) = mal_id else {
            return Ok(None);
        };
        let Some(candidate) = candidate else {
            // Visual match hit but Jikan is unreachable: persist the slug
            // onto the confirmed id anyway.
            let patch = self.base_patch(mal_id, None, provider, slug, &source_phash);
            return Ok(Some(self.store.upsert_mapping(patch).await?));
        };

        self.store
            .upsert_mal_metadata(candidate.to_metadata_input())
            .await
            .ok();

        // Hunt for the same show everywhere else, threading the first
        // available hash through so later providers can match visually.
        let mut canonical_phash = source_phash.clone();
        let mut cross_slugs: Vec<(ProviderKind, String)> = Vec::new();
        for target in self.providers.iter() {
            if target.kind() == provider {
                continue;
            }
            if let Some(found) = self
                .discover_on(target, &candidate, canonical_phash.as_deref())
                .await
            {
                if canonical_phash.is_none() {
                    canonical_phash = found.phash.clone();
                }
                cross_slugs.push((target.kind(), found.slug));
            }
        }

        let mut patch = self.base_patch(mal_id, Some(&candidate), provider, slug, &canonical_phash);
        patch.release_year = candidate.start_year().or(detail.year);
        patch.total_episodes = candidate.episodes.or(detail.total_episodes);
        for (kind, found_slug) in cross_slugs {
            patch = Self::with_slug(patch, kind, found_slug);
        }

        Ok(Some(self.store.upsert_mapping(patch).await?))
    }

    async fn discover_from_mal_id(&self, mal_id: i32) -> Result<Option<mapping::Model>> {
        let Some(candidate) = self.jikan.get_full_by_id(mal_id).await else {
            return Ok(None);
        };

        self.store
            .upsert_mal_metadata(candidate.to_metadata_input())
            .await
            .ok();

        let mut canonical_phash: Option<String> = None;
        let mut patch = MappingPatch {
            mal_id,
            title_main: Some(candidate.title.clone()),
            release_year: candidate.start_year(),
            total_episodes: candidate.episodes,
            ..Default::default()
        };

        for target in self.providers.iter() {
            if let Some(found) = self
                .discover_on(target, &candidate, canonical_phash.as_deref())
                .await
            {
                if canonical_phash.is_none() {
                    canonical_phash = found.phash.clone();
                }
                patch = Self::with_slug(patch, target.kind(), found.slug);
            }
        }

        patch.phash_v1 = canonical_phash;

        // Even slug-less, the partial mapping caches the Jikan metadata.
        Ok(Some(self.store.upsert_mapping(patch).await?))
    }

    fn base_patch(
        &self,
        mal_id: i32,
        candidate: Option<&MalCandidate>,
        provider: ProviderKind,
        slug: &str,
        hash: &Option<String>,
    ) -> MappingPatch {
        let patch = MappingPatch {
            mal_id,
            title_main: candidate.map(|c| c.title.clone()),
            phash_v1: hash.clone(),
            ..Default::default()
        };
        Self::with_slug(patch, provider, slug.to_string())
    }

    fn with_slug(mut patch: MappingPatch, provider: ProviderKind, slug: String) -> MappingPatch {
        match provider {
            ProviderKind::Animasu => patch.slug_animasu = Some(slug),
            ProviderKind::Samehadaku => patch.slug_samehadaku = Some(slug),
        }
        patch
    }

    /// Title-variant query list: full title, pre-colon prefix, season
    /// suffix stripped, and a first-three-words prefix when long enough.
    fn build_queries(candidate: &MalCandidate) -> Vec<String> {
        let mut queries = Vec::new();
        let mut push = |q: String| {
            let trimmed = q.trim().to_string();
            if !trimmed.is_empty() && !queries.contains(&trimmed) {
                queries.push(trimmed);
            }
        };

        let variants = candidate
            .title_english
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(candidate.title.as_str()))
            .chain(candidate.title_japanese.iter().map(String::as_str));

        for variant in variants {
            let cleaned = clean_title(variant);
            push(cleaned.clone());

            if let Some((prefix, _)) = cleaned.split_once(':') {
                push(prefix.to_string());
            }

            let base = strip_season_suffix(&cleaned);
            push(base);

            let three_words: String = cleaned
                .split_whitespace()
                .take(3)
                .collect::<Vec<_>>()
                .join(" ");
            if three_words.len() >= 8 {
                push(three_words);
            }
        }

        queries
    }

    fn title_gate(&self, candidate: &MalCandidate, other_title: &str) -> bool {
        let reduced_other = normalise_season(&clean_title(other_title));
        candidate.title_variants().iter().any(|variant| {
            let reduced = normalise_season(&clean_title(variant));
            similarity(&reduced, &reduced_other) >= self.matching.similarity_threshold
                || slug_prefix_match(&reduced, &reduced_other, 5)
        })
    }

    /// Cross-provider search for one target. Returns the accepted slug and
    /// any pHash computed on the way.
    async fn discover_on(
        &self,
        target: &Arc<dyn Provider>,
        candidate: &MalCandidate,
        known_phash: Option<&str>,
    ) -> Option<Discovery> {
        let queries = Self::build_queries(candidate);
        let facts_known = |year: Option<i32>, eps: Option<i32>| year.is_some() || eps.is_some();

        for query in &queries {
            let cards = match target.search(query).await {
                Ok(cards) => cards,
                Err(e) => {
                    debug!(provider = %target.kind(), query = %query, error = %e, "search failed");
                    continue;
                }
            };

            let skip_card_filter = target.card_titles_reliable() && cards.len() <= 3;

            for card in cards {
                if !target.as_ref().is_cover_host(&card.cover_url) {
                    continue;
                }

                if !skip_card_filter && !self.title_gate(candidate, &card.title) {
                    continue;
                }

                // Hash path: a visual hit needs no metadata at all.
                if let Some(known) = known_phash {
                    if let Some(card_hash) = phash(&self.http, &card.cover_url).await {
                        let distance = hamming(known, &card_hash);
                        if distance >= 0 && distance < self.matching.phash_threshold {
                            info!(provider = %target.kind(), slug = %card.slug, distance, "visual cross-provider match");
                            return Some(Discovery {
                                slug: card.slug,
                                phash: Some(card_hash),
                            });
                        }
                        continue;
                    }
                }

                // Metadata path.
                let Ok(detail) = target.detail(&card.slug).await else {
                    continue;
                };
                if !target.as_ref().is_cover_host(&detail.cover_url) {
                    continue;
                }
                if !self.title_gate(candidate, &detail.title) {
                    continue;
                }
                if !facts_known(detail.year, detail.total_episodes) {
                    // Nothing to confirm against; cannot accept.
                    continue;
                }
                let facts = ScrapedFacts {
                    year: detail.year,
                    total_episodes: detail.total_episodes,
                };
                if validate_metadata(candidate, facts, self.matching.episode_tolerance) {
                    let found_hash = if known_phash.is_none() {
                        phash(&self.http, &detail.cover_url).await
                    } else {
                        None
                    };
                    return Some(Discovery {
                        slug: card.slug,
                        phash: found_hash,
                    });
                }
            }
        }

        self.discover_by_direct_slug(target, candidate, known_phash)
            .await
    }

    /// Last resort: derive likely slugs straight from the MAL titles and
    /// probe detail pages.
    async fn discover_by_direct_slug(
        &self,
        target: &Arc<dyn Provider>,
        candidate: &MalCandidate,
        known_phash: Option<&str>,
    ) -> Option<Discovery> {
        let season = candidate
            .title_variants()
            .iter()
            .find_map(|t| season_number(t));
        let has_marker = season.is_some();

        let mut slugs: Vec<String> = Vec::new();
        let mut push = |s: String| {
            if !s.is_empty() && !slugs.contains(&s) {
                slugs.push(s);
            }
        };

        for variant in candidate.title_variants() {
            let cleaned = clean_title(variant);
            let full = canonical_slug(&cleaned);
            push(full.clone());

            if let Some((prefix, _)) = cleaned.split_once(':') {
                push(canonical_slug(prefix));
            }

            let base = canonical_slug(&strip_season_suffix(&cleaned));
            push(base.clone());

            for separator in SLUG_SEPARATORS {
                if let Some(index) = full.find(separator) {
                    push(full[..index].to_string());
                }
            }

            if let Some(n) = season.filter(|n| *n >= 2) {
                let ordinal = match n {
                    2 => "2nd".to_string(),
                    3 => "3rd".to_string(),
                    other => format!("{other}th"),
                };
                push(format!("{base}-season-{n}"));
                push(format!("{base}-{ordinal}-season"));
                push(format!("{base}-part-{n}"));
                push(format!("{base}-s{n}"));
            }

            if let Some(year) = candidate.start_year() {
                push(format!("{base}-{year}"));
                push(format!("{full}-{year}"));
            }
        }

        for slug in slugs {
            let Ok(detail) = target.detail(&slug).await else {
                continue;
            };
            if !self.title_gate(candidate, &detail.title) {
                continue;
            }

            let metadata_absent = detail.year.is_none() && detail.total_episodes.is_none();
            if metadata_absent {
                // Title-only acceptance is safe only without a season
                // marker; long-running franchises alias too easily.
                if has_marker {
                    continue;
                }
            } else {
                let facts = ScrapedFacts {
                    year: detail.year,
                    total_episodes: detail.total_episodes,
                };
                if !validate_metadata(candidate, facts, self.matching.episode_tolerance) {
                    continue;
                }
            }

            info!(provider = %target.kind(), slug = %slug, "direct-slug match accepted");
            let found_hash = if known_phash.is_none()
                && target.as_ref().is_cover_host(&detail.cover_url)
            {
                phash(&self.http, &detail.cover_url).await
            } else {
                None
            };
            return Some(Discovery {
                slug,
                phash: found_hash,
            });
        }

        None
    }
}

/// Remove a trailing season/cour/part clause from a cleaned title.
fn strip_season_suffix(title: &str) -> String {
    static INSTANCE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = INSTANCE
        .get_or_init(|| Regex::new(r"(?i)\s*\b(?:season|cour|part|s\d+)\b.*$").ok())
        .as_ref();
    match re {
        Some(re) => re.replace(title, "").trim().to_string(),
        None => title.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate_with_titles(title: &str, english: Option<&str>) -> MalCandidate {
        serde_json::from_value(serde_json::json!({
            "mal_id": 55825,
            "title": title,
            "title_english": english,
        }))
        .unwrap()
    }

    #[test]
    fn test_season_number_extraction() {
        assert_eq!(season_number("Jigokuraku 2nd Season"), Some(2));
        assert_eq!(season_number("Jigokuraku Season 3"), Some(3));
        assert_eq!(season_number("Jigokuraku"), None);
    }

    #[test]
    fn test_build_queries_dedup_and_prefixes() {
        let candidate = candidate_with_titles(
            "Jigokuraku 2nd Season",
            Some("Hell's Paradise: Lost in the Garden"),
        );
        let queries = MappingService::build_queries(&candidate);

        assert!(queries.contains(&"Jigokuraku 2nd Season".to_string()));
        assert!(queries.contains(&"Jigokuraku".to_string()));
        assert!(queries.iter().any(|q| q.starts_with("Hells Paradise")));
        let unique: std::collections::HashSet<_> = queries.iter().collect();
        assert_eq!(unique.len(), queries.len());
    }

    #[test]
    fn test_strip_season_suffix() {
        assert_eq!(strip_season_suffix("Jigokuraku Season 2"), "Jigokuraku");
        assert_eq!(strip_season_suffix("Jigokuraku s2"), "Jigokuraku");
        assert_eq!(strip_season_suffix("Jigokuraku"), "Jigokuraku");
    }
}
