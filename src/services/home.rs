//! Home-page aggregation and MAL genre browsing.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::clients::jikan::JikanClient;
use crate::matching::title::{clean_title, normalise_season};
use crate::providers::ProviderSet;

/// MAL genre ids for the names clients are allowed to browse by. A closed
/// list; numeric input is passed through as-is.
const GENRES: [(&str, i32); 14] = [
    ("action", 1),
    ("adventure", 2),
    ("comedy", 4),
    ("drama", 8),
    ("fantasy", 10),
    ("horror", 14),
    ("mystery", 7),
    ("romance", 22),
    ("sci-fi", 24),
    ("slice of life", 36),
    ("sports", 30),
    ("supernatural", 37),
    ("suspense", 41),
    ("ecchi", 9),
];

pub const GENRE_PAGE_SIZE: usize = 10;

/// One deduplicated home entry merged across providers.
#[derive(Debug, Clone, Serialize)]
pub struct HomeItem {
    pub name: String,
    pub cover: String,
    pub slugs: Vec<String>,
    pub provider: String,
    pub sources: Vec<String>,
    #[serde(rename = "providerSlugs")]
    pub provider_slugs: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenreItem {
    pub mal_id: i32,
    pub name: String,
    pub cover: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GenrePage {
    pub genre_id: i32,
    pub page: u32,
    pub has_next_page: bool,
    pub items: Vec<GenreItem>,
}

pub struct HomeService {
    providers: Arc<ProviderSet>,
    jikan: Arc<JikanClient>,
}

impl HomeService {
    #[must_use]
    pub const fn new(providers: Arc<ProviderSet>, jikan: Arc<JikanClient>) -> Self {
        Self { providers, jikan }
    }

    #[must_use]
    pub fn genre_id(genre: &str) -> Option<i32> {
        if let Ok(id) = genre.parse::<i32>() {
            return (id > 0).then_some(id);
        }
        let lowered = genre.to_lowercase();
        GENRES
            .iter()
            .find(|(name, _)| *name == lowered)
            .map(|(_, id)| *id)
    }

    /// Scrape every provider's front page in parallel and merge cards that
    /// are the same show under different slugs/titles.
    pub async fn home(&self) -> Vec<HomeItem> {
        let futures: Vec<_> = self
            .providers
            .iter()
            .map(|provider| {
                let provider = provider.clone();
                async move {
                    let kind = provider.kind();
                    match provider.home_cards().await {
                        Ok(cards) => (kind, cards),
                        Err(e) => {
                            warn!(provider = %kind, error = %e, "home scrape failed");
                            (kind, Vec::new())
                        }
                    }
                }
            })
            .collect();

        let mut merged: Vec<HomeItem> = Vec::new();
        let mut index_by_key: HashMap<String, usize> = HashMap::new();

        for (kind, cards) in futures::future::join_all(futures).await {
            let provider_name = kind.as_str().to_string();
            for card in cards {
                let key = normalise_season(&clean_title(&card.title));
                match index_by_key.get(&key) {
                    Some(&i) => {
                        let item = &mut merged[i];
                        if !item.sources.contains(&provider_name) {
                            item.sources.push(provider_name.clone());
                        }
                        if !item.slugs.contains(&card.slug) {
                            item.slugs.push(card.slug.clone());
                        }
                        item.provider_slugs
                            .entry(provider_name.clone())
                            .or_insert(card.slug);
                    }
                    None => {
                        index_by_key.insert(key, merged.len());
                        merged.push(HomeItem {
                            name: card.title,
                            cover: card.cover_url,
                            slugs: vec![card.slug.clone()],
                            provider: provider_name.clone(),
                            sources: vec![provider_name.clone()],
                            provider_slugs: HashMap::from([(
                                provider_name.clone(),
                                card.slug,
                            )]),
                        });
                    }
                }
            }
        }

        merged
    }

    pub async fn browse_genre(&self, genre_id: i32, page: u32) -> Option<GenrePage> {
        let (candidates, has_next_page) = self
            .jikan
            .search_by_genre(genre_id, page, GENRE_PAGE_SIZE as u32)
            .await?;

        let items = candidates
            .into_iter()
            .take(GENRE_PAGE_SIZE)
            .map(|c| GenreItem {
                mal_id: c.mal_id,
                cover: c.cover_url(),
                name: c.title,
            })
            .collect();

        Some(GenrePage {
            genre_id,
            page,
            has_next_page,
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genre_id_lookup() {
        assert_eq!(HomeService::genre_id("action"), Some(1));
        assert_eq!(HomeService::genre_id("Sci-Fi"), Some(24));
        assert_eq!(HomeService::genre_id("41"), Some(41));
        assert_eq!(HomeService::genre_id("unknown-genre"), None);
        assert_eq!(HomeService::genre_id("-3"), None);
    }
}
