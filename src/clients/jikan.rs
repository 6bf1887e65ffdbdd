//! Throttled Jikan (MyAnimeList) client with fuzzy candidate picking.

use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

use crate::db::MalMetadataInput;
use crate::matching::title::{clean_title, normalise_season, similarity, slug_prefix_match};

const JIKAN_API: &str = "https://api.jikan.moe/v4";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const SEARCH_LIMIT: u32 = 5;

/// Similarity floor applied when a slug prefix relation holds.
const PREFIX_SCORE_FLOOR: f64 = 0.92;

#[derive(Debug, Deserialize)]
struct JikanResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct JikanPagination {
    has_next_page: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MalCandidate {
    pub mal_id: i32,
    pub title: String,
    pub title_english: Option<String>,
    pub title_japanese: Option<String>,
    pub episodes: Option<i32>,
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub anime_type: Option<String>,
    pub score: Option<f64>,
    pub rank: Option<i32>,
    pub synopsis: Option<String>,
    pub duration: Option<String>,
    pub season: Option<String>,
    pub year: Option<i32>,
    pub aired: Option<Aired>,
    pub images: Option<MalImages>,
    pub genres: Option<Vec<MalGenericInfo>>,
    pub studios: Option<Vec<MalGenericInfo>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Aired {
    pub prop: Option<AiredProp>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiredProp {
    pub from: Option<AiredDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiredDate {
    pub year: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MalImages {
    pub jpg: Option<MalImageSet>,
    pub webp: Option<MalImageSet>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MalImageSet {
    pub image_url: Option<String>,
    pub large_image_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MalGenericInfo {
    pub mal_id: i32,
    pub name: String,
}

impl MalCandidate {
    /// Release year, falling back to the aired-from date when the `year`
    /// field is absent (Jikan omits it for many older entries).
    #[must_use]
    pub fn start_year(&self) -> Option<i32> {
        if let Some(year) = self.year {
            return Some(year);
        }

        self.aired
            .as_ref()
            .and_then(|a| a.prop.as_ref())
            .and_then(|p| p.from.as_ref())
            .and_then(|f| f.year)
    }

    #[must_use]
    pub fn cover_url(&self) -> Option<String> {
        let images = self.images.as_ref()?;
        images
            .jpg
            .as_ref()
            .and_then(|set| set.large_image_url.clone().or_else(|| set.image_url.clone()))
    }

    /// Title variants in matching priority order, skipping absent scripts.
    #[must_use]
    pub fn title_variants(&self) -> Vec<&str> {
        let mut variants = vec![self.title.as_str()];
        if let Some(ref english) = self.title_english {
            variants.push(english.as_str());
        }
        if let Some(ref japanese) = self.title_japanese {
            variants.push(japanese.as_str());
        }
        variants
    }

    #[must_use]
    pub fn to_metadata_input(&self) -> MalMetadataInput {
        MalMetadataInput {
            mal_id: self.mal_id,
            title: self.title.clone(),
            title_english: self.title_english.clone(),
            title_japanese: self.title_japanese.clone(),
            synopsis: self.synopsis.clone(),
            anime_type: self.anime_type.clone(),
            episodes: self.episodes,
            status: self.status.clone(),
            duration: self.duration.clone(),
            score: self.score,
            rank: self.rank,
            year: self.start_year(),
            season: self.season.clone(),
            genres: self
                .genres
                .as_ref()
                .map(|g| g.iter().map(|i| i.name.clone()).collect())
                .unwrap_or_default(),
            studios: self
                .studios
                .as_ref()
                .map(|s| s.iter().map(|i| i.name.clone()).collect())
                .unwrap_or_default(),
            image_url: self
                .images
                .as_ref()
                .and_then(|i| i.jpg.as_ref())
                .and_then(|set| set.large_image_url.clone().or_else(|| set.image_url.clone())),
            image_webp_url: self
                .images
                .as_ref()
                .and_then(|i| i.webp.as_ref())
                .and_then(|set| set.image_url.clone()),
        }
    }
}

/// Provider-side metadata carried into a validation check.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScrapedFacts {
    pub year: Option<i32>,
    pub total_episodes: Option<i32>,
}

/// Year within 1 and episode count within `ep_tolerance`, each gate only
/// applying when both sides know the value. Unknown fields pass.
#[must_use]
pub fn validate_metadata(
    candidate: &MalCandidate,
    scraped: ScrapedFacts,
    ep_tolerance: i32,
) -> bool {
    if let (Some(mal_year), Some(scraped_year)) = (candidate.start_year(), scraped.year) {
        if (mal_year - scraped_year).abs() > 1 {
            return false;
        }
    }

    if let (Some(mal_eps), Some(scraped_eps)) = (candidate.episodes, scraped.total_episodes) {
        if (mal_eps - scraped_eps).abs() > ep_tolerance {
            return false;
        }
    }

    true
}

fn season_clause_regex() -> Option<&'static Regex> {
    static INSTANCE: OnceLock<Option<Regex>> = OnceLock::new();
    INSTANCE
        .get_or_init(|| Regex::new(r"(?i)\s*\b(?:season|cour|part|s\d+)\b.*$").ok())
        .as_ref()
}

pub struct JikanClient {
    client: Client,
    /// Single-slot throttle: earliest instant the next request may start.
    gate: Mutex<Instant>,
    min_gap: Duration,
    similarity_threshold: f64,
}

impl JikanClient {
    #[must_use]
    pub fn new(min_gap_ms: u64, similarity_threshold: f64) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            gate: Mutex::new(Instant::now()),
            min_gap: Duration::from_millis(min_gap_ms),
            similarity_threshold,
        }
    }

    /// Serialise all callers on the minimum inter-request gap. The gate
    /// advances whether or not the request that follows succeeds.
    async fn throttle(&self) {
        let mut next_allowed = self.gate.lock().await;
        let now = Instant::now();
        if *next_allowed > now {
            tokio::time::sleep(*next_allowed - now).await;
        }
        *next_allowed = Instant::now() + self.min_gap;
    }

    async fn fetch<T: serde::de::DeserializeOwned>(&self, url: &str) -> Option<T> {
        self.throttle().await;

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %url, error = %e, "Jikan request failed");
                return None;
            }
        };

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return None;
        }

        if !response.status().is_success() {
            warn!(url = %url, status = %response.status(), "Jikan returned an error status");
            return None;
        }

        match response.json::<JikanResponse<T>>().await {
            Ok(envelope) => Some(envelope.data),
            Err(e) => {
                warn!(url = %url, error = %e, "Jikan response did not parse");
                None
            }
        }
    }

    pub async fn get_by_id(&self, mal_id: i32) -> Option<MalCandidate> {
        self.fetch(&format!("{JIKAN_API}/anime/{mal_id}")).await
    }

    pub async fn get_full_by_id(&self, mal_id: i32) -> Option<MalCandidate> {
        self.fetch(&format!("{JIKAN_API}/anime/{mal_id}/full")).await
    }

    async fn search_page(&self, query: &str) -> Vec<MalCandidate> {
        let url = format!(
            "{JIKAN_API}/anime?q={}&limit={SEARCH_LIMIT}",
            urlencoding::encode(query)
        );
        self.fetch::<Vec<MalCandidate>>(&url)
            .await
            .unwrap_or_default()
    }

    /// Genre listing used by the browse endpoint. Returns the page plus
    /// Jikan's own has-next-page flag.
    pub async fn search_by_genre(
        &self,
        genre_id: i32,
        page: u32,
        per_page: u32,
    ) -> Option<(Vec<MalCandidate>, bool)> {
        #[derive(Deserialize)]
        struct Page {
            data: Vec<MalCandidate>,
            pagination: Option<JikanPagination>,
        }

        self.throttle().await;
        let url = format!(
            "{JIKAN_API}/anime?genres={genre_id}&page={page}&limit={per_page}&order_by=members&sort=desc"
        );

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %url, error = %e, "Jikan request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(url = %url, status = %response.status(), "Jikan returned an error status");
            return None;
        }

        match response.json::<Page>().await {
            Ok(page) => {
                let has_next = page.pagination.map(|p| p.has_next_page).unwrap_or(false);
                Some((page.data, has_next))
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Jikan response did not parse");
                None
            }
        }
    }

    /// Multi-query fuzzy search. Queries tried in order: the cleaned raw
    /// title, the raw with its season clause removed, and the
    /// season-normalised form. Best candidate wins by max title-variant
    /// similarity, ties broken toward a year match when the scraped year is
    /// known.
    pub async fn search_by_title(
        &self,
        raw: &str,
        scraped_year: Option<i32>,
    ) -> Option<(MalCandidate, f64)> {
        let cleaned = clean_title(raw);
        let mut queries = vec![cleaned.clone()];
        if let Some(re) = season_clause_regex() {
            let stripped = re.replace(&cleaned, "").trim().to_string();
            if !stripped.is_empty() {
                queries.push(stripped);
            }
        }
        queries.push(normalise_season(&cleaned));
        queries.dedup();

        let year_matches = |candidate: &MalCandidate| {
            matches!(
                (candidate.start_year(), scraped_year),
                (Some(c), Some(s)) if (c - s).abs() <= 1
            )
        };

        let reduced_raw = normalise_season(&cleaned);
        let mut best: Option<(MalCandidate, f64)> = None;

        'outer: for query in &queries {
            for candidate in self.search_page(query).await {
                let mut score = 0.0f64;
                for variant in candidate.title_variants() {
                    let mut s = similarity(&reduced_raw, &normalise_season(variant));
                    if slug_prefix_match(query, variant, 5) {
                        s = s.max(PREFIX_SCORE_FLOOR);
                    }
                    score = score.max(s);
                }

                let replace = match &best {
                    None => true,
                    Some((current, current_score)) => {
                        score > *current_score
                            || ((score - current_score).abs() < f64::EPSILON
                                && year_matches(&candidate)
                                && !year_matches(current))
                    }
                };
                if replace {
                    best = Some((candidate, score));
                }

                if let Some((picked, best_score)) = &best {
                    if *best_score >= self.similarity_threshold
                        && (scraped_year.is_none() || year_matches(picked))
                    {
                        break 'outer;
                    }
                }
            }
        }

        match best {
            Some((candidate, score)) if score >= self.similarity_threshold => {
                Some((candidate, score))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(year: Option<i32>, episodes: Option<i32>) -> MalCandidate {
        MalCandidate {
            mal_id: 1,
            title: "Test".to_string(),
            title_english: None,
            title_japanese: None,
            episodes,
            status: None,
            anime_type: None,
            score: None,
            rank: None,
            synopsis: None,
            duration: None,
            season: None,
            year,
            aired: None,
            images: None,
            genres: None,
            studios: None,
        }
    }

    #[test]
    fn test_validate_metadata_year_gate() {
        let c = candidate(Some(2023), None);
        let pass = ScrapedFacts {
            year: Some(2024),
            total_episodes: None,
        };
        let fail = ScrapedFacts {
            year: Some(2021),
            total_episodes: None,
        };
        assert!(validate_metadata(&c, pass, 2));
        assert!(!validate_metadata(&c, fail, 2));
    }

    #[test]
    fn test_validate_metadata_episode_tolerance() {
        let c = candidate(None, Some(12));
        let pass = ScrapedFacts {
            year: None,
            total_episodes: Some(14),
        };
        let fail = ScrapedFacts {
            year: None,
            total_episodes: Some(16),
        };
        assert!(validate_metadata(&c, pass, 2));
        assert!(!validate_metadata(&c, fail, 2));
    }

    #[test]
    fn test_validate_metadata_unknown_fields_pass() {
        let c = candidate(None, None);
        let scraped = ScrapedFacts {
            year: Some(1999),
            total_episodes: Some(500),
        };
        assert!(validate_metadata(&c, scraped, 2));
    }

    #[test]
    fn test_season_clause_stripping() {
        let re = season_clause_regex().unwrap();
        assert_eq!(re.replace("Jigokuraku Season 2", "").trim(), "Jigokuraku");
        assert_eq!(re.replace("Jigokuraku s2", "").trim(), "Jigokuraku");
        assert_eq!(re.replace("Jigokuraku", "").trim(), "Jigokuraku");
    }
}
