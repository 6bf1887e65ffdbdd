use weaboo::db::{MappingPatch, Store};
use weaboo::providers::ProviderKind;

async fn memory_store() -> Store {
    Store::with_pool_options("sqlite::memory:", 1, 1)
        .await
        .expect("Failed to create in-memory store")
}

#[tokio::test]
async fn test_upsert_coalesces_fields() {
    let store = memory_store().await;

    store
        .upsert_mapping(MappingPatch {
            mal_id: 55825,
            title_main: Some("Jigokuraku 2nd Season".to_string()),
            slug_animasu: Some("jigokuraku-s2".to_string()),
            phash_v1: Some("a".repeat(64)),
            ..Default::default()
        })
        .await
        .unwrap();

    // A later partial write must not erase the earlier slug or hash.
    let updated = store
        .upsert_mapping(MappingPatch {
            mal_id: 55825,
            slug_samehadaku: Some("jigokuraku-season-2".to_string()),
            release_year: Some(2026),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(updated.slug_animasu.as_deref(), Some("jigokuraku-s2"));
    assert_eq!(
        updated.slug_samehadaku.as_deref(),
        Some("jigokuraku-season-2")
    );
    assert_eq!(updated.phash_v1.as_deref(), Some("a".repeat(64).as_str()));
    assert_eq!(updated.release_year, Some(2026));
    assert_eq!(updated.title_main, "Jigokuraku 2nd Season");
}

#[tokio::test]
async fn test_lookup_by_slug_per_provider() {
    let store = memory_store().await;

    store
        .upsert_mapping(MappingPatch {
            mal_id: 55825,
            title_main: Some("Jigokuraku 2nd Season".to_string()),
            slug_animasu: Some("jigokuraku-s2".to_string()),
            slug_samehadaku: Some("jigokuraku-season-2".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    let by_animasu = store
        .get_mapping_by_slug(ProviderKind::Animasu, "jigokuraku-s2")
        .await
        .unwrap();
    assert_eq!(by_animasu.map(|m| m.mal_id), Some(55825));

    let wrong_column = store
        .get_mapping_by_slug(ProviderKind::Samehadaku, "jigokuraku-s2")
        .await
        .unwrap();
    assert!(wrong_column.is_none());
}

#[tokio::test]
async fn test_find_by_phash_nearest_under_threshold() {
    let store = memory_store().await;

    let exact = "0".repeat(64);
    // One hex digit flipped to 0x3: two bits away from the exact hash.
    let near = format!("3{}", "0".repeat(63));
    // 0xf in every nibble: 256 bits away.
    let far = "f".repeat(64);

    store
        .upsert_mapping(MappingPatch {
            mal_id: 1,
            title_main: Some("Near".to_string()),
            phash_v1: Some(near),
            ..Default::default()
        })
        .await
        .unwrap();
    store
        .upsert_mapping(MappingPatch {
            mal_id: 2,
            title_main: Some("Far".to_string()),
            phash_v1: Some(far),
            ..Default::default()
        })
        .await
        .unwrap();

    let hit = store.find_mapping_by_phash(&exact, 5).await.unwrap();
    let (row, distance) = hit.expect("near row should match");
    assert_eq!(row.mal_id, 1);
    assert_eq!(distance, 2);

    // Threshold is strict: distance 2 needs threshold > 2.
    let miss = store.find_mapping_by_phash(&exact, 2).await.unwrap();
    assert!(miss.is_none());
}

#[tokio::test]
async fn test_mal_metadata_upsert_overwrites() {
    let store = memory_store().await;

    let input = |title: &str| weaboo::db::MalMetadataInput {
        mal_id: 55825,
        title: title.to_string(),
        title_english: None,
        title_japanese: None,
        synopsis: None,
        anime_type: Some("TV".to_string()),
        episodes: Some(13),
        status: None,
        duration: None,
        score: Some(8.2),
        rank: None,
        year: Some(2026),
        season: None,
        genres: vec!["Action".to_string(), "Fantasy".to_string()],
        studios: vec!["MAPPA".to_string()],
        image_url: None,
        image_webp_url: None,
    };

    store.upsert_mal_metadata(input("Old Title")).await.unwrap();
    store.upsert_mal_metadata(input("New Title")).await.unwrap();

    let row = store.get_mal_metadata(55825).await.unwrap().unwrap();
    assert_eq!(row.title, "New Title");
    assert_eq!(row.genres.as_deref(), Some("Action, Fantasy"));
}
