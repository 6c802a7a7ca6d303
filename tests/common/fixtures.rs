//! Test data fixtures
//!
//! Creates temporary SQLite databases pre-populated with a small catalog
//! and a couple of registered users.

use super::constants::*;
use anyhow::Result;
use mixtape_server::catalog_store::{CatalogStore, SongFields, SqliteCatalogStore};
use mixtape_server::user::{SqliteUserStore, UserManager};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

fn song_fields(title: &str, url: &str) -> SongFields {
    SongFields {
        title: title.to_string(),
        duration: 180,
        url: url.to_string(),
        source: "youtube".to_string(),
        source_id: format!("src-{}", title.len()),
        thumbnail: Some(format!("{}/thumb.jpg", url)),
    }
}

/// Creates a temporary catalog database with one country, artist, genre and
/// album, two album songs and one standalone song. See `constants` for the
/// resulting ids.
pub fn create_test_catalog() -> Result<(TempDir, PathBuf)> {
    let dir = TempDir::new()?;
    let path = dir.path().join("catalog.db");
    let store = SqliteCatalogStore::new(&path)?;

    store.create_country("Sweden")?;
    store.create_artist("The Test Band", COUNTRY_1_ID)?;
    store.create_genre("Pop")?;
    store.create_album(
        "First Album",
        Some("2021-03-01"),
        &[ARTIST_1_ID],
        &[GENRE_1_ID],
    )?;
    store.create_song(
        &song_fields("Opening Track", "http://music.test/songs/1"),
        Some(ALBUM_1_ID),
        &[GENRE_1_ID],
    )?;
    store.create_song(
        &song_fields("Closing Track", "http://music.test/songs/2"),
        Some(ALBUM_1_ID),
        &[],
    )?;
    store.create_song(
        &song_fields("Loose Single", "http://music.test/songs/3"),
        None,
        &[],
    )?;

    Ok((dir, path))
}

/// Creates a temporary user database with `TEST_USER` and `OTHER_USER`
/// registered through the manager, so their passwords are properly hashed
/// and both start on a fresh trial.
pub fn create_test_db_with_users(
    catalog_store: Arc<dyn CatalogStore>,
) -> Result<(TempDir, PathBuf)> {
    let dir = TempDir::new()?;
    let path = dir.path().join("user.db");
    let user_store = Arc::new(SqliteUserStore::new(&path)?);
    let manager = UserManager::new(user_store, catalog_store);

    manager
        .register(TEST_USER, TEST_PASS, "Testy", "McTest")
        .map_err(|e| anyhow::anyhow!("failed to register test user: {}", e))?;
    manager
        .register(OTHER_USER, OTHER_PASS, "Other", "Person")
        .map_err(|e| anyhow::anyhow!("failed to register other user: {}", e))?;

    Ok((dir, path))
}
