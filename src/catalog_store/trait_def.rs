//! The catalog store trait.

use super::models::{
    Album, AlbumDetails, AlbumSummary, Artist, ArtistDetails, ArtistSummary, Country,
    CountrySummary, Genre, Song, SongDetails, SongFields, SongSummary,
};
use crate::error::ApiError;

/// CRUD over the catalog entities and their relations.
///
/// List operations take an optional keyword filter matched case-insensitively
/// against the entity's name or title. Create and update validate fields
/// before touching storage.
pub trait CatalogStore: Send + Sync {
    // Countries

    /// Returns Err(Conflict) if a country with the same name exists.
    fn create_country(&self, name: &str) -> Result<Country, ApiError>;

    /// Returns Err(NotFound) if the country does not exist.
    fn get_country(&self, country_id: i64) -> Result<Country, ApiError>;

    fn get_countries(&self, keyword: Option<&str>) -> Result<Vec<CountrySummary>, ApiError>;

    fn update_country(&self, country_id: i64, name: &str) -> Result<Country, ApiError>;

    /// Succeeds even when the country does not exist.
    fn delete_country(&self, country_id: i64) -> Result<(), ApiError>;

    // Artists

    /// Returns Err(Reference) if the country does not exist.
    fn create_artist(&self, name: &str, country_id: i64) -> Result<Artist, ApiError>;

    fn get_artist(&self, artist_id: i64) -> Result<ArtistDetails, ApiError>;

    fn get_artists(&self, keyword: Option<&str>) -> Result<Vec<ArtistSummary>, ApiError>;

    fn update_artist(&self, artist_id: i64, name: &str, country_id: i64)
        -> Result<Artist, ApiError>;

    fn delete_artist(&self, artist_id: i64) -> Result<(), ApiError>;

    // Genres

    fn create_genre(&self, name: &str) -> Result<Genre, ApiError>;

    fn get_genre(&self, genre_id: i64) -> Result<Genre, ApiError>;

    fn get_genres(&self, keyword: Option<&str>) -> Result<Vec<Genre>, ApiError>;

    fn update_genre(&self, genre_id: i64, name: &str) -> Result<Genre, ApiError>;

    fn delete_genre(&self, genre_id: i64) -> Result<(), ApiError>;

    // Albums

    /// Inserts the album and its artist/genre relations in one transaction.
    /// Any invalid related id rolls the whole creation back with
    /// Err(Reference).
    fn create_album(
        &self,
        title: &str,
        release_date: Option<&str>,
        artist_ids: &[i64],
        genre_ids: &[i64],
    ) -> Result<Album, ApiError>;

    fn get_album(&self, album_id: i64) -> Result<AlbumDetails, ApiError>;

    fn get_albums(&self, keyword: Option<&str>) -> Result<Vec<AlbumSummary>, ApiError>;

    /// Updates the album fields and reconciles its artist/genre relations:
    /// relations missing from the target sets are removed, new ones are added
    /// best-effort (invalid ids are skipped, not errors).
    fn update_album(
        &self,
        album_id: i64,
        title: &str,
        release_date: Option<&str>,
        artist_ids: &[i64],
        genre_ids: &[i64],
    ) -> Result<Album, ApiError>;

    fn delete_album(&self, album_id: i64) -> Result<(), ApiError>;

    // Songs

    /// Returns Err(Conflict) on a duplicate url, Err(Reference) when the
    /// album or a genre id does not exist (nothing is persisted then).
    fn create_song(
        &self,
        fields: &SongFields,
        album_id: Option<i64>,
        genre_ids: &[i64],
    ) -> Result<Song, ApiError>;

    fn get_song(&self, song_id: i64) -> Result<SongDetails, ApiError>;

    fn get_songs(&self, keyword: Option<&str>) -> Result<Vec<SongSummary>, ApiError>;

    /// Songs in id order; unknown ids are skipped.
    fn get_songs_by_ids(&self, song_ids: &[i64]) -> Result<Vec<SongSummary>, ApiError>;

    fn song_exists(&self, song_id: i64) -> Result<bool, ApiError>;

    fn update_song(
        &self,
        song_id: i64,
        fields: &SongFields,
        album_id: Option<i64>,
        genre_ids: &[i64],
    ) -> Result<Song, ApiError>;

    fn delete_song(&self, song_id: i64) -> Result<(), ApiError>;
}
