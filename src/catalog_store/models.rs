//! Catalog data models.
//!
//! Plain rows mirror the tables, the `*Summary` and `*Details` structs are the
//! typed shapes returned by list and detail endpoints with their derived
//! fields (counts, related entities) resolved.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Country {
    pub id: i64,
    pub name: String,
}

/// Country with the number of artists based there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountrySummary {
    pub id: i64,
    pub name: String,
    pub artist_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    pub id: i64,
    pub name: String,
    pub country_id: i64,
}

/// Artist with the number of albums they perform on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtistSummary {
    pub id: i64,
    pub name: String,
    pub country_id: i64,
    pub album_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtistDetails {
    pub id: i64,
    pub name: String,
    pub country: Country,
    pub albums: Vec<AlbumSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub id: i64,
    pub title: String,
    /// ISO date (YYYY-MM-DD), optional.
    pub release_date: Option<String>,
}

/// Album with song count and the thumbnail of its first song.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlbumSummary {
    pub id: i64,
    pub title: String,
    pub release_date: Option<String>,
    pub thumbnail: Option<String>,
    pub song_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlbumDetails {
    pub id: i64,
    pub title: String,
    pub release_date: Option<String>,
    pub artists: Vec<Artist>,
    pub genres: Vec<Genre>,
    pub songs: Vec<SongSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub id: i64,
    pub title: String,
    pub duration: i64,
    pub url: String,
    pub source: String,
    pub source_id: String,
    pub thumbnail: Option<String>,
}

/// Song as it appears in lists: album reference plus the performing artists,
/// which are derived from the album the song belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SongSummary {
    pub id: i64,
    pub title: String,
    pub duration: i64,
    pub url: String,
    pub thumbnail: Option<String>,
    pub album_id: Option<i64>,
    pub album_title: Option<String>,
    pub artists: Vec<Artist>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SongDetails {
    pub id: i64,
    pub title: String,
    pub duration: i64,
    pub url: String,
    pub source: String,
    pub source_id: String,
    pub thumbnail: Option<String>,
    pub album: Option<Album>,
    pub artists: Vec<Artist>,
    pub genres: Vec<Genre>,
}

/// Writable song columns, shared by create and update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SongFields {
    pub title: String,
    pub duration: i64,
    pub url: String,
    pub source: String,
    pub source_id: String,
    pub thumbnail: Option<String>,
}
