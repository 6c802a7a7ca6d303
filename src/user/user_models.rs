//! User data models.

use serde::{Deserialize, Serialize};

use crate::catalog_store::SongSummary;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    /// Unix epoch seconds, set at insert.
    pub created: i64,
}

/// User as it appears in lists, with follow counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub follower_count: i64,
    pub following_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserDetails {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub follower_count: i64,
    pub following_count: i64,
    /// Whether the requesting user follows this one.
    pub is_following: bool,
    pub playlists: Vec<PlaylistSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub is_public: bool,
}

/// Playlist as it appears in lists, with owner username and song count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistSummary {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub is_public: bool,
    pub username: String,
    pub song_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistDetails {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub is_public: bool,
    pub username: String,
    pub songs: Vec<SongSummary>,
}

/// Result of a bulk song addition. `not_added` flags that at least one song
/// was skipped because it was already present or unknown to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistSongsUpdate {
    pub playlist: Playlist,
    pub not_added: bool,
}
