//! User store traits, split by concern and unified in [`UserStore`].

use chrono::NaiveDate;

use super::auth::{AuthToken, AuthTokenValue, PasswordCredentials};
use super::entitlement::{RemainingPlays, SubscriptionStatus};
use super::user_models::{Playlist, PlaylistSummary, User, UserSummary};
use crate::error::ApiError;

pub trait UserAccountStore: Send + Sync {
    /// Returns Err(Conflict) if the username is taken. The username is stored
    /// as given; callers are expected to lowercase it first.
    fn create_user(
        &self,
        username: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<User, ApiError>;

    /// Returns Err(NotFound) if the user does not exist.
    fn get_user(&self, user_id: i64) -> Result<User, ApiError>;

    fn find_user_by_username(&self, username: &str) -> Result<Option<User>, ApiError>;

    /// Users with follower/following counts, optionally filtered by a
    /// case-insensitive username keyword.
    fn get_users(&self, keyword: Option<&str>) -> Result<Vec<UserSummary>, ApiError>;

    fn get_user_summary(&self, user_id: i64) -> Result<UserSummary, ApiError>;

    fn update_user(
        &self,
        user_id: i64,
        username: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<User, ApiError>;
}

pub trait UserAuthStore: Send + Sync {
    /// Inserts or replaces the credentials of the user.
    fn set_password_credentials(&self, credentials: &PasswordCredentials) -> Result<(), ApiError>;

    fn get_password_credentials(
        &self,
        user_id: i64,
    ) -> Result<Option<PasswordCredentials>, ApiError>;

    fn add_auth_token(&self, token: &AuthToken) -> Result<(), ApiError>;

    fn get_auth_token(&self, value: &AuthTokenValue) -> Result<Option<AuthToken>, ApiError>;

    /// Bumps last_used to now.
    fn touch_auth_token(&self, value: &AuthTokenValue) -> Result<(), ApiError>;

    fn delete_auth_token(&self, value: &AuthTokenValue) -> Result<(), ApiError>;
}

pub trait FollowStore: Send + Sync {
    /// Returns Err(Validation) on self-follow, Err(Conflict) when the
    /// relation already exists, Err(Reference) when either user is unknown.
    fn follow(&self, follower_id: i64, following_id: i64) -> Result<(), ApiError>;

    /// Returns Err(Validation) when the relation does not exist.
    fn unfollow(&self, follower_id: i64, following_id: i64) -> Result<(), ApiError>;

    fn is_following(&self, follower_id: i64, following_id: i64) -> Result<bool, ApiError>;

    fn get_followers(&self, user_id: i64) -> Result<Vec<UserSummary>, ApiError>;

    fn get_following(&self, user_id: i64) -> Result<Vec<UserSummary>, ApiError>;
}

pub trait PlaylistStore: Send + Sync {
    fn create_playlist(
        &self,
        user_id: i64,
        name: &str,
        is_public: bool,
    ) -> Result<Playlist, ApiError>;

    fn get_playlist(&self, playlist_id: i64) -> Result<Playlist, ApiError>;

    fn get_public_playlists(&self, keyword: Option<&str>)
        -> Result<Vec<PlaylistSummary>, ApiError>;

    /// Playlists owned by the user, optionally including private ones.
    fn get_playlists_for_user(
        &self,
        user_id: i64,
        include_private: bool,
    ) -> Result<Vec<PlaylistSummary>, ApiError>;

    fn update_playlist(
        &self,
        playlist_id: i64,
        name: &str,
        is_public: bool,
    ) -> Result<Playlist, ApiError>;

    fn delete_playlist(&self, playlist_id: i64) -> Result<(), ApiError>;

    fn playlist_song_ids(&self, playlist_id: i64) -> Result<Vec<i64>, ApiError>;

    /// Returns Ok(false) when the song is already in the playlist.
    fn add_song_to_playlist(&self, playlist_id: i64, song_id: i64) -> Result<bool, ApiError>;

    fn remove_song_from_playlist(&self, playlist_id: i64, song_id: i64) -> Result<(), ApiError>;
}

pub trait EntitlementStore: Send + Sync {
    /// Resolves the current status as of `today`. A stale subscription
    /// lapses to a fresh trial here; a user with neither row is initialized
    /// to a fresh trial.
    fn subscription_status(
        &self,
        user_id: i64,
        today: NaiveDate,
    ) -> Result<SubscriptionStatus, ApiError>;

    /// Switches the user to Subscribed until one year from `today`.
    fn subscribe(&self, user_id: i64, today: NaiveDate) -> Result<SubscriptionStatus, ApiError>;

    /// Switches the user to a fresh trial, resetting the play quota.
    fn reset_to_trial(&self, user_id: i64) -> Result<SubscriptionStatus, ApiError>;

    /// Registers one play: unlimited for subscribers, otherwise decrements
    /// the trial count. Returns Err(QuotaExceeded) when the count is zero.
    fn decrement_playcount(
        &self,
        user_id: i64,
        today: NaiveDate,
    ) -> Result<RemainingPlays, ApiError>;
}

pub trait UserStore:
    UserAccountStore + UserAuthStore + FollowStore + PlaylistStore + EntitlementStore
{
}

impl<T> UserStore for T where
    T: UserAccountStore + UserAuthStore + FollowStore + PlaylistStore + EntitlementStore
{
}
