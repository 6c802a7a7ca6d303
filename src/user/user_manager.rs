//! Orchestration over the user store and the catalog: input validation,
//! password handling, session tokens, and the operations that need both
//! databases (playlist contents).

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{NaiveDate, Utc};

use super::auth::{AuthToken, AuthTokenValue, MixtapeHasher, PasswordCredentials};
use super::entitlement::{RemainingPlays, SubscriptionStatus};
use super::user_models::{
    Playlist, PlaylistDetails, PlaylistSongsUpdate, PlaylistSummary, User, UserDetails,
    UserSummary,
};
use super::user_store::UserStore;
use crate::catalog_store::validation::validate_name;
use crate::catalog_store::CatalogStore;
use crate::error::ApiError;

const MIN_PASSWORD_LENGTH: usize = 6;
const MAX_USERNAME_LENGTH: usize = 50;

pub struct UserManager {
    user_store: Arc<dyn UserStore>,
    catalog_store: Arc<dyn CatalogStore>,
    hasher: MixtapeHasher,
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Lowercases and checks the username: non-empty, alphanumeric, max length.
fn normalize_username(username: &str) -> Result<String, ApiError> {
    let username = username.trim().to_lowercase();
    if username.is_empty() {
        return Err(ApiError::validation("username is required"));
    }
    if username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(ApiError::validation(format!(
            "username must be at most {} characters",
            MAX_USERNAME_LENGTH
        )));
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ApiError::validation("username must be alphanumeric"));
    }
    Ok(username)
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

impl UserManager {
    pub fn new(user_store: Arc<dyn UserStore>, catalog_store: Arc<dyn CatalogStore>) -> Self {
        UserManager {
            user_store,
            catalog_store,
            hasher: MixtapeHasher::Argon2,
        }
    }

    // Accounts

    pub fn register(
        &self,
        username: &str,
        password: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<(User, AuthToken), ApiError> {
        let username = normalize_username(username)?;
        validate_password(password)?;
        validate_name("first_name", first_name)?;
        validate_name("last_name", last_name)?;

        let user = self
            .user_store
            .create_user(&username, first_name, last_name)?;
        self.set_password(user.id, password)?;
        self.user_store.reset_to_trial(user.id)?;
        let token = self.mint_token(user.id)?;
        Ok((user, token))
    }

    pub fn login(&self, username: &str, password: &str) -> Result<(User, AuthToken), ApiError> {
        let username = username.trim().to_lowercase();
        let user = self
            .user_store
            .find_user_by_username(&username)?
            .ok_or(ApiError::Authentication)?;
        let credentials = self
            .user_store
            .get_password_credentials(user.id)?
            .ok_or(ApiError::Authentication)?;
        let verified = credentials
            .hasher
            .verify(password, &credentials.hash)
            .map_err(ApiError::Internal)?;
        if !verified {
            return Err(ApiError::Authentication);
        }
        let token = self.mint_token(user.id)?;
        Ok((user, token))
    }

    pub fn logout(&self, token: &AuthTokenValue) -> Result<(), ApiError> {
        self.user_store.delete_auth_token(token)
    }

    /// Looks up a session token, bumping its last_used timestamp.
    pub fn authenticate(&self, token: &AuthTokenValue) -> Result<Option<AuthToken>, ApiError> {
        let found = self.user_store.get_auth_token(token)?;
        if found.is_some() {
            self.user_store.touch_auth_token(token)?;
        }
        Ok(found)
    }

    pub fn update_account(
        &self,
        user_id: i64,
        username: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<User, ApiError> {
        let username = normalize_username(username)?;
        validate_name("first_name", first_name)?;
        validate_name("last_name", last_name)?;
        self.user_store
            .update_user(user_id, &username, first_name, last_name)
    }

    pub fn update_password(
        &self,
        user_id: i64,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), ApiError> {
        let credentials = self
            .user_store
            .get_password_credentials(user_id)?
            .ok_or(ApiError::Authentication)?;
        let verified = credentials
            .hasher
            .verify(current_password, &credentials.hash)
            .map_err(ApiError::Internal)?;
        if !verified {
            return Err(ApiError::Authentication);
        }
        validate_password(new_password)?;
        self.set_password(user_id, new_password)
    }

    fn set_password(&self, user_id: i64, password: &str) -> Result<(), ApiError> {
        let salt = self.hasher.generate_b64_salt();
        let hash = self
            .hasher
            .hash(password.as_bytes(), &salt)
            .map_err(ApiError::Internal)?;
        self.user_store.set_password_credentials(&PasswordCredentials {
            user_id,
            salt,
            hash,
            hasher: self.hasher.clone(),
            created: now_epoch(),
            last_tried: None,
            last_used: None,
        })
    }

    fn mint_token(&self, user_id: i64) -> Result<AuthToken, ApiError> {
        let token = AuthToken {
            user_id,
            value: AuthTokenValue::generate(),
            created: now_epoch(),
            last_used: None,
        };
        self.user_store.add_auth_token(&token)?;
        Ok(token)
    }

    // Users & follows

    pub fn get_users(&self, keyword: Option<&str>) -> Result<Vec<UserSummary>, ApiError> {
        self.user_store.get_users(keyword)
    }

    pub fn get_user(&self, user_id: i64) -> Result<User, ApiError> {
        self.user_store.get_user(user_id)
    }

    pub fn get_user_details(
        &self,
        viewer_id: i64,
        user_id: i64,
    ) -> Result<UserDetails, ApiError> {
        let summary = self.user_store.get_user_summary(user_id)?;
        let is_following = viewer_id != user_id && self.user_store.is_following(viewer_id, user_id)?;
        let playlists = self
            .user_store
            .get_playlists_for_user(user_id, viewer_id == user_id)?;
        Ok(UserDetails {
            id: summary.id,
            username: summary.username,
            first_name: summary.first_name,
            last_name: summary.last_name,
            follower_count: summary.follower_count,
            following_count: summary.following_count,
            is_following,
            playlists,
        })
    }

    pub fn follow(&self, follower_id: i64, following_id: i64) -> Result<(), ApiError> {
        // reject unknown targets with 404 rather than a constraint error
        self.user_store.get_user(following_id)?;
        self.user_store.follow(follower_id, following_id)
    }

    pub fn unfollow(&self, follower_id: i64, following_id: i64) -> Result<(), ApiError> {
        self.user_store.unfollow(follower_id, following_id)
    }

    pub fn get_followers(&self, user_id: i64) -> Result<Vec<UserSummary>, ApiError> {
        self.user_store.get_followers(user_id)
    }

    pub fn get_following(&self, user_id: i64) -> Result<Vec<UserSummary>, ApiError> {
        self.user_store.get_following(user_id)
    }

    // Entitlement

    pub fn subscription_status(&self, user_id: i64) -> Result<SubscriptionStatus, ApiError> {
        self.user_store.subscription_status(user_id, today())
    }

    /// Subscribes or unsubscribes; rejects no-op transitions.
    pub fn update_subscription(
        &self,
        user_id: i64,
        subscribe: bool,
    ) -> Result<SubscriptionStatus, ApiError> {
        let current = self.user_store.subscription_status(user_id, today())?;
        match (current, subscribe) {
            (SubscriptionStatus::Subscribed { .. }, true) => {
                Err(ApiError::validation("already subscribed"))
            }
            (SubscriptionStatus::Trial { .. }, false) => {
                Err(ApiError::validation("not subscribed"))
            }
            (_, true) => self.user_store.subscribe(user_id, today()),
            (_, false) => self.user_store.reset_to_trial(user_id),
        }
    }

    pub fn decrement_playcount(&self, user_id: i64) -> Result<RemainingPlays, ApiError> {
        self.user_store.decrement_playcount(user_id, today())
    }

    // Playlists

    pub fn create_playlist(
        &self,
        user_id: i64,
        name: &str,
        is_public: bool,
    ) -> Result<Playlist, ApiError> {
        self.user_store.create_playlist(user_id, name, is_public)
    }

    pub fn get_public_playlists(
        &self,
        keyword: Option<&str>,
    ) -> Result<Vec<PlaylistSummary>, ApiError> {
        self.user_store.get_public_playlists(keyword)
    }

    /// Private playlists are visible to their owner only.
    pub fn get_playlist_details(
        &self,
        viewer_id: i64,
        playlist_id: i64,
    ) -> Result<PlaylistDetails, ApiError> {
        let playlist = self.user_store.get_playlist(playlist_id)?;
        if !playlist.is_public && playlist.user_id != viewer_id {
            return Err(ApiError::PermissionDenied);
        }
        let owner = self.user_store.get_user(playlist.user_id)?;
        let song_ids = self.user_store.playlist_song_ids(playlist_id)?;
        let songs = self.catalog_store.get_songs_by_ids(&song_ids)?;
        Ok(PlaylistDetails {
            id: playlist.id,
            user_id: playlist.user_id,
            name: playlist.name,
            is_public: playlist.is_public,
            username: owner.username,
            songs,
        })
    }

    pub fn update_playlist(
        &self,
        user_id: i64,
        playlist_id: i64,
        name: &str,
        is_public: bool,
    ) -> Result<Playlist, ApiError> {
        self.check_playlist_owner(user_id, playlist_id)?;
        self.user_store.update_playlist(playlist_id, name, is_public)
    }

    pub fn delete_playlist(&self, user_id: i64, playlist_id: i64) -> Result<(), ApiError> {
        self.check_playlist_owner(user_id, playlist_id)?;
        self.user_store.delete_playlist(playlist_id)
    }

    /// Adds songs to an owned playlist. Songs already present or unknown to
    /// the catalog are skipped and flagged through `not_added` instead of
    /// failing the whole call.
    pub fn add_songs_to_playlist(
        &self,
        user_id: i64,
        playlist_id: i64,
        song_ids: &[i64],
    ) -> Result<PlaylistSongsUpdate, ApiError> {
        let playlist = self.check_playlist_owner(user_id, playlist_id)?;
        let mut not_added = false;
        for &song_id in song_ids {
            if !self.catalog_store.song_exists(song_id)? {
                not_added = true;
                continue;
            }
            if !self.user_store.add_song_to_playlist(playlist_id, song_id)? {
                not_added = true;
            }
        }
        Ok(PlaylistSongsUpdate {
            playlist,
            not_added,
        })
    }

    pub fn remove_song_from_playlist(
        &self,
        user_id: i64,
        playlist_id: i64,
        song_id: i64,
    ) -> Result<(), ApiError> {
        self.check_playlist_owner(user_id, playlist_id)?;
        self.user_store
            .remove_song_from_playlist(playlist_id, song_id)
    }

    fn check_playlist_owner(
        &self,
        user_id: i64,
        playlist_id: i64,
    ) -> Result<Playlist, ApiError> {
        let playlist = self.user_store.get_playlist(playlist_id)?;
        if playlist.user_id != user_id {
            return Err(ApiError::PermissionDenied);
        }
        Ok(playlist)
    }
}
