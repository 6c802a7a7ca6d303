use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Months, NaiveDate};
use rusqlite::{params, Connection, OptionalExtension};

use super::auth::{AuthToken, AuthTokenValue, MixtapeHasher, PasswordCredentials};
use super::entitlement::{RemainingPlays, SubscriptionStatus, INITIAL_PLAYCOUNT};
use super::user_models::{Playlist, PlaylistSummary, User, UserSummary};
use super::user_store::{
    EntitlementStore, FollowStore, PlaylistStore, UserAccountStore, UserAuthStore,
};
use crate::catalog_store::validation::validate_name;
use crate::error::{is_foreign_key_violation, is_unique_violation, ApiError};
use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema, BASE_DB_VERSION,
    DEFAULT_TIMESTAMP,
};

const USER_FK: ForeignKey = ForeignKey {
    foreign_table: "users",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const PLAYLIST_FK: ForeignKey = ForeignKey {
    foreign_table: "playlist",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const USERS_TABLE: Table = Table {
    name: "users",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("username", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("first_name", &SqlType::Text, non_null = true),
        sqlite_column!("last_name", &SqlType::Text, non_null = true),
        sqlite_column!(
            "created",
            &SqlType::Integer,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_users_username", "username")],
    unique_constraints: &[],
};

const USER_PASSWORD_CREDENTIALS_TABLE: Table = Table {
    name: "user_password_credentials",
    columns: &[
        sqlite_column!(
            "user_id",
            &SqlType::Integer,
            non_null = true,
            is_unique = true,
            foreign_key = Some(&USER_FK)
        ),
        sqlite_column!("salt", &SqlType::Text, non_null = true),
        sqlite_column!("hash", &SqlType::Text, non_null = true),
        sqlite_column!("hasher", &SqlType::Text, non_null = true),
        sqlite_column!(
            "created",
            &SqlType::Integer,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!("last_tried", &SqlType::Integer),
        sqlite_column!("last_used", &SqlType::Integer),
    ],
    indices: &[],
    unique_constraints: &[],
};

const AUTH_TOKEN_TABLE: Table = Table {
    name: "auth_token",
    columns: &[
        sqlite_column!(
            "user_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&USER_FK)
        ),
        sqlite_column!("value", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!(
            "created",
            &SqlType::Integer,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!("last_used", &SqlType::Integer),
    ],
    indices: &[("idx_auth_token_value", "value")],
    unique_constraints: &[],
};

const FOLLOWS_TABLE: Table = Table {
    name: "follows",
    columns: &[
        sqlite_column!(
            "follower_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&USER_FK)
        ),
        sqlite_column!(
            "following_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&USER_FK)
        ),
    ],
    indices: &[("idx_follows_following", "following_id")],
    unique_constraints: &[&["follower_id", "following_id"]],
};

const TRIAL_USER_TABLE: Table = Table {
    name: "trial_user",
    columns: &[
        sqlite_column!(
            "user_id",
            &SqlType::Integer,
            non_null = true,
            is_unique = true,
            foreign_key = Some(&USER_FK)
        ),
        sqlite_column!(
            "remaining_playcount",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("50")
        ),
    ],
    indices: &[],
    unique_constraints: &[],
};

const SUBSCRIBED_USER_TABLE: Table = Table {
    name: "subscribed_user",
    columns: &[
        sqlite_column!(
            "user_id",
            &SqlType::Integer,
            non_null = true,
            is_unique = true,
            foreign_key = Some(&USER_FK)
        ),
        sqlite_column!("effective_until", &SqlType::Text, non_null = true), // ISO date
    ],
    indices: &[],
    unique_constraints: &[],
};

const PLAYLIST_TABLE: Table = Table {
    name: "playlist",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "user_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&USER_FK)
        ),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!(
            "is_public",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    indices: &[("idx_playlist_user", "user_id")],
    unique_constraints: &[],
};

// song_id carries no foreign key: songs live in the catalog database, their
// existence is checked through the catalog store before insert.
const PLAYLIST_CONTAINS_TABLE: Table = Table {
    name: "playlist_contains",
    columns: &[
        sqlite_column!(
            "playlist_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&PLAYLIST_FK)
        ),
        sqlite_column!("song_id", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[&["playlist_id", "song_id"]],
};

const VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        USERS_TABLE,
        USER_PASSWORD_CREDENTIALS_TABLE,
        AUTH_TOKEN_TABLE,
        FOLLOWS_TABLE,
        TRIAL_USER_TABLE,
        SUBSCRIBED_USER_TABLE,
        PLAYLIST_TABLE,
        PLAYLIST_CONTAINS_TABLE,
    ],
    migration: None,
}];

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        created: row.get(4)?,
    })
}

fn row_to_user_summary(row: &rusqlite::Row) -> rusqlite::Result<UserSummary> {
    Ok(UserSummary {
        id: row.get(0)?,
        username: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        follower_count: row.get(4)?,
        following_count: row.get(5)?,
    })
}

fn row_to_playlist(row: &rusqlite::Row) -> rusqlite::Result<Playlist> {
    Ok(Playlist {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        is_public: row.get(3)?,
    })
}

fn row_to_playlist_summary(row: &rusqlite::Row) -> rusqlite::Result<PlaylistSummary> {
    Ok(PlaylistSummary {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        is_public: row.get(3)?,
        username: row.get(4)?,
        song_count: row.get(5)?,
    })
}

const USER_SUMMARY_SELECT: &str = "SELECT u.id, u.username, u.first_name, u.last_name,
        (SELECT COUNT(*) FROM follows f WHERE f.following_id = u.id),
        (SELECT COUNT(*) FROM follows f WHERE f.follower_id = u.id)
     FROM users u";

const PLAYLIST_SUMMARY_SELECT: &str = "SELECT p.id, p.user_id, p.name, p.is_public, u.username,
        (SELECT COUNT(*) FROM playlist_contains pc WHERE pc.playlist_id = p.id)
     FROM playlist p JOIN users u ON u.id = p.user_id";

/// SQLite-backed [`super::UserStore`].
pub struct SqliteUserStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteUserStore {
    pub fn new<T: AsRef<Path>>(db_path: T) -> Result<Self> {
        let conn = if db_path.as_ref().exists() {
            Connection::open_with_flags(
                db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        } else {
            let conn = Connection::open(db_path)?;
            VERSIONED_SCHEMAS
                .last()
                .context("No user schema defined")?
                .create(&conn)?;
            conn
        };
        // FK enforcement is per-connection
        conn.execute("PRAGMA foreign_keys = ON;", [])?;

        let db_version = conn
            .query_row("PRAGMA user_version;", [], |row| row.get::<usize, i64>(0))
            .context("Failed to read database version")?
            - BASE_DB_VERSION as i64;

        if db_version < 0 {
            bail!(
                "Database version {} is too old, does not contain base db version {}",
                db_version,
                BASE_DB_VERSION
            );
        }
        if db_version >= VERSIONED_SCHEMAS.len() as i64 {
            bail!("Database version {} is too new", db_version);
        }
        VERSIONED_SCHEMAS
            .get(db_version as usize)
            .context("Failed to get schema")?
            .validate(&conn)?;

        Ok(SqliteUserStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn get_user_row(conn: &Connection, user_id: i64) -> Result<Option<User>, ApiError> {
        let user = conn
            .query_row(
                "SELECT id, username, first_name, last_name, created FROM users WHERE id = ?1",
                params![user_id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Resolves the entitlement status, applying lapse-on-read and lazy
    /// trial initialization. Runs inside the caller's transaction.
    fn resolve_status(
        conn: &Connection,
        user_id: i64,
        today: NaiveDate,
    ) -> Result<SubscriptionStatus, ApiError> {
        let effective_until: Option<String> = conn
            .query_row(
                "SELECT effective_until FROM subscribed_user WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(effective_until) = effective_until {
            let until = NaiveDate::parse_from_str(&effective_until, "%Y-%m-%d")
                .map_err(|err| anyhow!("Corrupt effective_until '{}': {}", effective_until, err))?;
            if until >= today {
                return Ok(SubscriptionStatus::Subscribed {
                    effective_until: until,
                });
            }
            // lapsed: back to a fresh trial
            conn.execute(
                "DELETE FROM subscribed_user WHERE user_id = ?1",
                params![user_id],
            )?;
            conn.execute(
                "INSERT INTO trial_user (user_id) VALUES (?1)",
                params![user_id],
            )?;
            return Ok(SubscriptionStatus::Trial {
                remaining_playcount: INITIAL_PLAYCOUNT,
            });
        }

        let remaining: Option<i64> = conn
            .query_row(
                "SELECT remaining_playcount FROM trial_user WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(remaining_playcount) = remaining {
            return Ok(SubscriptionStatus::Trial {
                remaining_playcount,
            });
        }

        if Self::get_user_row(conn, user_id)?.is_none() {
            return Err(ApiError::NotFound {
                entity: "user",
                id: user_id,
            });
        }
        conn.execute(
            "INSERT INTO trial_user (user_id) VALUES (?1)",
            params![user_id],
        )?;
        Ok(SubscriptionStatus::Trial {
            remaining_playcount: INITIAL_PLAYCOUNT,
        })
    }
}

impl UserAccountStore for SqliteUserStore {
    fn create_user(
        &self,
        username: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<User, ApiError> {
        let conn = self.conn.lock().unwrap();
        let insert = conn.execute(
            "INSERT INTO users (username, first_name, last_name) VALUES (?1, ?2, ?3)",
            params![username, first_name, last_name],
        );
        match insert {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(ApiError::Conflict {
                    entity: "user",
                    field: "username",
                    value: username.to_string(),
                })
            }
            Err(err) => return Err(err.into()),
        }
        let user_id = conn.last_insert_rowid();
        Self::get_user_row(&conn, user_id)?.ok_or(ApiError::NotFound {
            entity: "user",
            id: user_id,
        })
    }

    fn get_user(&self, user_id: i64) -> Result<User, ApiError> {
        let conn = self.conn.lock().unwrap();
        Self::get_user_row(&conn, user_id)?.ok_or(ApiError::NotFound {
            entity: "user",
            id: user_id,
        })
    }

    fn find_user_by_username(&self, username: &str) -> Result<Option<User>, ApiError> {
        let conn = self.conn.lock().unwrap();
        let user = conn
            .query_row(
                "SELECT id, username, first_name, last_name, created FROM users
                 WHERE username = ?1",
                params![username],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    fn get_users(&self, keyword: Option<&str>) -> Result<Vec<UserSummary>, ApiError> {
        let conn = self.conn.lock().unwrap();
        let pattern = keyword.map(|k| format!("%{}%", k.to_lowercase()));
        let mut stmt = conn.prepare(&format!(
            "{} WHERE ?1 IS NULL OR LOWER(u.username) LIKE ?1 ORDER BY u.username",
            USER_SUMMARY_SELECT
        ))?;
        let users = stmt
            .query_map(params![pattern], row_to_user_summary)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    fn get_user_summary(&self, user_id: i64) -> Result<UserSummary, ApiError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("{} WHERE u.id = ?1", USER_SUMMARY_SELECT),
            params![user_id],
            row_to_user_summary,
        )
        .optional()?
        .ok_or(ApiError::NotFound {
            entity: "user",
            id: user_id,
        })
    }

    fn update_user(
        &self,
        user_id: i64,
        username: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<User, ApiError> {
        let conn = self.conn.lock().unwrap();
        let update = conn.execute(
            "UPDATE users SET username = ?1, first_name = ?2, last_name = ?3 WHERE id = ?4",
            params![username, first_name, last_name, user_id],
        );
        match update {
            Ok(0) => Err(ApiError::NotFound {
                entity: "user",
                id: user_id,
            }),
            Ok(_) => Self::get_user_row(&conn, user_id)?.ok_or(ApiError::NotFound {
                entity: "user",
                id: user_id,
            }),
            Err(err) if is_unique_violation(&err) => Err(ApiError::Conflict {
                entity: "user",
                field: "username",
                value: username.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }
}

impl UserAuthStore for SqliteUserStore {
    fn set_password_credentials(&self, credentials: &PasswordCredentials) -> Result<(), ApiError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO user_password_credentials (user_id, salt, hash, hasher, created)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (user_id) DO UPDATE SET salt = ?2, hash = ?3, hasher = ?4",
            params![
                credentials.user_id,
                credentials.salt,
                credentials.hash,
                credentials.hasher.to_string(),
                credentials.created,
            ],
        )?;
        Ok(())
    }

    fn get_password_credentials(
        &self,
        user_id: i64,
    ) -> Result<Option<PasswordCredentials>, ApiError> {
        let conn = self.conn.lock().unwrap();
        let credentials = conn
            .query_row(
                "SELECT user_id, salt, hash, hasher, created, last_tried, last_used
                 FROM user_password_credentials WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, Option<i64>>(5)?,
                        row.get::<_, Option<i64>>(6)?,
                    ))
                },
            )
            .optional()?;
        match credentials {
            None => Ok(None),
            Some((user_id, salt, hash, hasher, created, last_tried, last_used)) => {
                let hasher = hasher.parse::<MixtapeHasher>()?;
                Ok(Some(PasswordCredentials {
                    user_id,
                    salt,
                    hash,
                    hasher,
                    created,
                    last_tried,
                    last_used,
                }))
            }
        }
    }

    fn add_auth_token(&self, token: &AuthToken) -> Result<(), ApiError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO auth_token (user_id, value, created, last_used) VALUES (?1, ?2, ?3, ?4)",
            params![token.user_id, token.value.0, token.created, token.last_used],
        )?;
        Ok(())
    }

    fn get_auth_token(&self, value: &AuthTokenValue) -> Result<Option<AuthToken>, ApiError> {
        let conn = self.conn.lock().unwrap();
        let token = conn
            .query_row(
                "SELECT user_id, value, created, last_used FROM auth_token WHERE value = ?1",
                params![value.0],
                |row| {
                    Ok(AuthToken {
                        user_id: row.get(0)?,
                        value: AuthTokenValue(row.get(1)?),
                        created: row.get(2)?,
                        last_used: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(token)
    }

    fn touch_auth_token(&self, value: &AuthTokenValue) -> Result<(), ApiError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE auth_token SET last_used = ?1 WHERE value = ?2",
            params![now_epoch(), value.0],
        )?;
        Ok(())
    }

    fn delete_auth_token(&self, value: &AuthTokenValue) -> Result<(), ApiError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM auth_token WHERE value = ?1", params![value.0])?;
        Ok(())
    }
}

impl FollowStore for SqliteUserStore {
    fn follow(&self, follower_id: i64, following_id: i64) -> Result<(), ApiError> {
        if follower_id == following_id {
            return Err(ApiError::validation("cannot follow yourself"));
        }
        let conn = self.conn.lock().unwrap();
        let insert = conn.execute(
            "INSERT INTO follows (follower_id, following_id) VALUES (?1, ?2)",
            params![follower_id, following_id],
        );
        match insert {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(ApiError::Conflict {
                entity: "follow",
                field: "following_id",
                value: following_id.to_string(),
            }),
            Err(err) if is_foreign_key_violation(&err) => Err(ApiError::Reference {
                entity: "user",
                id: following_id,
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn unfollow(&self, follower_id: i64, following_id: i64) -> Result<(), ApiError> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM follows WHERE follower_id = ?1 AND following_id = ?2",
            params![follower_id, following_id],
        )?;
        if deleted == 0 {
            return Err(ApiError::validation("not following this user"));
        }
        Ok(())
    }

    fn is_following(&self, follower_id: i64, following_id: i64) -> Result<bool, ApiError> {
        let conn = self.conn.lock().unwrap();
        let found = conn
            .query_row(
                "SELECT 1 FROM follows WHERE follower_id = ?1 AND following_id = ?2",
                params![follower_id, following_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn get_followers(&self, user_id: i64) -> Result<Vec<UserSummary>, ApiError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{} JOIN follows f ON f.follower_id = u.id
             WHERE f.following_id = ?1 ORDER BY u.username",
            USER_SUMMARY_SELECT
        ))?;
        let users = stmt
            .query_map(params![user_id], row_to_user_summary)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    fn get_following(&self, user_id: i64) -> Result<Vec<UserSummary>, ApiError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{} JOIN follows f ON f.following_id = u.id
             WHERE f.follower_id = ?1 ORDER BY u.username",
            USER_SUMMARY_SELECT
        ))?;
        let users = stmt
            .query_map(params![user_id], row_to_user_summary)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }
}

impl PlaylistStore for SqliteUserStore {
    fn create_playlist(
        &self,
        user_id: i64,
        name: &str,
        is_public: bool,
    ) -> Result<Playlist, ApiError> {
        validate_name("name", name)?;
        let conn = self.conn.lock().unwrap();
        let insert = conn.execute(
            "INSERT INTO playlist (user_id, name, is_public) VALUES (?1, ?2, ?3)",
            params![user_id, name, is_public],
        );
        match insert {
            Ok(_) => Ok(Playlist {
                id: conn.last_insert_rowid(),
                user_id,
                name: name.to_string(),
                is_public,
            }),
            Err(err) if is_foreign_key_violation(&err) => Err(ApiError::Reference {
                entity: "user",
                id: user_id,
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn get_playlist(&self, playlist_id: i64) -> Result<Playlist, ApiError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, user_id, name, is_public FROM playlist WHERE id = ?1",
            params![playlist_id],
            row_to_playlist,
        )
        .optional()?
        .ok_or(ApiError::NotFound {
            entity: "playlist",
            id: playlist_id,
        })
    }

    fn get_public_playlists(
        &self,
        keyword: Option<&str>,
    ) -> Result<Vec<PlaylistSummary>, ApiError> {
        let conn = self.conn.lock().unwrap();
        let pattern = keyword.map(|k| format!("%{}%", k.to_lowercase()));
        let mut stmt = conn.prepare(&format!(
            "{} WHERE p.is_public = 1 AND (?1 IS NULL OR LOWER(p.name) LIKE ?1)
             ORDER BY p.name",
            PLAYLIST_SUMMARY_SELECT
        ))?;
        let playlists = stmt
            .query_map(params![pattern], row_to_playlist_summary)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(playlists)
    }

    fn get_playlists_for_user(
        &self,
        user_id: i64,
        include_private: bool,
    ) -> Result<Vec<PlaylistSummary>, ApiError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE p.user_id = ?1 AND (?2 OR p.is_public = 1) ORDER BY p.name",
            PLAYLIST_SUMMARY_SELECT
        ))?;
        let playlists = stmt
            .query_map(params![user_id, include_private], row_to_playlist_summary)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(playlists)
    }

    fn update_playlist(
        &self,
        playlist_id: i64,
        name: &str,
        is_public: bool,
    ) -> Result<Playlist, ApiError> {
        validate_name("name", name)?;
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE playlist SET name = ?1, is_public = ?2 WHERE id = ?3",
            params![name, is_public, playlist_id],
        )?;
        if updated == 0 {
            return Err(ApiError::NotFound {
                entity: "playlist",
                id: playlist_id,
            });
        }
        conn.query_row(
            "SELECT id, user_id, name, is_public FROM playlist WHERE id = ?1",
            params![playlist_id],
            row_to_playlist,
        )
        .map_err(Into::into)
    }

    fn delete_playlist(&self, playlist_id: i64) -> Result<(), ApiError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM playlist WHERE id = ?1", params![playlist_id])?;
        Ok(())
    }

    fn playlist_song_ids(&self, playlist_id: i64) -> Result<Vec<i64>, ApiError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT song_id FROM playlist_contains WHERE playlist_id = ?1 ORDER BY song_id",
        )?;
        let song_ids = stmt
            .query_map(params![playlist_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(song_ids)
    }

    fn add_song_to_playlist(&self, playlist_id: i64, song_id: i64) -> Result<bool, ApiError> {
        let conn = self.conn.lock().unwrap();
        let insert = conn.execute(
            "INSERT INTO playlist_contains (playlist_id, song_id) VALUES (?1, ?2)",
            params![playlist_id, song_id],
        );
        match insert {
            Ok(_) => Ok(true),
            Err(err) if is_unique_violation(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn remove_song_from_playlist(&self, playlist_id: i64, song_id: i64) -> Result<(), ApiError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM playlist_contains WHERE playlist_id = ?1 AND song_id = ?2",
            params![playlist_id, song_id],
        )?;
        Ok(())
    }
}

impl EntitlementStore for SqliteUserStore {
    fn subscription_status(
        &self,
        user_id: i64,
        today: NaiveDate,
    ) -> Result<SubscriptionStatus, ApiError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let status = Self::resolve_status(&tx, user_id, today)?;
        tx.commit()?;
        Ok(status)
    }

    fn subscribe(&self, user_id: i64, today: NaiveDate) -> Result<SubscriptionStatus, ApiError> {
        let effective_until = today
            .checked_add_months(Months::new(12))
            .context("Subscription end date out of range")?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM trial_user WHERE user_id = ?1", params![user_id])?;
        tx.execute(
            "DELETE FROM subscribed_user WHERE user_id = ?1",
            params![user_id],
        )?;
        let insert = tx.execute(
            "INSERT INTO subscribed_user (user_id, effective_until) VALUES (?1, ?2)",
            params![user_id, effective_until.to_string()],
        );
        if let Err(err) = insert {
            if is_foreign_key_violation(&err) {
                return Err(ApiError::NotFound {
                    entity: "user",
                    id: user_id,
                });
            }
            return Err(err.into());
        }
        tx.commit()?;
        Ok(SubscriptionStatus::Subscribed { effective_until })
    }

    fn reset_to_trial(&self, user_id: i64) -> Result<SubscriptionStatus, ApiError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM subscribed_user WHERE user_id = ?1",
            params![user_id],
        )?;
        tx.execute("DELETE FROM trial_user WHERE user_id = ?1", params![user_id])?;
        let insert = tx.execute(
            "INSERT INTO trial_user (user_id) VALUES (?1)",
            params![user_id],
        );
        if let Err(err) = insert {
            if is_foreign_key_violation(&err) {
                return Err(ApiError::NotFound {
                    entity: "user",
                    id: user_id,
                });
            }
            return Err(err.into());
        }
        tx.commit()?;
        Ok(SubscriptionStatus::Trial {
            remaining_playcount: INITIAL_PLAYCOUNT,
        })
    }

    fn decrement_playcount(
        &self,
        user_id: i64,
        today: NaiveDate,
    ) -> Result<RemainingPlays, ApiError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let status = Self::resolve_status(&tx, user_id, today)?;
        let remaining = match status {
            SubscriptionStatus::Subscribed { .. } => RemainingPlays::Unlimited,
            SubscriptionStatus::Trial {
                remaining_playcount,
            } => {
                if remaining_playcount <= 0 {
                    return Err(ApiError::QuotaExceeded);
                }
                tx.execute(
                    "UPDATE trial_user SET remaining_playcount = ?1 WHERE user_id = ?2",
                    params![remaining_playcount - 1, user_id],
                )?;
                RemainingPlays::Count(remaining_playcount - 1)
            }
        };
        tx.commit()?;
        Ok(remaining)
    }
}
