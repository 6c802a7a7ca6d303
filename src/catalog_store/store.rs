use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use super::models::{
    Album, AlbumDetails, AlbumSummary, Artist, ArtistDetails, ArtistSummary, Country,
    CountrySummary, Genre, Song, SongDetails, SongFields, SongSummary,
};
use super::schema::CATALOG_VERSIONED_SCHEMAS;
use super::trait_def::CatalogStore;
use super::validation;
use crate::error::{is_foreign_key_violation, is_unique_violation, ApiError};
use crate::sqlite_persistence::BASE_DB_VERSION;

/// SQLite-backed [`CatalogStore`].
pub struct SqliteCatalogStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCatalogStore {
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
            CATALOG_VERSIONED_SCHEMAS
                .last()
                .context("No catalog schema defined")?
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
        if db_version >= CATALOG_VERSIONED_SCHEMAS.len() as i64 {
            bail!("Database version {} is too new", db_version);
        }
        let version = db_version as usize;
        CATALOG_VERSIONED_SCHEMAS
            .get(version)
            .context("Failed to get schema")?
            .validate(&conn)?;

        Ok(SqliteCatalogStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

/// Maps a constraint failure during a relation insert: FK violations become
/// Reference errors naming the offending id, everything else bubbles up.
fn relation_error(err: rusqlite::Error, entity: &'static str, id: i64) -> ApiError {
    if is_foreign_key_violation(&err) {
        ApiError::Reference { entity, id }
    } else {
        err.into()
    }
}

/// Converts an optional keyword into a LIKE pattern for case-insensitive
/// substring matching.
fn like_pattern(keyword: Option<&str>) -> Option<String> {
    keyword.map(|k| format!("%{}%", k.to_lowercase()))
}

fn row_to_country(row: &rusqlite::Row) -> rusqlite::Result<Country> {
    Ok(Country {
        id: row.get(0)?,
        name: row.get(1)?,
    })
}

fn row_to_artist(row: &rusqlite::Row) -> rusqlite::Result<Artist> {
    Ok(Artist {
        id: row.get(0)?,
        name: row.get(1)?,
        country_id: row.get(2)?,
    })
}

fn row_to_genre(row: &rusqlite::Row) -> rusqlite::Result<Genre> {
    Ok(Genre {
        id: row.get(0)?,
        name: row.get(1)?,
    })
}

fn row_to_album(row: &rusqlite::Row) -> rusqlite::Result<Album> {
    Ok(Album {
        id: row.get(0)?,
        title: row.get(1)?,
        release_date: row.get(2)?,
    })
}

fn row_to_album_summary(row: &rusqlite::Row) -> rusqlite::Result<AlbumSummary> {
    Ok(AlbumSummary {
        id: row.get(0)?,
        title: row.get(1)?,
        release_date: row.get(2)?,
        thumbnail: row.get(3)?,
        song_count: row.get(4)?,
    })
}

fn row_to_song(row: &rusqlite::Row) -> rusqlite::Result<Song> {
    Ok(Song {
        id: row.get(0)?,
        title: row.get(1)?,
        duration: row.get(2)?,
        url: row.get(3)?,
        source: row.get(4)?,
        source_id: row.get(5)?,
        thumbnail: row.get(6)?,
    })
}

const ALBUM_SUMMARY_SELECT: &str = "SELECT al.id, al.title, al.release_date,
        (SELECT s.thumbnail FROM album_contains ac
         JOIN songs s ON s.id = ac.song_id
         WHERE ac.album_id = al.id ORDER BY s.id LIMIT 1),
        (SELECT COUNT(*) FROM album_contains ac WHERE ac.album_id = al.id)
     FROM albums al";

impl SqliteCatalogStore {
    fn artists_for_album(conn: &Connection, album_id: i64) -> Result<Vec<Artist>, ApiError> {
        let mut stmt = conn.prepare(
            "SELECT a.id, a.name, a.country_id FROM album_performed_by pb
             JOIN artists a ON a.id = pb.artist_id
             WHERE pb.album_id = ?1 ORDER BY a.name",
        )?;
        let artists = stmt
            .query_map(params![album_id], row_to_artist)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(artists)
    }

    fn genres_for_album(conn: &Connection, album_id: i64) -> Result<Vec<Genre>, ApiError> {
        let mut stmt = conn.prepare(
            "SELECT g.id, g.name FROM album_categorized_in ci
             JOIN genres g ON g.id = ci.genre_id
             WHERE ci.album_id = ?1 ORDER BY g.name",
        )?;
        let genres = stmt
            .query_map(params![album_id], row_to_genre)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(genres)
    }

    fn genres_for_song(conn: &Connection, song_id: i64) -> Result<Vec<Genre>, ApiError> {
        let mut stmt = conn.prepare(
            "SELECT g.id, g.name FROM song_categorized_in ci
             JOIN genres g ON g.id = ci.genre_id
             WHERE ci.song_id = ?1 ORDER BY g.name",
        )?;
        let genres = stmt
            .query_map(params![song_id], row_to_genre)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(genres)
    }

    fn album_for_song(conn: &Connection, song_id: i64) -> Result<Option<Album>, ApiError> {
        let album = conn
            .query_row(
                "SELECT al.id, al.title, al.release_date FROM album_contains ac
                 JOIN albums al ON al.id = ac.album_id
                 WHERE ac.song_id = ?1",
                params![song_id],
                row_to_album,
            )
            .optional()?;
        Ok(album)
    }

    fn song_summary(conn: &Connection, song: Song) -> Result<SongSummary, ApiError> {
        let album = Self::album_for_song(conn, song.id)?;
        let artists = match &album {
            Some(album) => Self::artists_for_album(conn, album.id)?,
            None => Vec::new(),
        };
        Ok(SongSummary {
            id: song.id,
            title: song.title,
            duration: song.duration,
            url: song.url,
            thumbnail: song.thumbnail,
            album_id: album.as_ref().map(|a| a.id),
            album_title: album.map(|a| a.title),
            artists,
        })
    }

    fn songs_for_album(conn: &Connection, album_id: i64) -> Result<Vec<SongSummary>, ApiError> {
        let mut stmt = conn.prepare(
            "SELECT s.id, s.title, s.duration, s.url, s.source, s.source_id, s.thumbnail
             FROM album_contains ac
             JOIN songs s ON s.id = ac.song_id
             WHERE ac.album_id = ?1 ORDER BY s.id",
        )?;
        let songs: Vec<Song> = stmt
            .query_map(params![album_id], row_to_song)?
            .collect::<Result<_, _>>()?;
        songs
            .into_iter()
            .map(|song| Self::song_summary(conn, song))
            .collect()
    }

    fn album_summaries_for_artist(
        conn: &Connection,
        artist_id: i64,
    ) -> Result<Vec<AlbumSummary>, ApiError> {
        let mut stmt = conn.prepare(&format!(
            "{} JOIN album_performed_by pb ON pb.album_id = al.id
             WHERE pb.artist_id = ?1 ORDER BY al.title",
            ALBUM_SUMMARY_SELECT
        ))?;
        let albums = stmt
            .query_map(params![artist_id], row_to_album_summary)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(albums)
    }

    fn get_album_row(conn: &Connection, album_id: i64) -> Result<Option<Album>, ApiError> {
        let album = conn
            .query_row(
                "SELECT id, title, release_date FROM albums WHERE id = ?1",
                params![album_id],
                row_to_album,
            )
            .optional()?;
        Ok(album)
    }

    fn get_song_row(conn: &Connection, song_id: i64) -> Result<Option<Song>, ApiError> {
        let song = conn
            .query_row(
                "SELECT id, title, duration, url, source, source_id, thumbnail
                 FROM songs WHERE id = ?1",
                params![song_id],
                row_to_song,
            )
            .optional()?;
        Ok(song)
    }

    /// Brings the relation rows of `owner_id` in `table` to the target set:
    /// additions are best-effort (constraint failures skipped), removals are
    /// unconditional.
    fn reconcile_relations(
        conn: &Connection,
        table: &str,
        owner_column: &str,
        related_column: &str,
        owner_id: i64,
        target: &[i64],
    ) -> Result<(), ApiError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            related_column, table, owner_column
        ))?;
        let current: BTreeSet<i64> = stmt
            .query_map(params![owner_id], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        let target: BTreeSet<i64> = target.iter().copied().collect();

        for related_id in target.difference(&current) {
            let insert = conn.execute(
                &format!(
                    "INSERT INTO {} ({}, {}) VALUES (?1, ?2)",
                    table, owner_column, related_column
                ),
                params![owner_id, related_id],
            );
            if let Err(err) = insert {
                if !is_foreign_key_violation(&err) && !is_unique_violation(&err) {
                    return Err(err.into());
                }
            }
        }
        for related_id in current.difference(&target) {
            conn.execute(
                &format!(
                    "DELETE FROM {} WHERE {} = ?1 AND {} = ?2",
                    table, owner_column, related_column
                ),
                params![owner_id, related_id],
            )?;
        }
        Ok(())
    }

    /// Inserts relation rows for a freshly created owner, failing on the
    /// first invalid related id.
    fn insert_relations(
        conn: &Connection,
        table: &str,
        owner_column: &str,
        related_column: &str,
        owner_id: i64,
        related_entity: &'static str,
        related_ids: &[i64],
    ) -> Result<(), ApiError> {
        let unique_ids: BTreeSet<i64> = related_ids.iter().copied().collect();
        for related_id in unique_ids {
            conn.execute(
                &format!(
                    "INSERT INTO {} ({}, {}) VALUES (?1, ?2)",
                    table, owner_column, related_column
                ),
                params![owner_id, related_id],
            )
            .map_err(|err| relation_error(err, related_entity, related_id))?;
        }
        Ok(())
    }
}

impl CatalogStore for SqliteCatalogStore {
    fn create_country(&self, name: &str) -> Result<Country, ApiError> {
        validation::validate_name("name", name)?;
        let conn = self.conn.lock().unwrap();
        match conn.execute("INSERT INTO countries (name) VALUES (?1)", params![name]) {
            Ok(_) => Ok(Country {
                id: conn.last_insert_rowid(),
                name: name.to_string(),
            }),
            Err(err) if is_unique_violation(&err) => Err(ApiError::Conflict {
                entity: "country",
                field: "name",
                value: name.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn get_country(&self, country_id: i64) -> Result<Country, ApiError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, name FROM countries WHERE id = ?1",
            params![country_id],
            row_to_country,
        )
        .optional()?
        .ok_or(ApiError::NotFound {
            entity: "country",
            id: country_id,
        })
    }

    fn get_countries(&self, keyword: Option<&str>) -> Result<Vec<CountrySummary>, ApiError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT c.id, c.name, COUNT(a.id) FROM countries c
             LEFT JOIN artists a ON a.country_id = c.id
             WHERE ?1 IS NULL OR LOWER(c.name) LIKE ?1
             GROUP BY c.id ORDER BY c.name",
        )?;
        let countries = stmt
            .query_map(params![like_pattern(keyword)], |row| {
                Ok(CountrySummary {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    artist_count: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(countries)
    }

    fn update_country(&self, country_id: i64, name: &str) -> Result<Country, ApiError> {
        validation::validate_name("name", name)?;
        let conn = self.conn.lock().unwrap();
        let update = conn.execute(
            "UPDATE countries SET name = ?1 WHERE id = ?2",
            params![name, country_id],
        );
        match update {
            Ok(0) => Err(ApiError::NotFound {
                entity: "country",
                id: country_id,
            }),
            Ok(_) => Ok(Country {
                id: country_id,
                name: name.to_string(),
            }),
            Err(err) if is_unique_violation(&err) => Err(ApiError::Conflict {
                entity: "country",
                field: "name",
                value: name.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn delete_country(&self, country_id: i64) -> Result<(), ApiError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM countries WHERE id = ?1", params![country_id])?;
        Ok(())
    }

    fn create_artist(&self, name: &str, country_id: i64) -> Result<Artist, ApiError> {
        validation::validate_name("name", name)?;
        let conn = self.conn.lock().unwrap();
        match conn.execute(
            "INSERT INTO artists (name, country_id) VALUES (?1, ?2)",
            params![name, country_id],
        ) {
            Ok(_) => Ok(Artist {
                id: conn.last_insert_rowid(),
                name: name.to_string(),
                country_id,
            }),
            Err(err) => Err(relation_error(err, "country", country_id)),
        }
    }

    fn get_artist(&self, artist_id: i64) -> Result<ArtistDetails, ApiError> {
        let conn = self.conn.lock().unwrap();
        let (id, name, country) = conn
            .query_row(
                "SELECT a.id, a.name, c.id, c.name FROM artists a
                 JOIN countries c ON c.id = a.country_id
                 WHERE a.id = ?1",
                params![artist_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        Country {
                            id: row.get(2)?,
                            name: row.get(3)?,
                        },
                    ))
                },
            )
            .optional()?
            .ok_or(ApiError::NotFound {
                entity: "artist",
                id: artist_id,
            })?;
        let albums = Self::album_summaries_for_artist(&conn, id)?;
        Ok(ArtistDetails {
            id,
            name,
            country,
            albums,
        })
    }

    fn get_artists(&self, keyword: Option<&str>) -> Result<Vec<ArtistSummary>, ApiError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT a.id, a.name, a.country_id, COUNT(pb.album_id) FROM artists a
             LEFT JOIN album_performed_by pb ON pb.artist_id = a.id
             WHERE ?1 IS NULL OR LOWER(a.name) LIKE ?1
             GROUP BY a.id ORDER BY a.name",
        )?;
        let artists = stmt
            .query_map(params![like_pattern(keyword)], |row| {
                Ok(ArtistSummary {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    country_id: row.get(2)?,
                    album_count: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(artists)
    }

    fn update_artist(
        &self,
        artist_id: i64,
        name: &str,
        country_id: i64,
    ) -> Result<Artist, ApiError> {
        validation::validate_name("name", name)?;
        let conn = self.conn.lock().unwrap();
        let update = conn.execute(
            "UPDATE artists SET name = ?1, country_id = ?2 WHERE id = ?3",
            params![name, country_id, artist_id],
        );
        match update {
            Ok(0) => Err(ApiError::NotFound {
                entity: "artist",
                id: artist_id,
            }),
            Ok(_) => Ok(Artist {
                id: artist_id,
                name: name.to_string(),
                country_id,
            }),
            Err(err) => Err(relation_error(err, "country", country_id)),
        }
    }

    fn delete_artist(&self, artist_id: i64) -> Result<(), ApiError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM artists WHERE id = ?1", params![artist_id])?;
        Ok(())
    }

    fn create_genre(&self, name: &str) -> Result<Genre, ApiError> {
        validation::validate_name("name", name)?;
        let conn = self.conn.lock().unwrap();
        match conn.execute("INSERT INTO genres (name) VALUES (?1)", params![name]) {
            Ok(_) => Ok(Genre {
                id: conn.last_insert_rowid(),
                name: name.to_string(),
            }),
            Err(err) if is_unique_violation(&err) => Err(ApiError::Conflict {
                entity: "genre",
                field: "name",
                value: name.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn get_genre(&self, genre_id: i64) -> Result<Genre, ApiError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, name FROM genres WHERE id = ?1",
            params![genre_id],
            row_to_genre,
        )
        .optional()?
        .ok_or(ApiError::NotFound {
            entity: "genre",
            id: genre_id,
        })
    }

    fn get_genres(&self, keyword: Option<&str>) -> Result<Vec<Genre>, ApiError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name FROM genres
             WHERE ?1 IS NULL OR LOWER(name) LIKE ?1
             ORDER BY name",
        )?;
        let genres = stmt
            .query_map(params![like_pattern(keyword)], row_to_genre)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(genres)
    }

    fn update_genre(&self, genre_id: i64, name: &str) -> Result<Genre, ApiError> {
        validation::validate_name("name", name)?;
        let conn = self.conn.lock().unwrap();
        let update = conn.execute(
            "UPDATE genres SET name = ?1 WHERE id = ?2",
            params![name, genre_id],
        );
        match update {
            Ok(0) => Err(ApiError::NotFound {
                entity: "genre",
                id: genre_id,
            }),
            Ok(_) => Ok(Genre {
                id: genre_id,
                name: name.to_string(),
            }),
            Err(err) if is_unique_violation(&err) => Err(ApiError::Conflict {
                entity: "genre",
                field: "name",
                value: name.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn delete_genre(&self, genre_id: i64) -> Result<(), ApiError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM genres WHERE id = ?1", params![genre_id])?;
        Ok(())
    }

    fn create_album(
        &self,
        title: &str,
        release_date: Option<&str>,
        artist_ids: &[i64],
        genre_ids: &[i64],
    ) -> Result<Album, ApiError> {
        validation::validate_name("title", title)?;
        let release_date = validation::validate_release_date(release_date)?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO albums (title, release_date) VALUES (?1, ?2)",
            params![title, release_date],
        )?;
        let album_id = tx.last_insert_rowid();
        // dropping the transaction on error rolls everything back
        Self::insert_relations(
            &tx,
            "album_performed_by",
            "album_id",
            "artist_id",
            album_id,
            "artist",
            artist_ids,
        )?;
        Self::insert_relations(
            &tx,
            "album_categorized_in",
            "album_id",
            "genre_id",
            album_id,
            "genre",
            genre_ids,
        )?;
        tx.commit()?;
        Ok(Album {
            id: album_id,
            title: title.to_string(),
            release_date,
        })
    }

    fn get_album(&self, album_id: i64) -> Result<AlbumDetails, ApiError> {
        let conn = self.conn.lock().unwrap();
        let album = Self::get_album_row(&conn, album_id)?.ok_or(ApiError::NotFound {
            entity: "album",
            id: album_id,
        })?;
        Ok(AlbumDetails {
            id: album.id,
            title: album.title,
            release_date: album.release_date,
            artists: Self::artists_for_album(&conn, album_id)?,
            genres: Self::genres_for_album(&conn, album_id)?,
            songs: Self::songs_for_album(&conn, album_id)?,
        })
    }

    fn get_albums(&self, keyword: Option<&str>) -> Result<Vec<AlbumSummary>, ApiError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE ?1 IS NULL OR LOWER(al.title) LIKE ?1 ORDER BY al.title",
            ALBUM_SUMMARY_SELECT
        ))?;
        let albums = stmt
            .query_map(params![like_pattern(keyword)], row_to_album_summary)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(albums)
    }

    fn update_album(
        &self,
        album_id: i64,
        title: &str,
        release_date: Option<&str>,
        artist_ids: &[i64],
        genre_ids: &[i64],
    ) -> Result<Album, ApiError> {
        validation::validate_name("title", title)?;
        let release_date = validation::validate_release_date(release_date)?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE albums SET title = ?1, release_date = ?2 WHERE id = ?3",
            params![title, release_date, album_id],
        )?;
        if updated == 0 {
            return Err(ApiError::NotFound {
                entity: "album",
                id: album_id,
            });
        }
        Self::reconcile_relations(
            &tx,
            "album_performed_by",
            "album_id",
            "artist_id",
            album_id,
            artist_ids,
        )?;
        Self::reconcile_relations(
            &tx,
            "album_categorized_in",
            "album_id",
            "genre_id",
            album_id,
            genre_ids,
        )?;
        tx.commit()?;
        Ok(Album {
            id: album_id,
            title: title.to_string(),
            release_date,
        })
    }

    fn delete_album(&self, album_id: i64) -> Result<(), ApiError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM albums WHERE id = ?1", params![album_id])?;
        Ok(())
    }

    fn create_song(
        &self,
        fields: &SongFields,
        album_id: Option<i64>,
        genre_ids: &[i64],
    ) -> Result<Song, ApiError> {
        validation::validate_song_fields(fields)?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let insert = tx.execute(
            "INSERT INTO songs (title, duration, url, source, source_id, thumbnail)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                fields.title,
                fields.duration,
                fields.url,
                fields.source,
                fields.source_id,
                fields.thumbnail
            ],
        );
        if let Err(err) = insert {
            if is_unique_violation(&err) {
                return Err(ApiError::Conflict {
                    entity: "song",
                    field: "url",
                    value: fields.url.clone(),
                });
            }
            return Err(err.into());
        }
        let song_id = tx.last_insert_rowid();
        if let Some(album_id) = album_id {
            tx.execute(
                "INSERT INTO album_contains (album_id, song_id) VALUES (?1, ?2)",
                params![album_id, song_id],
            )
            .map_err(|err| relation_error(err, "album", album_id))?;
        }
        Self::insert_relations(
            &tx,
            "song_categorized_in",
            "song_id",
            "genre_id",
            song_id,
            "genre",
            genre_ids,
        )?;
        tx.commit()?;
        Ok(Song {
            id: song_id,
            title: fields.title.clone(),
            duration: fields.duration,
            url: fields.url.clone(),
            source: fields.source.clone(),
            source_id: fields.source_id.clone(),
            thumbnail: fields.thumbnail.clone(),
        })
    }

    fn get_song(&self, song_id: i64) -> Result<SongDetails, ApiError> {
        let conn = self.conn.lock().unwrap();
        let song = Self::get_song_row(&conn, song_id)?.ok_or(ApiError::NotFound {
            entity: "song",
            id: song_id,
        })?;
        let album = Self::album_for_song(&conn, song_id)?;
        let artists = match &album {
            Some(album) => Self::artists_for_album(&conn, album.id)?,
            None => Vec::new(),
        };
        Ok(SongDetails {
            id: song.id,
            title: song.title,
            duration: song.duration,
            url: song.url,
            source: song.source,
            source_id: song.source_id,
            thumbnail: song.thumbnail,
            album,
            artists,
            genres: Self::genres_for_song(&conn, song_id)?,
        })
    }

    fn get_songs(&self, keyword: Option<&str>) -> Result<Vec<SongSummary>, ApiError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, title, duration, url, source, source_id, thumbnail FROM songs
             WHERE ?1 IS NULL OR LOWER(title) LIKE ?1
             ORDER BY title",
        )?;
        let songs: Vec<Song> = stmt
            .query_map(params![like_pattern(keyword)], row_to_song)?
            .collect::<Result<_, _>>()?;
        songs
            .into_iter()
            .map(|song| Self::song_summary(&conn, song))
            .collect()
    }

    fn get_songs_by_ids(&self, song_ids: &[i64]) -> Result<Vec<SongSummary>, ApiError> {
        let conn = self.conn.lock().unwrap();
        let unique_ids: BTreeSet<i64> = song_ids.iter().copied().collect();
        let mut summaries = Vec::with_capacity(unique_ids.len());
        for song_id in unique_ids {
            if let Some(song) = Self::get_song_row(&conn, song_id)? {
                summaries.push(Self::song_summary(&conn, song)?);
            }
        }
        Ok(summaries)
    }

    fn song_exists(&self, song_id: i64) -> Result<bool, ApiError> {
        let conn = self.conn.lock().unwrap();
        let exists = conn
            .query_row(
                "SELECT 1 FROM songs WHERE id = ?1",
                params![song_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(exists)
    }

    fn update_song(
        &self,
        song_id: i64,
        fields: &SongFields,
        album_id: Option<i64>,
        genre_ids: &[i64],
    ) -> Result<Song, ApiError> {
        validation::validate_song_fields(fields)?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let update = tx.execute(
            "UPDATE songs SET title = ?1, duration = ?2, url = ?3, source = ?4,
             source_id = ?5, thumbnail = ?6 WHERE id = ?7",
            params![
                fields.title,
                fields.duration,
                fields.url,
                fields.source,
                fields.source_id,
                fields.thumbnail,
                song_id
            ],
        );
        match update {
            Ok(0) => {
                return Err(ApiError::NotFound {
                    entity: "song",
                    id: song_id,
                })
            }
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(ApiError::Conflict {
                    entity: "song",
                    field: "url",
                    value: fields.url.clone(),
                })
            }
            Err(err) => return Err(err.into()),
        }

        // Album membership is a single row that is re-pointed best-effort,
        // like the relation adds above.
        match album_id {
            Some(album_id) => {
                let repointed = tx.execute(
                    "UPDATE album_contains SET album_id = ?1 WHERE song_id = ?2",
                    params![album_id, song_id],
                );
                match repointed {
                    Ok(0) => {
                        let insert = tx.execute(
                            "INSERT INTO album_contains (album_id, song_id) VALUES (?1, ?2)",
                            params![album_id, song_id],
                        );
                        if let Err(err) = insert {
                            if !is_foreign_key_violation(&err) && !is_unique_violation(&err) {
                                return Err(err.into());
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        if !is_foreign_key_violation(&err) {
                            return Err(err.into());
                        }
                    }
                }
            }
            None => {
                tx.execute(
                    "DELETE FROM album_contains WHERE song_id = ?1",
                    params![song_id],
                )?;
            }
        }

        Self::reconcile_relations(
            &tx,
            "song_categorized_in",
            "song_id",
            "genre_id",
            song_id,
            genre_ids,
        )?;
        tx.commit()?;
        Ok(Song {
            id: song_id,
            title: fields.title.clone(),
            duration: fields.duration,
            url: fields.url.clone(),
            source: fields.source.clone(),
            source_id: fields.source_id.clone(),
            thumbnail: fields.thumbnail.clone(),
        })
    }

    fn delete_song(&self, song_id: i64) -> Result<(), ApiError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM songs WHERE id = ?1", params![song_id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_tmp_store() -> (TempDir, SqliteCatalogStore) {
        let tmp_dir = TempDir::new().unwrap();
        let store = SqliteCatalogStore::new(tmp_dir.path().join("catalog.db")).unwrap();
        (tmp_dir, store)
    }

    fn seed_artist(store: &SqliteCatalogStore, name: &str) -> Artist {
        let country = store.create_country(&format!("Country of {}", name)).unwrap();
        store.create_artist(name, country.id).unwrap()
    }

    fn song_fields(url_suffix: &str) -> SongFields {
        SongFields {
            title: format!("Song {}", url_suffix),
            duration: 180,
            url: format!("http://example.com/{}", url_suffix),
            source: "yt".to_string(),
            source_id: url_suffix.to_string(),
            thumbnail: None,
        }
    }

    #[test]
    fn country_crud_round_trip() {
        let (_tmp, store) = create_tmp_store();
        let country = store.create_country("Italy").unwrap();
        assert_eq!(store.get_country(country.id).unwrap().name, "Italy");

        let updated = store.update_country(country.id, "France").unwrap();
        assert_eq!(updated.name, "France");

        store.delete_country(country.id).unwrap();
        assert!(matches!(
            store.get_country(country.id),
            Err(ApiError::NotFound { .. })
        ));
        // deleting again is fine
        store.delete_country(country.id).unwrap();
    }

    #[test]
    fn duplicate_country_name_is_a_conflict() {
        let (_tmp, store) = create_tmp_store();
        store.create_country("Italy").unwrap();
        let err = store.create_country("Italy").unwrap_err();
        assert!(matches!(err, ApiError::Conflict { field: "name", .. }));
    }

    #[test]
    fn update_to_taken_country_name_is_a_conflict() {
        let (_tmp, store) = create_tmp_store();
        store.create_country("Italy").unwrap();
        let france = store.create_country("France").unwrap();
        let err = store.update_country(france.id, "Italy").unwrap_err();
        assert!(matches!(err, ApiError::Conflict { .. }));
        // row unmodified
        assert_eq!(store.get_country(france.id).unwrap().name, "France");
    }

    #[test]
    fn update_of_missing_country_is_not_found() {
        let (_tmp, store) = create_tmp_store();
        assert!(matches!(
            store.update_country(999, "Italy"),
            Err(ApiError::NotFound { .. })
        ));
    }

    #[test]
    fn creating_artist_with_unknown_country_fails_with_reference() {
        let (_tmp, store) = create_tmp_store();
        let err = store.create_artist("Mina", 999).unwrap_err();
        assert!(matches!(
            err,
            ApiError::Reference {
                entity: "country",
                id: 999
            }
        ));
    }

    #[test]
    fn country_list_counts_artists_and_filters_by_keyword() {
        let (_tmp, store) = create_tmp_store();
        let italy = store.create_country("Italy").unwrap();
        store.create_country("Iceland").unwrap();
        store.create_artist("Mina", italy.id).unwrap();
        store.create_artist("Battisti", italy.id).unwrap();

        let all = store.get_countries(None).unwrap();
        assert_eq!(all.len(), 2);

        let filtered = store.get_countries(Some("ITA")).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "Italy");
        assert_eq!(filtered[0].artist_count, 2);
    }

    #[test]
    fn album_create_with_invalid_artist_rolls_back() {
        let (_tmp, store) = create_tmp_store();
        let artist = seed_artist(&store, "Mina");

        let err = store
            .create_album("Studio Uno", None, &[artist.id, 999], &[])
            .unwrap_err();
        assert!(matches!(
            err,
            ApiError::Reference {
                entity: "artist",
                id: 999
            }
        ));
        // nothing persisted
        assert!(store.get_albums(None).unwrap().is_empty());
    }

    #[test]
    fn album_create_links_artists_and_genres() {
        let (_tmp, store) = create_tmp_store();
        let artist = seed_artist(&store, "Mina");
        let genre = store.create_genre("Pop").unwrap();

        let album = store
            .create_album("Studio Uno", Some("1965-01-01"), &[artist.id], &[genre.id])
            .unwrap();
        let details = store.get_album(album.id).unwrap();
        assert_eq!(details.artists, vec![artist]);
        assert_eq!(details.genres, vec![genre]);
        assert_eq!(details.release_date.as_deref(), Some("1965-01-01"));
    }

    #[test]
    fn album_update_applies_valid_changes_and_skips_invalid_ids() {
        let (_tmp, store) = create_tmp_store();
        let mina = seed_artist(&store, "Mina");
        let battisti = seed_artist(&store, "Battisti");
        let album = store
            .create_album("Duets", None, &[mina.id], &[])
            .unwrap();

        // keep battisti, drop mina, try to add a bogus id
        store
            .update_album(album.id, "Duets", None, &[battisti.id, 999], &[])
            .unwrap();
        let details = store.get_album(album.id).unwrap();
        assert_eq!(details.artists, vec![battisti]);
    }

    #[test]
    fn album_update_of_missing_album_is_not_found() {
        let (_tmp, store) = create_tmp_store();
        assert!(matches!(
            store.update_album(42, "Nope", None, &[], &[]),
            Err(ApiError::NotFound { .. })
        ));
    }

    #[test]
    fn song_create_requires_existing_album() {
        let (_tmp, store) = create_tmp_store();
        let err = store
            .create_song(&song_fields("a"), Some(999), &[])
            .unwrap_err();
        assert!(matches!(
            err,
            ApiError::Reference {
                entity: "album",
                id: 999
            }
        ));
        assert!(store.get_songs(None).unwrap().is_empty());
    }

    #[test]
    fn duplicate_song_url_is_a_conflict() {
        let (_tmp, store) = create_tmp_store();
        store.create_song(&song_fields("a"), None, &[]).unwrap();
        let mut fields = song_fields("b");
        fields.url = song_fields("a").url;
        let err = store.create_song(&fields, None, &[]).unwrap_err();
        assert!(matches!(err, ApiError::Conflict { field: "url", .. }));
    }

    #[test]
    fn song_summary_derives_album_and_artists() {
        let (_tmp, store) = create_tmp_store();
        let artist = seed_artist(&store, "Mina");
        let album = store
            .create_album("Studio Uno", None, &[artist.id], &[])
            .unwrap();
        let song = store
            .create_song(&song_fields("a"), Some(album.id), &[])
            .unwrap();

        let songs = store.get_songs(None).unwrap();
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].id, song.id);
        assert_eq!(songs[0].album_id, Some(album.id));
        assert_eq!(songs[0].album_title.as_deref(), Some("Studio Uno"));
        assert_eq!(songs[0].artists, vec![artist]);
    }

    #[test]
    fn song_update_repoints_album_membership() {
        let (_tmp, store) = create_tmp_store();
        let first = store.create_album("First", None, &[], &[]).unwrap();
        let second = store.create_album("Second", None, &[], &[]).unwrap();
        let song = store
            .create_song(&song_fields("a"), Some(first.id), &[])
            .unwrap();

        store
            .update_song(song.id, &song_fields("a"), Some(second.id), &[])
            .unwrap();
        let details = store.get_song(song.id).unwrap();
        assert_eq!(details.album.map(|a| a.id), Some(second.id));

        store
            .update_song(song.id, &song_fields("a"), None, &[])
            .unwrap();
        let details = store.get_song(song.id).unwrap();
        assert!(details.album.is_none());
    }

    #[test]
    fn song_update_with_unknown_album_keeps_current_membership() {
        let (_tmp, store) = create_tmp_store();
        let album = store.create_album("First", None, &[], &[]).unwrap();
        let song = store
            .create_song(&song_fields("a"), Some(album.id), &[])
            .unwrap();

        store
            .update_song(song.id, &song_fields("a"), Some(999), &[])
            .unwrap();
        let details = store.get_song(song.id).unwrap();
        assert_eq!(details.album.map(|a| a.id), Some(album.id));
    }

    #[test]
    fn deleting_album_detaches_songs_via_cascade() {
        let (_tmp, store) = create_tmp_store();
        let album = store.create_album("First", None, &[], &[]).unwrap();
        let song = store
            .create_song(&song_fields("a"), Some(album.id), &[])
            .unwrap();

        store.delete_album(album.id).unwrap();
        let details = store.get_song(song.id).unwrap();
        assert!(details.album.is_none());
    }

    #[test]
    fn genre_reconciliation_on_song_update() {
        let (_tmp, store) = create_tmp_store();
        let pop = store.create_genre("Pop").unwrap();
        let rock = store.create_genre("Rock").unwrap();
        let song = store
            .create_song(&song_fields("a"), None, &[pop.id])
            .unwrap();

        store
            .update_song(song.id, &song_fields("a"), None, &[rock.id])
            .unwrap();
        let details = store.get_song(song.id).unwrap();
        assert_eq!(details.genres, vec![rock]);
    }

    #[test]
    fn songs_by_ids_skips_unknown_ids() {
        let (_tmp, store) = create_tmp_store();
        let song = store.create_song(&song_fields("a"), None, &[]).unwrap();
        let songs = store.get_songs_by_ids(&[song.id, 999]).unwrap();
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].id, song.id);
    }

    #[test]
    fn album_summary_carries_song_count_and_thumbnail() {
        let (_tmp, store) = create_tmp_store();
        let album = store.create_album("First", None, &[], &[]).unwrap();
        let mut fields = song_fields("a");
        fields.thumbnail = Some("http://example.com/thumb.jpg".to_string());
        store.create_song(&fields, Some(album.id), &[]).unwrap();
        store
            .create_song(&song_fields("b"), Some(album.id), &[])
            .unwrap();

        let albums = store.get_albums(None).unwrap();
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].song_count, 2);
        assert_eq!(
            albums[0].thumbnail.as_deref(),
            Some("http://example.com/thumb.jpg")
        );
    }
}
