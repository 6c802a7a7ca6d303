//! SQLite schema for the catalog database.
//!
//! All entities use integer auto-increment primary keys. Junction tables
//! cascade on delete so removing an entity never leaves orphaned relation
//! rows behind.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};

const COUNTRY_FK: ForeignKey = ForeignKey {
    foreign_table: "countries",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const ARTIST_FK: ForeignKey = ForeignKey {
    foreign_table: "artists",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const ALBUM_FK: ForeignKey = ForeignKey {
    foreign_table: "albums",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const SONG_FK: ForeignKey = ForeignKey {
    foreign_table: "songs",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const GENRE_FK: ForeignKey = ForeignKey {
    foreign_table: "genres",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const COUNTRIES_TABLE: Table = Table {
    name: "countries",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true, is_unique = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

const ARTISTS_TABLE: Table = Table {
    name: "artists",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!(
            "country_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&COUNTRY_FK)
        ),
    ],
    indices: &[("idx_artists_country", "country_id")],
    unique_constraints: &[],
};

const ALBUMS_TABLE: Table = Table {
    name: "albums",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("release_date", &SqlType::Text), // ISO date, optional
    ],
    indices: &[],
    unique_constraints: &[],
};

const SONGS_TABLE: Table = Table {
    name: "songs",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("duration", &SqlType::Integer, non_null = true),
        sqlite_column!("url", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("source", &SqlType::Text, non_null = true),
        sqlite_column!("source_id", &SqlType::Text, non_null = true),
        sqlite_column!("thumbnail", &SqlType::Text),
    ],
    indices: &[],
    unique_constraints: &[],
};

const GENRES_TABLE: Table = Table {
    name: "genres",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true, is_unique = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

/// Artist <-> Album junction.
const ALBUM_PERFORMED_BY_TABLE: Table = Table {
    name: "album_performed_by",
    columns: &[
        sqlite_column!(
            "artist_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ARTIST_FK)
        ),
        sqlite_column!(
            "album_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ALBUM_FK)
        ),
    ],
    indices: &[("idx_album_performed_by_album", "album_id")],
    unique_constraints: &[&["artist_id", "album_id"]],
};

/// Genre <-> Album junction.
const ALBUM_CATEGORIZED_IN_TABLE: Table = Table {
    name: "album_categorized_in",
    columns: &[
        sqlite_column!(
            "genre_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&GENRE_FK)
        ),
        sqlite_column!(
            "album_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ALBUM_FK)
        ),
    ],
    indices: &[("idx_album_categorized_in_album", "album_id")],
    unique_constraints: &[&["genre_id", "album_id"]],
};

/// Genre <-> Song junction.
const SONG_CATEGORIZED_IN_TABLE: Table = Table {
    name: "song_categorized_in",
    columns: &[
        sqlite_column!(
            "genre_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&GENRE_FK)
        ),
        sqlite_column!(
            "song_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&SONG_FK)
        ),
    ],
    indices: &[("idx_song_categorized_in_song", "song_id")],
    unique_constraints: &[&["genre_id", "song_id"]],
};

/// Album <-> Song junction. The UNIQUE constraint on song_id alone enforces
/// that a song belongs to at most one album.
const ALBUM_CONTAINS_TABLE: Table = Table {
    name: "album_contains",
    columns: &[
        sqlite_column!(
            "album_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ALBUM_FK)
        ),
        sqlite_column!(
            "song_id",
            &SqlType::Integer,
            non_null = true,
            is_unique = true,
            foreign_key = Some(&SONG_FK)
        ),
    ],
    indices: &[("idx_album_contains_album", "album_id")],
    unique_constraints: &[],
};

pub const CATALOG_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        COUNTRIES_TABLE,
        ARTISTS_TABLE,
        ALBUMS_TABLE,
        SONGS_TABLE,
        GENRES_TABLE,
        ALBUM_PERFORMED_BY_TABLE,
        ALBUM_CATEGORIZED_IN_TABLE,
        SONG_CATEGORIZED_IN_TABLE,
        ALBUM_CONTAINS_TABLE,
    ],
    migration: None,
}];

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::{params, Connection};

    #[test]
    fn schema_creates_and_validates() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = &CATALOG_VERSIONED_SCHEMAS[0];
        schema.create(&conn).unwrap();
        schema.validate(&conn).unwrap();
    }

    #[test]
    fn deleting_an_album_cascades_to_junction_rows() {
        let conn = Connection::open_in_memory().unwrap();
        CATALOG_VERSIONED_SCHEMAS[0].create(&conn).unwrap();

        conn.execute("INSERT INTO countries (name) VALUES ('Italy')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO artists (name, country_id) VALUES ('Mina', 1)",
            [],
        )
        .unwrap();
        conn.execute("INSERT INTO albums (title) VALUES ('Studio Uno')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO album_performed_by (artist_id, album_id) VALUES (1, 1)",
            [],
        )
        .unwrap();

        conn.execute("DELETE FROM albums WHERE id = 1", []).unwrap();

        let junction_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM album_performed_by", [], |r| r.get(0))
            .unwrap();
        assert_eq!(junction_rows, 0);
    }

    #[test]
    fn a_song_belongs_to_at_most_one_album() {
        let conn = Connection::open_in_memory().unwrap();
        CATALOG_VERSIONED_SCHEMAS[0].create(&conn).unwrap();

        conn.execute("INSERT INTO albums (title) VALUES ('First')", [])
            .unwrap();
        conn.execute("INSERT INTO albums (title) VALUES ('Second')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO songs (title, duration, url, source, source_id)
             VALUES ('Song', 100, 'http://example.com/1', 'yt', 'abc')",
            [],
        )
        .unwrap();

        conn.execute(
            "INSERT INTO album_contains (album_id, song_id) VALUES (1, 1)",
            [],
        )
        .unwrap();
        let err = conn
            .execute(
                "INSERT INTO album_contains (album_id, song_id) VALUES (2, 1)",
                [],
            )
            .unwrap_err();
        assert!(err.to_string().contains("UNIQUE"));

        // but re-pointing the existing row is fine
        conn.execute(
            "UPDATE album_contains SET album_id = ?1 WHERE song_id = ?2",
            params![2, 1],
        )
        .unwrap();
    }
}
