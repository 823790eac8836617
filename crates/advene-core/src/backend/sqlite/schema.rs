//! SQLite schema for package stores
//!
//! One database file holds any number of packages, each identified by its
//! package id. Every stored reference is a `(prefix, local id)` pair: the
//! prefix is empty for an element of the same package, or the id of an
//! import of that package.

use rusqlite::{Connection, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Packages served by this store
        CREATE TABLE IF NOT EXISTS Packages (
            id TEXT PRIMARY KEY,
            uri TEXT NOT NULL DEFAULT '',
            url TEXT NOT NULL DEFAULT ''
        );

        -- Every element, with its one-letter type code
        CREATE TABLE IF NOT EXISTS Elements (
            package TEXT NOT NULL,
            id TEXT NOT NULL,
            typ TEXT NOT NULL,
            PRIMARY KEY (package, id)
        );

        CREATE TABLE IF NOT EXISTS Medias (
            package TEXT NOT NULL,
            id TEXT NOT NULL,
            url TEXT NOT NULL,
            foref TEXT NOT NULL,
            PRIMARY KEY (package, id)
        );

        CREATE TABLE IF NOT EXISTS Annotations (
            package TEXT NOT NULL,
            id TEXT NOT NULL,
            media_p TEXT NOT NULL,
            media_i TEXT NOT NULL,
            fbegin INTEGER NOT NULL,
            fend INTEGER NOT NULL,
            PRIMARY KEY (package, id)
        );

        CREATE TABLE IF NOT EXISTS Contents (
            package TEXT NOT NULL,
            element TEXT NOT NULL,
            mimetype TEXT NOT NULL,
            model_p TEXT NOT NULL DEFAULT '',
            model_i TEXT NOT NULL DEFAULT '',
            url TEXT NOT NULL DEFAULT '',
            data BLOB NOT NULL DEFAULT x'',
            PRIMARY KEY (package, element)
        );

        CREATE TABLE IF NOT EXISTS RelationMembers (
            package TEXT NOT NULL,
            relation TEXT NOT NULL,
            ord INTEGER NOT NULL,
            member_p TEXT NOT NULL,
            member_i TEXT NOT NULL,
            PRIMARY KEY (package, relation, ord)
        );

        CREATE TABLE IF NOT EXISTS ListItems (
            package TEXT NOT NULL,
            list TEXT NOT NULL,
            ord INTEGER NOT NULL,
            item_p TEXT NOT NULL,
            item_i TEXT NOT NULL,
            PRIMARY KEY (package, list, ord)
        );

        CREATE TABLE IF NOT EXISTS Imports (
            package TEXT NOT NULL,
            id TEXT NOT NULL,
            url TEXT NOT NULL,
            uri TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (package, id)
        );

        CREATE TABLE IF NOT EXISTS Tagged (
            package TEXT NOT NULL,
            element_p TEXT NOT NULL,
            element_i TEXT NOT NULL,
            tag_p TEXT NOT NULL,
            tag_i TEXT NOT NULL,
            PRIMARY KEY (package, element_p, element_i, tag_p, tag_i)
        );

        -- element = '' holds package-level metadata
        CREATE TABLE IF NOT EXISTS Meta (
            package TEXT NOT NULL,
            element TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL DEFAULT '',
            is_ref INTEGER NOT NULL DEFAULT 0,
            value_p TEXT NOT NULL DEFAULT '',
            value_i TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (package, element, key)
        );

        -- Absolute bases of every (package, prefix) pair: the package's own
        -- uri and url for prefix '', the import's uri and url otherwise
        CREATE VIEW IF NOT EXISTS UriBases AS
            SELECT id AS package, '' AS prefix, uri AS uri_base
                FROM Packages WHERE uri != ''
            UNION SELECT id, '', url FROM Packages WHERE url != ''
            UNION SELECT package, id, uri FROM Imports WHERE uri != ''
            UNION SELECT package, id, url FROM Imports WHERE url != '';

        -- Indexes for common query patterns
        CREATE INDEX IF NOT EXISTS idx_elements_typ ON Elements(package, typ);
        CREATE INDEX IF NOT EXISTS idx_annotations_time
            ON Annotations(fbegin, fend, media_p, media_i);
        CREATE INDEX IF NOT EXISTS idx_annotations_media
            ON Annotations(media_i, media_p);
        CREATE INDEX IF NOT EXISTS idx_members_member
            ON RelationMembers(member_i, member_p);
        CREATE INDEX IF NOT EXISTS idx_items_item ON ListItems(item_i, item_p);
        CREATE INDEX IF NOT EXISTS idx_tagged_tag ON Tagged(tag_i, tag_p);
        CREATE INDEX IF NOT EXISTS idx_meta_value ON Meta(value_i, value_p);
        CREATE INDEX IF NOT EXISTS idx_contents_model ON Contents(model_i, model_p);
        "#,
    )?;

    // Set schema version
    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let result: Result<String> = conn.query_row(
        "SELECT value FROM schema_info WHERE key = 'version'",
        [],
        |row| row.get(0),
    );

    match result {
        Ok(version) => Ok(version.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(rusqlite::Error::SqliteFailure(_, _)) => Ok(None), // Table doesn't exist
        Err(e) => Err(e),
    }
}

/// Check if the database has no package schema yet
pub fn needs_init(conn: &Connection) -> Result<bool> {
    let count: i32 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='Packages'",
        [],
        |row| row.get(0),
    )?;
    Ok(count == 0)
}

/// Check if the database holds any table at all (a foreign SQLite file)
pub fn is_empty_database(conn: &Connection) -> Result<bool> {
    let count: i32 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table'",
        [],
        |row| row.get(0),
    )?;
    Ok(count == 0)
}
