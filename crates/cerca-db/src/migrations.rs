use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD as B64;
use rusqlite::Connection;
use tracing::info;

use cerca_types::models::DELETED_USER_NAME;

use crate::error::{Environ, OptionalExt, Result};

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            name            TEXT NOT NULL UNIQUE,
            passwordhash    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS admins (
            id  INTEGER PRIMARY KEY REFERENCES users(id)
        );

        CREATE TABLE IF NOT EXISTS threads (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            title       TEXT NOT NULL,
            publishtime INTEGER NOT NULL,
            topicid     INTEGER NOT NULL DEFAULT 0,
            authorid    INTEGER NOT NULL REFERENCES users(id)
        );

        CREATE TABLE IF NOT EXISTS posts (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            content     TEXT NOT NULL,
            publishtime INTEGER NOT NULL,
            lastedit    INTEGER,
            authorid    INTEGER NOT NULL REFERENCES users(id),
            threadid    INTEGER NOT NULL REFERENCES threads(id)
        );

        CREATE INDEX IF NOT EXISTS idx_posts_thread
            ON posts(threadid, publishtime);

        CREATE TABLE IF NOT EXISTS registrations (
            id      INTEGER PRIMARY KEY AUTOINCREMENT,
            userid  INTEGER NOT NULL REFERENCES users(id),
            host    TEXT NOT NULL,
            link    TEXT NOT NULL,
            time    INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS moderation_log (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            actingid    INTEGER NOT NULL REFERENCES users(id),
            recipientid INTEGER REFERENCES users(id),
            action      INTEGER NOT NULL,
            time        INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS moderation_proposals (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            proposerid  INTEGER NOT NULL REFERENCES users(id),
            recipientid INTEGER NOT NULL REFERENCES users(id),
            action      INTEGER NOT NULL,
            time        INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS quorum_decisions (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            userid      INTEGER NOT NULL REFERENCES users(id),
            decision    BOOLEAN NOT NULL,
            modlogid    INTEGER NOT NULL REFERENCES moderation_log(id)
        );

        CREATE TABLE IF NOT EXISTS meta (
            schemaversion INTEGER NOT NULL
        );
        ",
    )
    .environ("create schema")?;

    info!("Database migrations complete");
    Ok(())
}

/// Makes sure the deleted-user sentinel exists and returns its id.
pub(crate) fn ensure_deleted_user(conn: &Connection) -> Result<i64> {
    let existing = conn
        .query_row(
            "SELECT id FROM users WHERE name = ?1",
            [DELETED_USER_NAME],
            |row| row.get(0),
        )
        .environ("ensure deleted user: lookup")
        .optional()?;

    if let Some(id) = existing {
        return Ok(id);
    }

    let id = conn
        .query_row(
            "INSERT INTO users (name, passwordhash) VALUES (?1, ?2) RETURNING id",
            (DELETED_USER_NAME, unusable_password_hash()),
            |row| row.get(0),
        )
        .environ("ensure deleted user: insert")?;

    info!("Created deleted-user sentinel (id {})", id);
    Ok(id)
}

/// A hash in the current storage format over random bytes. It has the shape
/// of a real hash, so the password-hash migration accepts it, but no password
/// verifies against it.
fn unusable_password_hash() -> String {
    let salt: [u8; 16] = rand::random();
    let hash: [u8; 32] = rand::random();
    format!(
        "$argon2id$v=19$m=65536,t=3,p=4${}${}",
        B64.encode(salt),
        B64.encode(hash)
    )
}
