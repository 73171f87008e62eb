//! One-shot rewrite of stored password hashes from the legacy Argon2id
//! serialization (`$argon2id19$<t>,65536,4$<salt>$<hash>`, bcrypt base64
//! alphabet) to the PHC string format.
//!
//! The migration runs in a single transaction and marks itself done by
//! writing `schemaversion = 1` to `meta`.

use std::sync::LazyLock;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, NO_PAD, STANDARD_NO_PAD};
use base64::Engine;
use regex::Regex;
use tracing::{info, warn};

use crate::error::{DbError, Environ, Result};
use crate::Database;

static LEGACY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$argon2id19\$(\d),65536,4\$(\S+)\$(\S+)$").expect("legacy hash pattern")
});

static MODERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$argon2id\$v=19\$m=65536,t=(\d),p=4\$(\S+)\$(\S+)$")
        .expect("modern hash pattern")
});

/// Base64 flavour of the legacy format: bcrypt alphabet, no padding.
const LEGACY_B64: GeneralPurpose = GeneralPurpose::new(&alphabet::BCRYPT, NO_PAD);

/// Schema version written once the migration has run.
pub const PWHASH_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwhashMigration {
    /// `meta` already records the migration; nothing was touched.
    AlreadyApplied,
    Applied { migrated: usize, skipped: usize },
}

#[derive(Debug, PartialEq, Eq)]
enum Converted {
    Rewritten(String),
    Current,
    Malformed,
}

pub fn is_modern(hash: &str) -> bool {
    MODERN.is_match(hash)
}

fn convert(hash: &str) -> Converted {
    let Some(caps) = LEGACY.captures(hash) else {
        return if is_modern(hash) {
            Converted::Current
        } else {
            Converted::Malformed
        };
    };

    let time_cost = &caps[1];
    let (Ok(salt), Ok(digest)) = (LEGACY_B64.decode(&caps[2]), LEGACY_B64.decode(&caps[3])) else {
        return Converted::Malformed;
    };

    Converted::Rewritten(format!(
        "$argon2id$v=19$m=65536,t={},p=4${}${}",
        time_cost,
        STANDARD_NO_PAD.encode(salt),
        STANDARD_NO_PAD.encode(digest)
    ))
}

impl Database {
    /// Rewrites every legacy password hash into the PHC format.
    ///
    /// All-or-nothing: a row in neither format aborts the whole migration
    /// and leaves every hash untouched.
    pub fn migrate_pwhash(&self) -> Result<PwhashMigration> {
        const ENVIRON: &str = "migrate password hashes";

        let outcome = self.with_tx(ENVIRON, |tx| {
            let version: Option<i64> = tx
                .query_row("SELECT MAX(schemaversion) FROM meta", [], |row| row.get(0))
                .environ("migrate password hashes: read schema version")?;
            if version.is_some_and(|v| v > 0) {
                return Ok(PwhashMigration::AlreadyApplied);
            }

            let rows = {
                let mut stmt = tx
                    .prepare("SELECT id, passwordhash FROM users")
                    .environ("migrate password hashes: select users")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
                    .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
                    .environ("migrate password hashes: select users")?;
                rows
            };

            let mut updates = Vec::new();
            let mut skipped = 0;
            for (id, hash) in rows {
                match convert(&hash) {
                    Converted::Rewritten(new_hash) => updates.push((id, new_hash)),
                    Converted::Current => skipped += 1,
                    Converted::Malformed => {
                        warn!("Password hash of user {} is in no known format", id);
                        return Err(DbError::Malformed {
                            environ: ENVIRON.to_string(),
                            id,
                        });
                    }
                }
            }

            {
                let mut update = tx
                    .prepare("UPDATE users SET passwordhash = ?1 WHERE id = ?2")
                    .environ("migrate password hashes: prepare update")?;
                for (id, new_hash) in &updates {
                    update
                        .execute((new_hash, id))
                        .environ("migrate password hashes: update users")?;
                }
            }

            tx.execute(
                "INSERT INTO meta (schemaversion) VALUES (?1)",
                [PWHASH_SCHEMA_VERSION],
            )
            .environ("migrate password hashes: write schema version")?;

            Ok(PwhashMigration::Applied {
                migrated: updates.len(),
                skipped,
            })
        })?;

        match outcome {
            PwhashMigration::AlreadyApplied => {
                info!("Password hash migration already applied; nothing to do")
            }
            PwhashMigration::Applied { migrated, skipped } => {
                info!("Migrated {} password hashes ({} already current)", migrated, skipped)
            }
        }
        Ok(outcome)
    }

    pub fn schema_version(&self) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT MAX(schemaversion) FROM meta", [], |row| row.get(0))
                .environ("read schema version")
        })
    }
}
