use chrono::{DateTime, TimeZone, Utc};

use crate::{Database, ManualClock};

/// A well-formed modern hash; nothing verifies against it.
pub(crate) const HASH: &str = concat!(
    "$argon2id$v=19$m=65536,t=3,p=4",
    "$c2FsdHNhbHRzYWx0c2FsdA",
    "$aGFzaGhhc2hoYXNoaGFzaGhhc2hoYXNoaGFzaGhhc2g",
);

pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 16, 12, 0, 0).unwrap()
}

pub(crate) fn test_db() -> (Database, ManualClock) {
    let clock = ManualClock::new(t0());
    let db = Database::open_in_memory().unwrap().with_clock(clock.clone());
    (db, clock)
}

pub(crate) fn user(db: &Database, name: &str) -> i64 {
    db.create_user(name, HASH).unwrap()
}

pub(crate) fn admin(db: &Database, name: &str) -> i64 {
    let id = user(db, name);
    db.add_admin(id).unwrap();
    id
}

/// Number of rows in `table` where `column = value`.
pub(crate) fn count(db: &Database, table: &str, column: &str, value: i64) -> i64 {
    db.with_conn(|conn| {
        conn.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE {column} = ?1"),
            [value],
            |row| row.get(0),
        )
        .map_err(|source| crate::DbError::Storage {
            environ: "count".into(),
            source,
        })
    })
    .unwrap()
}
