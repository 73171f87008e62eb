use rusqlite::Connection;

use cerca_types::models::{ActionKind, ModerationEntry};

use crate::clock::from_unix;
use crate::error::{DbError, Environ, Result};
use crate::models::LogRow;
use crate::Database;

impl Database {
    /// Appends a moderation log entry stamped with the current time and
    /// returns its id. `recipient_id` is `None` for system-scope events.
    pub fn add_log(
        &self,
        acting_id: i64,
        recipient_id: Option<i64>,
        action: ActionKind,
    ) -> Result<i64> {
        let now = self.now().timestamp();
        self.with_conn(|conn| insert_log(conn, acting_id, recipient_id, action, now))
    }

    /// The whole moderation log, newest first, with the acting, recipient and
    /// quorum users resolved to names.
    pub fn get_logs(&self) -> Result<Vec<ModerationEntry>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT m.id, uact.name, urecv.name, uquorum.name, q.decision, m.action, m.time
                     FROM moderation_log m
                     INNER JOIN users uact ON uact.id = m.actingid
                     LEFT JOIN users urecv ON urecv.id = m.recipientid
                     LEFT JOIN quorum_decisions q ON q.modlogid = m.id
                     LEFT JOIN users uquorum ON uquorum.id = q.userid
                     ORDER BY m.time DESC, m.id DESC",
                )
                .environ("get moderation log")?;

            let rows = stmt
                .query_map([], |row| {
                    Ok(LogRow {
                        id: row.get(0)?,
                        acting_name: row.get(1)?,
                        recipient_name: row.get(2)?,
                        quorum_name: row.get(3)?,
                        quorum_decision: row.get(4)?,
                        action: row.get(5)?,
                        time: row.get(6)?,
                    })
                })
                .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
                .environ("get moderation log")?;

            Ok(rows)
        })?;

        rows.into_iter()
            .map(|row| -> Result<ModerationEntry> {
                let action = ActionKind::from_code(row.action).ok_or_else(|| {
                    DbError::invariant(
                        "get moderation log",
                        format!("entry {} has unknown action code {}", row.id, row.action),
                    )
                })?;
                Ok(ModerationEntry {
                    id: row.id,
                    acting_name: row.acting_name,
                    recipient_name: row.recipient_name,
                    quorum_name: row.quorum_name,
                    quorum_decision: row.quorum_decision,
                    action,
                    time: from_unix(row.time),
                })
            })
            .collect()
    }
}

pub(crate) fn insert_log(
    conn: &Connection,
    acting_id: i64,
    recipient_id: Option<i64>,
    action: ActionKind,
    time: i64,
) -> Result<i64> {
    conn.query_row(
        "INSERT INTO moderation_log (actingid, recipientid, action, time)
         VALUES (?1, ?2, ?3, ?4) RETURNING id",
        (acting_id, recipient_id, action.code(), time),
        |row| row.get(0),
    )
    .environ("add moderation log: insert into moderation log")
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use cerca_types::models::EntryShape;

    use super::*;
    use crate::testutil::{admin, test_db, user};

    #[test]
    fn logs_are_newest_first_with_names() {
        let (db, clock) = test_db();
        let alice = admin(&db, "alice");
        let bob = user(&db, "bob");

        db.add_log(alice, Some(bob), ActionKind::ResetPw).unwrap();
        clock.advance(TimeDelta::minutes(5));
        db.add_log(alice, Some(bob), ActionKind::AdminMake).unwrap();

        let logs = db.get_logs().unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].action, ActionKind::AdminMake);
        assert_eq!(logs[1].action, ActionKind::ResetPw);
        assert_eq!(logs[0].acting_name, "alice");
        assert_eq!(logs[0].recipient_name.as_deref(), Some("bob"));
        assert!(logs[0].time > logs[1].time);
        assert_eq!(logs[0].shape(), EntryShape::DirectEffect);
    }

    #[test]
    fn system_scope_entry_has_no_recipient() {
        let (db, _clock) = test_db();
        let alice = admin(&db, "alice");

        db.add_log(alice, None, ActionKind::AdminAddUser).unwrap();

        let logs = db.get_logs().unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].recipient_name.is_none());
        assert!(logs[0].quorum_decision.is_none());
    }

    #[test]
    fn unknown_action_code_is_an_invariant_violation() {
        let (db, _clock) = test_db();
        let alice = admin(&db, "alice");
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO moderation_log (actingid, action, time) VALUES (?1, 42, 0)",
                [alice],
            )
            .environ("test")
        })
        .unwrap();

        assert!(matches!(db.get_logs(), Err(DbError::Invariant { .. })));
    }
}
