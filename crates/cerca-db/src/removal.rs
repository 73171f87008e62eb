use rusqlite::Connection;
use tracing::info;

use cerca_types::models::RemoveOptions;

use crate::error::{DbError, Environ, Result};
use crate::users::user_exists;
use crate::Database;

/// Content written over the posts of a removed user unless kept.
pub const DELETED_CONTENT: &str = "_deleted_";

impl Database {
    /// Deletes an account without cascading: every row that references the
    /// user is repointed at the deleted-user sentinel, so threads and posts
    /// stay readable in place.
    ///
    /// `keep_content` leaves post bodies intact. `keep_username` does not
    /// change which rows are rewritten: authorship always moves to the
    /// sentinel because the user row itself is gone.
    pub fn remove_user(&self, user_id: i64, options: RemoveOptions) -> Result<()> {
        let deleted_id = self.deleted_user_id;
        self.with_tx("remove user", |tx| remove_user_in(tx, deleted_id, user_id, options))?;
        info!("Removed user {}", user_id);
        Ok(())
    }
}

pub(crate) fn remove_user_in(
    tx: &Connection,
    deleted_id: i64,
    user_id: i64,
    options: RemoveOptions,
) -> Result<()> {
    const ENVIRON: &str = "remove user";
    if user_id == deleted_id {
        return Err(DbError::precondition(ENVIRON, "cannot remove the deleted-user sentinel"));
    }
    if !user_exists(tx, user_id)? {
        return Err(DbError::not_found(ENVIRON));
    }

    let mut threads = tx
        .prepare("UPDATE threads SET authorid = ?1 WHERE authorid = ?2")
        .environ("remove user: prepare threads")?;
    let mut posts = if options.keep_content {
        tx.prepare("UPDATE posts SET authorid = ?1 WHERE authorid = ?2")
    } else {
        tx.prepare("UPDATE posts SET content = ?3, authorid = ?1 WHERE authorid = ?2")
    }
    .environ("remove user: prepare posts")?;
    let mut log_recipient = tx
        .prepare("UPDATE moderation_log SET recipientid = ?1 WHERE recipientid = ?2")
        .environ("remove user: prepare moderation log recipient")?;
    let mut log_acting = tx
        .prepare("UPDATE moderation_log SET actingid = ?1 WHERE actingid = ?2")
        .environ("remove user: prepare moderation log acting")?;
    let mut registrations = tx
        .prepare("DELETE FROM registrations WHERE userid = ?1")
        .environ("remove user: prepare registrations")?;

    threads
        .execute([deleted_id, user_id])
        .environ("remove user: rewrite threads")?;
    let rewritten = if options.keep_content {
        posts.execute((deleted_id, user_id))
    } else {
        posts.execute((deleted_id, user_id, DELETED_CONTENT))
    };
    rewritten.environ("remove user: rewrite posts")?;
    log_recipient
        .execute([deleted_id, user_id])
        .environ("remove user: rewrite moderation log recipient")?;
    log_acting
        .execute([deleted_id, user_id])
        .environ("remove user: rewrite moderation log acting")?;
    registrations
        .execute([user_id])
        .environ("remove user: delete registrations")?;

    // Remaining references: quorum decisions, proposals, admin membership.
    tx.execute(
        "UPDATE quorum_decisions SET userid = ?1 WHERE userid = ?2",
        [deleted_id, user_id],
    )
    .environ("remove user: rewrite quorum decisions")?;
    tx.execute(
        "DELETE FROM moderation_proposals WHERE recipientid = ?1",
        [user_id],
    )
    .environ("remove user: delete proposals for user")?;
    tx.execute(
        "UPDATE moderation_proposals SET proposerid = ?1 WHERE proposerid = ?2",
        [deleted_id, user_id],
    )
    .environ("remove user: rewrite proposals by user")?;
    tx.execute("DELETE FROM admins WHERE id = ?1", [user_id])
        .environ("remove user: delete from admins")?;

    tx.execute("DELETE FROM users WHERE id = ?1", [user_id])
        .environ("remove user: delete from users")?;
    Ok(())
}
