//! Quorum-governed moderation proposals.
//!
//! While two or more admins exist, privileged actions are proposed by one
//! admin and finalized (confirmed or vetoed) by any admin. A proposer may
//! veto their own proposal at any time but may only confirm it once
//! [`PROPOSAL_SELF_CONFIRMATION_WAIT_SECS`] have passed.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction};
use tracing::{error, info, warn};

use cerca_types::models::{
    ActionKind, PROPOSAL_SELF_CONFIRMATION_WAIT_SECS, Proposal, RemoveOptions,
    proposal_self_confirmation_wait,
};

use crate::clock::from_unix;
use crate::error::{DbError, Environ, OptionalExt, Result};
use crate::modlog::insert_log;
use crate::removal::remove_user_in;
use crate::users::{add_admin_in, demote_admin_in, quorum_active_in, user_exists};
use crate::{Database, exists};

/// How pending proposals are deduplicated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProposalScope {
    /// At most one pending proposal per action kind, whatever the recipient.
    #[default]
    PerAction,
    /// At most one pending proposal per (action kind, recipient).
    PerRecipient,
}

/// What a call to [`Database::finalize_proposal`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalization {
    /// The proposal was no longer pending.
    AlreadyFinalized,
    /// The proposer tried to confirm before the waiting period ended; the
    /// proposal is still pending.
    TooEarly { opens_at: DateTime<Utc> },
    Vetoed,
    Confirmed { effect: ActionKind, recipient_id: i64 },
}

/// What [`Database::moderate`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Moderation {
    /// No quorum: the effect was carried out and logged.
    Applied,
    /// Quorum active: the matching proposal is pending. `created` is false
    /// when one of the same kind already was.
    Proposed { created: bool },
}

impl Database {
    /// Opens a proposal for `action` against `recipient_id`.
    ///
    /// Returns `false` without writing anything if a proposal of the same
    /// kind is already pending (see [`ProposalScope`]).
    pub fn propose(
        &self,
        proposer_id: i64,
        recipient_id: i64,
        action: ActionKind,
    ) -> Result<bool> {
        const ENVIRON: &str = "propose mod action";
        if !action.is_proposal() {
            return Err(DbError::precondition(ENVIRON, "action is not a proposal kind"));
        }

        let now = self.now().timestamp();
        let scope = self.scope;
        let created = self.with_tx(ENVIRON, |tx| {
            propose_in(tx, scope, proposer_id, recipient_id, action, now)
        })?;

        log_proposal(created, proposer_id, recipient_id, action);
        Ok(created)
    }

    /// Carries out `effect` immediately and logs it, in one transaction.
    pub fn apply_effect(
        &self,
        acting_id: i64,
        recipient_id: i64,
        effect: ActionKind,
    ) -> Result<()> {
        let now = self.now().timestamp();
        let deleted_id = self.deleted_user_id;

        self.with_tx("apply mod action", |tx| {
            apply_effect_in(tx, deleted_id, acting_id, recipient_id, effect, now)
        })?;

        info!("User {} applied {} to user {}", acting_id, effect, recipient_id);
        Ok(())
    }

    /// The entry point for privileged actions: applies `effect` directly
    /// while fewer than two admins exist, otherwise opens the matching
    /// proposal.
    ///
    /// The admin count is read in the same transaction that acts on it, so
    /// concurrent requests cannot both take the direct path.
    pub fn moderate(
        &self,
        acting_id: i64,
        recipient_id: i64,
        effect: ActionKind,
    ) -> Result<Moderation> {
        const ENVIRON: &str = "moderate";
        let proposal = effect
            .proposal()
            .ok_or_else(|| DbError::precondition(ENVIRON, "action cannot be proposed"))?;

        let now = self.now().timestamp();
        let deleted_id = self.deleted_user_id;
        let scope = self.scope;

        let outcome = self.with_tx(ENVIRON, |tx| {
            if !quorum_active_in(tx)? {
                apply_effect_in(tx, deleted_id, acting_id, recipient_id, effect, now)?;
                return Ok(Moderation::Applied);
            }
            let created = propose_in(tx, scope, acting_id, recipient_id, proposal, now)?;
            Ok(Moderation::Proposed { created })
        })?;

        match outcome {
            Moderation::Applied => {
                info!("User {} applied {} to user {}", acting_id, effect, recipient_id)
            }
            Moderation::Proposed { created } => {
                log_proposal(created, acting_id, recipient_id, proposal)
            }
        }
        Ok(outcome)
    }

    /// Confirms (`decision = true`) or vetoes a pending proposal.
    ///
    /// The log entry and quorum decision commit first; a confirmed effect is
    /// carried out afterwards, outside that transaction.
    pub fn finalize_proposal(
        &self,
        proposal_id: i64,
        admin_id: i64,
        decision: bool,
    ) -> Result<Finalization> {
        const ENVIRON: &str = "finalize proposal";
        let now = self.now();

        let outcome = self.with_tx(ENVIRON, |tx| {
            finalize_in(tx, proposal_id, admin_id, decision, now)
        })?;

        match outcome {
            Finalization::AlreadyFinalized => {
                info!("Proposal {} was already finalized", proposal_id);
            }
            Finalization::TooEarly { opens_at } => {
                info!(
                    "User {} tried to self-confirm proposal {} before {}",
                    admin_id, proposal_id, opens_at
                );
            }
            Finalization::Vetoed => {
                info!("User {} vetoed proposal {}", admin_id, proposal_id);
            }
            Finalization::Confirmed { effect, recipient_id } => {
                info!("User {} confirmed proposal {} ({})", admin_id, proposal_id, effect);
                let applied = match effect {
                    ActionKind::AdminMake => self.add_admin(recipient_id),
                    ActionKind::AdminDemote => self.demote_admin(recipient_id),
                    ActionKind::RemoveUser => {
                        self.remove_user(recipient_id, RemoveOptions::default())
                    }
                    other => {
                        Err(DbError::invariant(ENVIRON, format!("no dispatch for {other}")))
                    }
                };
                if let Err(e) = applied {
                    error!(
                        "Proposal {} was confirmed but its effect failed: {}",
                        proposal_id, e
                    );
                    return Err(e);
                }
            }
        }
        Ok(outcome)
    }

    /// Pending proposals, oldest first.
    pub fn get_proposals(&self) -> Result<Vec<Proposal>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT p.id, p.proposerid, uprop.name, p.recipientid, urecv.name,
                            p.action, p.time
                     FROM moderation_proposals p
                     INNER JOIN users uprop ON uprop.id = p.proposerid
                     INNER JOIN users urecv ON urecv.id = p.recipientid
                     ORDER BY p.time, p.id",
                )
                .environ("get proposals")?;

            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                })
                .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
                .environ("get proposals")?;

            Ok(rows)
        })?;

        rows.into_iter()
            .map(|(id, proposer_id, proposer_name, recipient_id, recipient_name, code, time)| {
                let Some(action) = ActionKind::from_code(code) else {
                    return Err(DbError::invariant(
                        "get proposals",
                        format!("proposal {id} has unknown action code {code}"),
                    ));
                };
                let time = from_unix(time);
                Ok(Proposal {
                    id,
                    proposer_id,
                    proposer_name,
                    recipient_id,
                    recipient_name,
                    action,
                    time,
                    self_confirm_after: time + proposal_self_confirmation_wait(),
                })
            })
            .collect::<Result<Vec<_>>>()
    }
}

fn log_proposal(created: bool, proposer_id: i64, recipient_id: i64, action: ActionKind) {
    if created {
        info!("User {} proposed {} for user {}", proposer_id, action, recipient_id);
    } else {
        info!("Dropped duplicate {} proposal from user {}", action, proposer_id);
    }
}

fn propose_in(
    tx: &Connection,
    scope: ProposalScope,
    proposer_id: i64,
    recipient_id: i64,
    action: ActionKind,
    now: i64,
) -> Result<bool> {
    let pending = match scope {
        ProposalScope::PerAction => exists(
            tx,
            "SELECT 1 FROM moderation_proposals WHERE action = ?1",
            [action.code()],
        ),
        ProposalScope::PerRecipient => exists(
            tx,
            "SELECT 1 FROM moderation_proposals WHERE action = ?1 AND recipientid = ?2",
            [action.code(), recipient_id],
        ),
    }
    .environ("propose mod action: check pending proposals")?;

    if pending {
        return Ok(false);
    }

    tx.execute(
        "INSERT INTO moderation_proposals (proposerid, recipientid, time, action)
         VALUES (?1, ?2, ?3, ?4)",
        (proposer_id, recipient_id, now, action.code()),
    )
    .environ("propose mod action: insert into proposals table")?;

    insert_log(tx, proposer_id, Some(recipient_id), action, now)?;
    Ok(true)
}

fn apply_effect_in(
    tx: &Connection,
    deleted_id: i64,
    acting_id: i64,
    recipient_id: i64,
    effect: ActionKind,
    now: i64,
) -> Result<()> {
    const ENVIRON: &str = "apply mod action";
    match effect {
        ActionKind::AdminMake => add_admin_in(tx, deleted_id, recipient_id)?,
        ActionKind::AdminDemote => demote_admin_in(tx, recipient_id)?,
        ActionKind::RemoveUser => {
            // Logged first; the removal then repoints the entry's
            // recipient at the sentinel along with everything else.
            if !user_exists(tx, recipient_id)? {
                return Err(DbError::not_found(ENVIRON));
            }
            insert_log(tx, acting_id, Some(recipient_id), effect, now)?;
            return remove_user_in(tx, deleted_id, recipient_id, RemoveOptions::default());
        }
        _ => return Err(DbError::precondition(ENVIRON, "action has no direct effect")),
    }
    insert_log(tx, acting_id, Some(recipient_id), effect, now)?;
    Ok(())
}

fn finalize_in(
    tx: &Transaction<'_>,
    proposal_id: i64,
    admin_id: i64,
    decision: bool,
    now: DateTime<Utc>,
) -> Result<Finalization> {
    let row = tx
        .query_row(
            "SELECT proposerid, recipientid, action, time FROM moderation_proposals WHERE id = ?1",
            [proposal_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .environ("finalize proposal: select proposal")
        .optional()?;

    // Someone else finalized it first.
    let Some((proposer_id, recipient_id, action_code, proposal_time)) = row else {
        return Ok(Finalization::AlreadyFinalized);
    };

    if decision && admin_id == proposer_id {
        let opens_at = from_unix(proposal_time + PROPOSAL_SELF_CONFIRMATION_WAIT_SECS);
        if now < opens_at {
            return Ok(Finalization::TooEarly { opens_at });
        }
    }

    let effect = ActionKind::from_code(action_code)
        .and_then(ActionKind::effect)
        .ok_or_else(|| {
            warn!("Proposal {} carries unknown action code {}", proposal_id, action_code);
            DbError::invariant(
                "finalize proposal",
                format!("proposal {proposal_id} has unknown action code {action_code}"),
            )
        })?;

    tx.execute("DELETE FROM moderation_proposals WHERE id = ?1", [proposal_id])
        .environ("finalize proposal: delete proposal")?;

    let modlog_id = insert_log(tx, proposer_id, Some(recipient_id), effect, now.timestamp())?;

    tx.execute(
        "INSERT INTO quorum_decisions (userid, decision, modlogid) VALUES (?1, ?2, ?3)",
        (admin_id, decision, modlog_id),
    )
    .environ("finalize proposal: insert into quorum decisions")?;

    if decision {
        Ok(Finalization::Confirmed { effect, recipient_id })
    } else {
        Ok(Finalization::Vetoed)
    }
}
