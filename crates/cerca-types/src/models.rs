use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Reserved account name used as the foreign-key target for removed users.
/// Cannot be registered.
pub const DELETED_USER_NAME: &str = "deleted user";

/// How long a proposer must wait before confirming their own proposal, in seconds.
pub const PROPOSAL_SELF_CONFIRMATION_WAIT_SECS: i64 = 7 * 24 * 60 * 60;

pub fn proposal_self_confirmation_wait() -> TimeDelta {
    TimeDelta::seconds(PROPOSAL_SELF_CONFIRMATION_WAIT_SECS)
}

/// Moderation action codes as persisted in `moderation_log.action` and
/// `moderation_proposals.action`.
///
/// The discriminants are stored in the database. Never renumber; append new
/// kinds with the next unused integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ResetPw = 0,
    AdminVeto = 1,
    AdminMake = 2,
    RemoveUser = 3,
    AdminAddUser = 4,
    AdminDemote = 5,
    AdminConfirm = 6,
    ProposeDemoteAdmin = 7,
    ProposeMakeAdmin = 8,
    ProposeRemoveUser = 9,
}

impl ActionKind {
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => Self::ResetPw,
            1 => Self::AdminVeto,
            2 => Self::AdminMake,
            3 => Self::RemoveUser,
            4 => Self::AdminAddUser,
            5 => Self::AdminDemote,
            6 => Self::AdminConfirm,
            7 => Self::ProposeDemoteAdmin,
            8 => Self::ProposeMakeAdmin,
            9 => Self::ProposeRemoveUser,
            _ => return None,
        })
    }

    pub fn is_proposal(self) -> bool {
        self.effect().is_some()
    }

    /// The effect a confirmed proposal of this kind carries out.
    /// `None` for kinds that are not proposals.
    pub fn effect(self) -> Option<ActionKind> {
        match self {
            Self::ProposeDemoteAdmin => Some(Self::AdminDemote),
            Self::ProposeMakeAdmin => Some(Self::AdminMake),
            Self::ProposeRemoveUser => Some(Self::RemoveUser),
            _ => None,
        }
    }

    /// The proposal kind that leads to this effect, if quorum applies to it.
    pub fn proposal(self) -> Option<ActionKind> {
        match self {
            Self::AdminDemote => Some(Self::ProposeDemoteAdmin),
            Self::AdminMake => Some(Self::ProposeMakeAdmin),
            Self::RemoveUser => Some(Self::ProposeRemoveUser),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ResetPw => "reset password",
            Self::AdminVeto => "veto",
            Self::AdminMake => "make admin",
            Self::RemoveUser => "remove user",
            Self::AdminAddUser => "add user",
            Self::AdminDemote => "demote admin",
            Self::AdminConfirm => "confirm",
            Self::ProposeDemoteAdmin => "propose demote admin",
            Self::ProposeMakeAdmin => "propose make admin",
            Self::ProposeRemoveUser => "propose remove user",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
}

/// Visible artifact left behind when an account is removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveOptions {
    #[serde(default)]
    pub keep_content: bool,
    #[serde(default)]
    pub keep_username: bool,
}

/// A pending moderation proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: i64,
    pub proposer_id: i64,
    pub proposer_name: String,
    pub recipient_id: i64,
    pub recipient_name: String,
    pub action: ActionKind,
    pub time: DateTime<Utc>,
    /// Earliest time at which the proposer may confirm their own proposal.
    pub self_confirm_after: DateTime<Utc>,
}

/// One row of the moderation log, joined with user names and any quorum
/// decision that finalized it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationEntry {
    pub id: i64,
    pub acting_name: String,
    pub recipient_name: Option<String>,
    pub quorum_name: Option<String>,
    pub quorum_decision: Option<bool>,
    pub action: ActionKind,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryShape {
    /// "X proposed Y / Z confirmed" (or vetoed).
    Finalization,
    /// "X proposed Y".
    ProposalAnnouncement,
    /// "X did Y".
    DirectEffect,
}

impl ModerationEntry {
    pub fn shape(&self) -> EntryShape {
        if self.quorum_decision.is_some() {
            EntryShape::Finalization
        } else if self.action.is_proposal() {
            EntryShape::ProposalAnnouncement
        } else {
            EntryShape::DirectEffect
        }
    }
}

/// A post as stored beneath a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub thread_id: i64,
    pub author_id: i64,
    pub author_name: String,
    pub content: String,
    pub publish_time: DateTime<Utc>,
    pub last_edit: Option<DateTime<Utc>>,
}
