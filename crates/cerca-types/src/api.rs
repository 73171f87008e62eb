use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{EntryShape, ModerationEntry, Proposal, User};

// -- JWT Claims --

/// JWT claims shared by the auth handlers and the request middleware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    /// Where the user came from, e.g. an invite link. Stored with the host.
    #[serde(default)]
    pub link: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: i64,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: i64,
    pub username: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteAccountRequest {
    pub password: String,
    #[serde(default)]
    pub keep_content: bool,
    #[serde(default)]
    pub keep_username: bool,
}

// -- Admin --

/// Target of a privileged action, by account name.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdminActionRequest {
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationOutcome {
    /// The effect was carried out immediately (no quorum).
    Applied,
    /// A proposal is pending (or one of the same kind already was).
    Proposed,
}

#[derive(Debug, Serialize)]
pub struct ModerationResponse {
    pub outcome: ModerationOutcome,
}

/// Result of confirming or vetoing a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FinalizeResponse {
    AlreadyFinalized,
    TooEarly { opens_at: DateTime<Utc> },
    Vetoed,
    Confirmed,
}

/// Freshly generated credentials, shown once to the admin who created them.
#[derive(Debug, Serialize)]
pub struct CredentialsResponse {
    pub user_id: i64,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AdminsResponse {
    pub admins: Vec<User>,
    pub quorum_active: bool,
}

#[derive(Debug, Serialize)]
pub struct ProposalsResponse {
    pub proposals: Vec<Proposal>,
}

#[derive(Debug, Serialize)]
pub struct ModerationLogItem {
    pub shape: EntryShape,
    #[serde(flatten)]
    pub entry: ModerationEntry,
}

impl From<ModerationEntry> for ModerationLogItem {
    fn from(entry: ModerationEntry) -> Self {
        Self {
            shape: entry.shape(),
            entry,
        }
    }
}
