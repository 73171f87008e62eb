//! Row types that map directly to SQLite rows. The cerca-types models carry
//! joined names and typed actions instead.

#[derive(Debug, Clone)]
pub struct CredentialsRow {
    pub id: i64,
    pub name: String,
    pub password_hash: String,
}

#[derive(Debug)]
pub(crate) struct LogRow {
    pub id: i64,
    pub acting_name: String,
    pub recipient_name: Option<String>,
    pub quorum_name: Option<String>,
    pub quorum_decision: Option<bool>,
    pub action: i64,
    pub time: i64,
}
