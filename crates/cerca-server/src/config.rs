use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

use cerca_db::ProposalScope;

/// Secrets that ship in sample configs and must never reach production.
const PLACEHOLDER_SECRETS: &[&str] =
    &["", "changeme", "change-me", "dev-secret-change-me", "secret"];

pub struct Config {
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub jwt_secret: String,
    pub proposal_scope: ProposalScope,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let db_path = env::var("CERCA_DB_PATH").unwrap_or_else(|_| "cerca.db".into());
        let host = env::var("CERCA_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env::var("CERCA_PORT")
            .unwrap_or_else(|_| "8272".into())
            .parse()
            .context("CERCA_PORT")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .context("CERCA_HOST")?;

        let jwt_secret = env::var("CERCA_JWT_SECRET").context("CERCA_JWT_SECRET must be set")?;
        check_secret(&jwt_secret)?;

        let proposal_scope = match env::var("CERCA_PROPOSAL_SCOPE") {
            Ok(value) => parse_scope(&value)?,
            Err(_) => ProposalScope::default(),
        };

        Ok(Self {
            db_path: PathBuf::from(db_path),
            addr,
            jwt_secret,
            proposal_scope,
        })
    }

    /// Only what `cerca migrate` needs.
    pub fn db_path_from_env() -> PathBuf {
        PathBuf::from(env::var("CERCA_DB_PATH").unwrap_or_else(|_| "cerca.db".into()))
    }
}

fn check_secret(secret: &str) -> anyhow::Result<()> {
    if PLACEHOLDER_SECRETS.contains(&secret.trim()) {
        bail!("CERCA_JWT_SECRET is a placeholder; set a real secret");
    }
    Ok(())
}

fn parse_scope(value: &str) -> anyhow::Result<ProposalScope> {
    match value {
        "action" => Ok(ProposalScope::PerAction),
        "recipient" => Ok(ProposalScope::PerRecipient),
        other => bail!("CERCA_PROPOSAL_SCOPE must be `action` or `recipient`, got `{other}`"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_secrets_are_rejected() {
        assert!(check_secret("dev-secret-change-me").is_err());
        assert!(check_secret("  ").is_err());
        assert!(check_secret("b9c4f0e2d17a").is_ok());
    }

    #[test]
    fn scopes() {
        assert_eq!(parse_scope("action").unwrap(), ProposalScope::PerAction);
        assert_eq!(parse_scope("recipient").unwrap(), ProposalScope::PerRecipient);
        assert!(parse_scope("Recipient").is_err());
    }
}
