use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::warn;

use twofold_gateway::ChatPolicy;

/// Placeholder JWT secrets that are only acceptable in development.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

pub struct ServerConfig {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub token_ttl: chrono::Duration,
    pub policy: ChatPolicy,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret =
            lookup("TWOFOLD_JWT_SECRET").unwrap_or_else(|| "dev-secret-change-me".into());
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            warn!("TWOFOLD_JWT_SECRET is unset or a placeholder; tokens are forgeable");
        }

        let db_path: PathBuf = lookup("TWOFOLD_DB_PATH")
            .unwrap_or_else(|| "twofold.db".into())
            .into();
        let host = lookup("TWOFOLD_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = lookup("TWOFOLD_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("TWOFOLD_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", host, port))?;

        let ttl_days: i64 = lookup("TWOFOLD_TOKEN_TTL_DAYS")
            .unwrap_or_else(|| "30".into())
            .parse()
            .context("TWOFOLD_TOKEN_TTL_DAYS must be an integer")?;

        let defaults = ChatPolicy::default();
        let policy = ChatPolicy {
            strict_membership: flag(
                &lookup,
                "TWOFOLD_STRICT_MEMBERSHIP",
                defaults.strict_membership,
            )?,
            ack_send_failures: flag(
                &lookup,
                "TWOFOLD_ACK_SEND_FAILURES",
                defaults.ack_send_failures,
            )?,
            allow_self_chat: flag(&lookup, "TWOFOLD_ALLOW_SELF_CHAT", defaults.allow_self_chat)?,
        };

        Ok(Self {
            jwt_secret,
            db_path,
            addr,
            token_ttl: chrono::Duration::days(ttl_days),
            policy,
        })
    }
}

fn flag<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => anyhow::bail!("{} must be true or false, got '{}'", key, other),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<ServerConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.addr.port(), 3000);
        assert_eq!(cfg.db_path, PathBuf::from("twofold.db"));
        assert_eq!(cfg.token_ttl, chrono::Duration::days(30));
        assert!(!cfg.policy.strict_membership);
        assert!(!cfg.policy.ack_send_failures);
        assert!(cfg.policy.allow_self_chat);
    }

    #[test]
    fn overrides() {
        let cfg = config(&[
            ("TWOFOLD_HOST", "127.0.0.1"),
            ("TWOFOLD_PORT", "8080"),
            ("TWOFOLD_STRICT_MEMBERSHIP", "true"),
            ("TWOFOLD_ACK_SEND_FAILURES", "1"),
            ("TWOFOLD_ALLOW_SELF_CHAT", "off"),
        ])
        .unwrap();
        assert_eq!(cfg.addr.to_string(), "127.0.0.1:8080");
        assert!(cfg.policy.strict_membership);
        assert!(cfg.policy.ack_send_failures);
        assert!(!cfg.policy.allow_self_chat);
    }

    #[test]
    fn rejects_garbage() {
        assert!(config(&[("TWOFOLD_PORT", "http")]).is_err());
        assert!(config(&[("TWOFOLD_STRICT_MEMBERSHIP", "maybe")]).is_err());
    }
}
