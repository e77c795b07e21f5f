//! Roster Token Generator
//!
//! Issues a bearer token for local testing, signed the same way the server
//! validates them. Identity and signing parameters come from the environment:
//!
//! - `TOKEN_USER_ID` (required), `TOKEN_USERNAME`, `TOKEN_EMAIL`
//! - `TOKEN_ROLES`: comma-separated, e.g. `ADMIN,MODERATOR`
//! - `JWT_SECRET` (required), `JWT_ISSUER`, `JWT_EXPIRY` (seconds)

use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use roster_common::Role;
use roster_server::auth::{Identity, TokenManager};
use roster_server::config::DEFAULT_JWT_EXPIRY_SECS;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
    if secret.is_empty() {
        bail!("JWT_SECRET must not be empty");
    }

    let user_id = env::var("TOKEN_USER_ID").context("TOKEN_USER_ID must be set")?;
    let expiry = match env::var("JWT_EXPIRY") {
        Ok(v) => v
            .trim()
            .parse::<u64>()
            .with_context(|| format!("JWT_EXPIRY must be a number of seconds, got '{v}'"))?,
        Err(_) => DEFAULT_JWT_EXPIRY_SECS,
    };

    let roles = env::var("TOKEN_ROLES")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|role| !role.is_empty())
        .map(|role| {
            role.parse::<Role>()
                .map(|role| role.as_str().to_string())
                .with_context(|| format!("invalid role in TOKEN_ROLES: {role}"))
        })
        .collect::<Result<_>>()?;

    let identity = Identity {
        username: env::var("TOKEN_USERNAME").unwrap_or_else(|_| user_id.clone()),
        email: env::var("TOKEN_EMAIL").unwrap_or_default(),
        user_id,
        roles,
    };

    let tokens = TokenManager::new(
        &secret,
        Duration::from_secs(expiry),
        env::var("JWT_ISSUER").unwrap_or_else(|_| "roster".into()),
    );

    println!("{}", tokens.generate_token(&identity)?);
    Ok(())
}
