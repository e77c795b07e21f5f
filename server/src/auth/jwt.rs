//! JWT Token Generation and Validation
//!
//! Tokens are signed with HS256 using a shared secret. Validation accepts
//! no other algorithm, checks the issuer, and applies zero leeway to the
//! validity window.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::error::{AuthError, AuthResult};

/// The only signing algorithm the authenticator accepts.
pub const ALGORITHM: Algorithm = Algorithm::HS256;

/// Authenticated identity carried by a verified token.
///
/// Only [`TokenManager`] produces values of this type from a credential;
/// handlers read it through the call context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub(crate) user_id: String,
    pub(crate) username: String,
    #[serde(default)]
    pub(crate) email: String,
    #[serde(default)]
    pub(crate) roles: BTreeSet<String>,
    /// Issuer.
    pub(crate) iss: String,
    /// Subject (mirrors `user_id`).
    pub(crate) sub: String,
    /// Issued at (Unix timestamp).
    pub(crate) iat: i64,
    /// Not before (Unix timestamp).
    pub(crate) nbf: i64,
    /// Expiration time (Unix timestamp).
    pub(crate) exp: i64,
}

impl Claims {
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    #[must_use]
    pub const fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.iss
    }

    /// Issue time as a Unix timestamp.
    #[must_use]
    pub const fn issued_at(&self) -> i64 {
        self.iat
    }

    /// Expiry as a Unix timestamp.
    #[must_use]
    pub const fn expires_at(&self) -> i64 {
        self.exp
    }

    /// Whether the token carries `role`.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Whether the token carries at least one of `roles`.
    #[must_use]
    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles.iter().any(|role| self.has_role(role.as_ref()))
    }

    /// Identity portion of the claims, as used to issue a new token.
    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
            roles: self.roles.clone(),
        }
    }
}

/// Identity fields a token is issued for.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub roles: BTreeSet<String>,
}

/// Issues, validates and refreshes HS256 tokens.
#[derive(Clone)]
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    expiry_secs: i64,
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("issuer", &self.issuer)
            .field("expiry_secs", &self.expiry_secs)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Create a manager for `secret`. A zero `expiry` falls back to one hour.
    pub fn new(secret: &str, expiry: Duration, issuer: impl Into<String>) -> Self {
        let expiry = if expiry.is_zero() {
            Duration::from_secs(3600)
        } else {
            expiry
        };

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.into(),
            expiry_secs: i64::try_from(expiry.as_secs()).unwrap_or(i64::MAX),
        }
    }

    /// Token issuer this manager signs with and accepts.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Issue a token for `identity` valid from now for the configured expiry.
    pub fn generate_token(&self, identity: &Identity) -> AuthResult<String> {
        let now = Utc::now().timestamp();

        let claims = Claims {
            user_id: identity.user_id.clone(),
            username: identity.username.clone(),
            email: identity.email.clone(),
            roles: identity.roles.clone(),
            iss: self.issuer.clone(),
            sub: identity.user_id.clone(),
            iat: now,
            nbf: now,
            exp: now.saturating_add(self.expiry_secs),
        };

        encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("token signing failed: {e}")))
    }

    /// Validate a token and return its claims.
    pub fn validate_token(&self, token: &str) -> AuthResult<Claims> {
        let mut validation = self.validation();
        validation.validate_exp = true;
        validation.validate_nbf = true;

        self.decode(token, &validation)
    }

    /// Re-issue a token with the same identity and a fresh expiry.
    ///
    /// The presented token may be expired; its signature, algorithm and
    /// issuer must still verify.
    pub fn refresh_token(&self, token: &str) -> AuthResult<String> {
        let mut validation = self.validation();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims.remove("exp");

        let claims = self.decode(token, &validation)?;
        self.generate_token(&claims.identity())
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation
    }

    fn decode(&self, token: &str, validation: &Validation) -> AuthResult<Claims> {
        let header = decode_header(token).map_err(|_| AuthError::MalformedToken)?;
        if header.alg != ALGORITHM {
            return Err(AuthError::UnsupportedAlgorithm);
        }

        let claims = decode::<Claims>(token, &self.decoding_key, validation)?.claims;
        if claims.user_id.is_empty() {
            return Err(AuthError::InvalidClaims);
        }

        Ok(claims)
    }
}
