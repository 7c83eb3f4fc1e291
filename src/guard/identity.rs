//! Identifier derivation from request context.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Fallback identifier when the client address is unknown.
pub const UNKNOWN_ADDRESS: &str = "unknown";
/// Fallback identifier when the caller is not authenticated.
pub const ANONYMOUS: &str = "anonymous";

/// What a host knows about the caller of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestIdentity {
    /// Remote peer address
    pub remote_addr: Option<IpAddr>,
    /// Authenticated user name
    pub user_name: Option<String>,
    /// Authenticated user id
    pub user_id: Option<String>,
    /// Authenticated user's email
    pub email: Option<String>,
}

impl RequestIdentity {
    /// An unauthenticated caller at `addr`.
    pub fn from_addr(addr: IpAddr) -> Self {
        Self {
            remote_addr: Some(addr),
            ..Default::default()
        }
    }

    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }

    pub fn with_user_id(mut self, id: impl Into<String>) -> Self {
        self.user_id = Some(id.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// How a policy derives the rate-limited subject from a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierStrategy {
    /// Client address
    #[default]
    Ip,
    /// User name, then user id
    User,
    /// User id
    UserId,
    /// User email
    Email,
    /// Client address and user id combined
    Custom,
}

impl IdentifierStrategy {
    /// Derive the identifier for `identity`.
    pub fn resolve(&self, identity: &RequestIdentity) -> String {
        match self {
            IdentifierStrategy::Ip => address(identity),
            IdentifierStrategy::User => identity
                .user_name
                .as_deref()
                .or(identity.user_id.as_deref())
                .unwrap_or(ANONYMOUS)
                .to_string(),
            IdentifierStrategy::UserId => user_id(identity),
            IdentifierStrategy::Email => identity
                .email
                .as_deref()
                .unwrap_or(ANONYMOUS)
                .to_string(),
            IdentifierStrategy::Custom => format!("{}_{}", address(identity), user_id(identity)),
        }
    }
}

fn address(identity: &RequestIdentity) -> String {
    identity
        .remote_addr
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string())
}

fn user_id(identity: &RequestIdentity) -> String {
    identity
        .user_id
        .clone()
        .unwrap_or_else(|| ANONYMOUS.to_string())
}
