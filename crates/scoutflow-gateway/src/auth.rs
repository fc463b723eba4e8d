//! Caller identity and session ownership

use axum::http::HeaderMap;
use scoutflow_core::{Error, Result, SessionId};

/// Header carrying the caller's user id. Authenticating it is left to
/// whatever sits in front of the gateway.
pub const USER_HEADER: &str = "x-user-id";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
}

impl Caller {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into() }
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let user = headers.get(USER_HEADER)?.to_str().ok()?.trim();
        if user.is_empty() {
            return None;
        }
        Some(Self::new(user))
    }

    /// A caller may only touch ids in its own `{user_id}-` namespace, and
    /// only sessions it owns once they exist.
    pub fn verify_session(&self, session: &SessionId, owner: Option<&str>) -> Result<()> {
        let denied = || Error::AccessDenied {
            session: session.to_string(),
        };
        if !session.is_owned_by(&self.user_id) {
            return Err(denied());
        }
        match owner {
            Some(owner) if owner != self.user_id => Err(denied()),
            _ => Ok(()),
        }
    }
}

/// Resolve the caller from `headers` and check it against `session`.
pub fn authorize(headers: &HeaderMap, session: &SessionId, owner: Option<&str>) -> Result<Caller> {
    let caller = Caller::from_headers(headers).ok_or_else(|| Error::AccessDenied {
        session: session.to_string(),
    })?;
    caller.verify_session(session, owner)?;
    Ok(caller)
}
