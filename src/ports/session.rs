use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Service, TransferError};

/// Credentials for one service, as handed out by a [`SessionStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Opaque credential persistence. The engine never inspects credentials, it
/// only reacts to `TransferError::Auth`.
#[cfg_attr(test, mockall::automock)]
pub trait SessionStore: Send + Sync {
    fn get_session(&self, service: Service) -> Result<Session, TransferError>;
}
