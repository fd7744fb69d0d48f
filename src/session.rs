use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Deserialize;

use crate::error::{Service, TransferError};
use crate::ports::session::{Session, SessionStore};

/// Sessions persisted by a separate login step, one table per service:
///
/// ```toml
/// [spotify]
/// access_token = "..."
/// expires_at = "2026-01-01T00:00:00Z"
///
/// [tidal]
/// access_token = "..."
/// user_id = "12345"
/// country_code = "DE"
/// ```
#[derive(Debug, Default, Deserialize)]
struct SessionsFile {
    #[serde(flatten)]
    services: HashMap<String, Session>,
}

pub struct FileSessionStore {
    path: PathBuf,
    sessions: HashMap<String, Session>,
}

fn service_key(service: Service) -> &'static str {
    match service {
        Service::Spotify => "spotify",
        Service::Tidal => "tidal",
    }
}

impl FileSessionStore {
    /// Read the sessions file. A missing file is an empty store, so the
    /// failure surfaces as an auth error for the service actually needed.
    pub fn load(path: &Path) -> Result<Self, TransferError> {
        let sessions = match std::fs::read_to_string(path) {
            Ok(contents) => {
                toml::from_str::<SessionsFile>(&contents)
                    .map_err(|err| {
                        TransferError::config(format!(
                            "invalid sessions file {}: {}",
                            path.display(),
                            err
                        ))
                    })?
                    .services
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No sessions file at {}", path.display());
                HashMap::new()
            }
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            path: path.to_path_buf(),
            sessions,
        })
    }
}

impl SessionStore for FileSessionStore {
    fn get_session(&self, service: Service) -> Result<Session, TransferError> {
        let session = self.sessions.get(service_key(service)).ok_or_else(|| {
            TransferError::auth(
                service,
                format!("no session stored in {}", self.path.display()),
            )
        })?;

        if session.access_token.trim().is_empty() {
            return Err(TransferError::auth(service, "stored session has no access token"));
        }
        if session.is_expired(Utc::now()) {
            return Err(TransferError::auth(service, "session expired"));
        }
        Ok(session.clone())
    }
}
