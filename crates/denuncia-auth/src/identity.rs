use std::fmt;

use denuncia_types::ServerTimestamp;
use serde::{Deserialize, Serialize};

/// An identity issued by the identity provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user id for the lifetime of the session.
    pub uid: String,
    /// Bearer token presented to the stores.
    pub token: String,
    pub is_anonymous: bool,
    pub issued_at: ServerTimestamp,
}

impl Identity {
    pub fn anonymous(uid: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            token: token.into(),
            is_anonymous: true,
            issued_at: ServerTimestamp::wall_clock(),
        }
    }

    /// First eight characters of the uid, for log lines.
    pub fn short_uid(&self) -> &str {
        self.uid.get(..8).unwrap_or(&self.uid)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("uid", &self.uid)
            .field("token", &"<redacted>")
            .field("is_anonymous", &self.is_anonymous)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}
