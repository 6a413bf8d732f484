use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::error::AuthResult;
use crate::identity::Identity;
use crate::provider::IdentityProvider;

/// Holds the process's current identity.
///
/// The session lock is held across the provider request, so concurrent
/// callers of [`ensure_session`](Self::ensure_session) share a single
/// sign-in rather than racing to create several identities.
pub struct SessionManager {
    provider: Arc<dyn IdentityProvider>,
    current: Mutex<Option<Identity>>,
}

impl SessionManager {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            current: Mutex::new(None),
        }
    }

    /// Return the current identity, signing in anonymously if there is none.
    pub async fn ensure_session(&self) -> AuthResult<Identity> {
        let mut current = self.current.lock().await;
        if let Some(identity) = current.as_ref() {
            return Ok(identity.clone());
        }
        let identity = self.provider.sign_in_anonymously().await?;
        info!(uid = identity.short_uid(), "anonymous session established");
        *current = Some(identity.clone());
        Ok(identity)
    }

    /// The current identity without signing in.
    pub async fn current(&self) -> Option<Identity> {
        self.current.lock().await.clone()
    }

    /// End the current session. A no-op when signed out.
    pub async fn sign_out(&self) -> AuthResult<()> {
        let mut current = self.current.lock().await;
        if let Some(identity) = current.take() {
            self.provider.sign_out(&identity).await?;
            info!(uid = identity.short_uid(), "session ended");
        }
        Ok(())
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use crate::memory::LocalIdentityProvider;

    fn manager() -> (Arc<LocalIdentityProvider>, SessionManager) {
        let provider = Arc::new(LocalIdentityProvider::new());
        let manager = SessionManager::new(provider.clone());
        (provider, manager)
    }

    #[tokio::test]
    async fn ensure_session_is_idempotent() {
        let (provider, sessions) = manager();
        let a = sessions.ensure_session().await.unwrap();
        let b = sessions.ensure_session().await.unwrap();
        assert_eq!(a, b);
        assert_eq!(provider.sign_in_requests(), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_sign_in() {
        let (provider, sessions) = manager();
        let sessions = Arc::new(sessions);
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let sessions = Arc::clone(&sessions);
                tokio::spawn(async move { sessions.ensure_session().await.unwrap() })
            })
            .collect();
        let mut uids = Vec::new();
        for task in tasks {
            uids.push(task.await.unwrap().uid);
        }
        uids.dedup();
        assert_eq!(uids.len(), 1);
        assert_eq!(provider.sign_in_requests(), 1);
    }

    #[tokio::test]
    async fn rejection_is_surfaced_and_not_cached() {
        let (provider, sessions) = manager();
        provider.set_anonymous_enabled(false);
        assert!(matches!(
            sessions.ensure_session().await,
            Err(AuthError::MethodDisabled(_))
        ));
        assert!(sessions.current().await.is_none());

        provider.set_anonymous_enabled(true);
        assert!(sessions.ensure_session().await.is_ok());
    }

    #[tokio::test]
    async fn sign_out_forces_new_identity() {
        let (provider, sessions) = manager();
        let first = sessions.ensure_session().await.unwrap();
        sessions.sign_out().await.unwrap();
        assert!(sessions.current().await.is_none());
        assert!(!provider.verify(&first.uid, &first.token));

        let second = sessions.ensure_session().await.unwrap();
        assert_ne!(first.uid, second.uid);
        // Signing out twice is harmless.
        sessions.sign_out().await.unwrap();
        sessions.sign_out().await.unwrap();
    }
}
