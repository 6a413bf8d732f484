use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rand::RngCore;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};
use crate::identity::Identity;
use crate::provider::IdentityProvider;

/// In-process identity provider issuing anonymous identities.
///
/// Anonymous sign-in can be switched off to mirror a provider where the
/// method is disabled.
#[derive(Debug)]
pub struct LocalIdentityProvider {
    anonymous_enabled: AtomicBool,
    issued: Mutex<HashMap<String, String>>,
    sign_in_requests: AtomicUsize,
}

impl LocalIdentityProvider {
    pub fn new() -> Self {
        Self {
            anonymous_enabled: AtomicBool::new(true),
            issued: Mutex::new(HashMap::new()),
            sign_in_requests: AtomicUsize::new(0),
        }
    }

    pub fn set_anonymous_enabled(&self, enabled: bool) {
        self.anonymous_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Number of sign-in requests received, successful or not.
    pub fn sign_in_requests(&self) -> usize {
        self.sign_in_requests.load(Ordering::SeqCst)
    }

    /// Returns `true` if `token` belongs to a live identity.
    pub fn verify(&self, uid: &str, token: &str) -> bool {
        self.issued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(uid)
            .is_some_and(|t| t == token)
    }

    pub fn active_identities(&self) -> usize {
        self.issued.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for LocalIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn sign_in_anonymously(&self) -> AuthResult<Identity> {
        self.sign_in_requests.fetch_add(1, Ordering::SeqCst);
        if !self.anonymous_enabled.load(Ordering::SeqCst) {
            return Err(AuthError::MethodDisabled("anonymous".into()));
        }

        let uid = Uuid::now_v7().simple().to_string();
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        let token = hex::encode(secret);

        self.issued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(uid.clone(), token.clone());
        debug!(uid = %uid, "anonymous identity issued");
        Ok(Identity::anonymous(uid, token))
    }

    async fn sign_out(&self, identity: &Identity) -> AuthResult<()> {
        let removed = self
            .issued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&identity.uid);
        match removed {
            Some(_) => Ok(()),
            None => Err(AuthError::UnknownSession(identity.uid.clone())),
        }
    }
}
