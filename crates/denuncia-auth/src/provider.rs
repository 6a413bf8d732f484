use async_trait::async_trait;

use crate::error::AuthResult;
use crate::identity::Identity;

/// Issuer of store-access identities.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Request a new anonymous identity.
    async fn sign_in_anonymously(&self) -> AuthResult<Identity>;

    /// Revoke an identity previously issued by this provider.
    async fn sign_out(&self, identity: &Identity) -> AuthResult<()>;
}
