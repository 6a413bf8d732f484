//! Identity layer for Denuncia.
//!
//! Store access is gated by an anonymous session issued by an identity
//! provider. [`SessionManager`] wraps a provider and guarantees that at most
//! one identity is requested per session lifetime, however many callers ask
//! for it concurrently.

pub mod error;
pub mod identity;
pub mod memory;
pub mod provider;
pub mod session;

pub use error::{AuthError, AuthResult};
pub use identity::Identity;
pub use memory::LocalIdentityProvider;
pub use provider::IdentityProvider;
pub use session::SessionManager;
