use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("sign-in method disabled: {0}")]
    MethodDisabled(String),

    #[error("identity provider rejected the request: {0}")]
    Rejected(String),

    #[error("identity provider unavailable: {0}")]
    Unavailable(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),
}

pub type AuthResult<T> = Result<T, AuthError>;
