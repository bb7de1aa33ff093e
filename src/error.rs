use thiserror::Error;

pub type Result<T> = std::result::Result<T, AttestationError>;

/// Failure of a verification call. Every variant is fail-closed: no claims are
/// returned alongside an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttestationError {
    /// The evidence could not be parsed.
    #[error("malformed evidence: {0}")]
    BadFormat(String),

    /// The signature does not verify under the resolved key.
    #[error("invalid signature: {0}")]
    SignatureInvalid(String),

    /// The embedded certificate path does not lead to the configured root.
    #[error("invalid certificate chain: {0}")]
    CertChainInvalid(String),

    /// No verification key could be obtained.
    #[error("unable to obtain verification key: {0}")]
    KeyFetchError(String),

    #[error("token has expired")]
    TokenExpired,

    #[error("token is not valid yet")]
    TokenNotYetValid,

    #[error("token audience mismatch")]
    AudienceMismatch,

    #[error("token issuer mismatch")]
    IssuerMismatch,

    /// Evidence is authentic but its claims break platform policy. The reason
    /// is stable and meant for audit logs.
    #[error("policy violation: {0}")]
    PolicyViolation(String),
}

/// Payload-free discriminant of [`AttestationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadFormat,
    SignatureInvalid,
    CertChainInvalid,
    KeyFetchError,
    TokenExpired,
    TokenNotYetValid,
    AudienceMismatch,
    IssuerMismatch,
    PolicyViolation,
}

impl AttestationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadFormat(_) => ErrorKind::BadFormat,
            Self::SignatureInvalid(_) => ErrorKind::SignatureInvalid,
            Self::CertChainInvalid(_) => ErrorKind::CertChainInvalid,
            Self::KeyFetchError(_) => ErrorKind::KeyFetchError,
            Self::TokenExpired => ErrorKind::TokenExpired,
            Self::TokenNotYetValid => ErrorKind::TokenNotYetValid,
            Self::AudienceMismatch => ErrorKind::AudienceMismatch,
            Self::IssuerMismatch => ErrorKind::IssuerMismatch,
            Self::PolicyViolation(_) => ErrorKind::PolicyViolation,
        }
    }

    pub(crate) fn bad_format(msg: impl Into<String>) -> Self {
        Self::BadFormat(msg.into())
    }

    pub(crate) fn policy(reason: impl Into<String>) -> Self {
        Self::PolicyViolation(reason.into())
    }
}

impl From<jsonwebtoken::errors::Error> for AttestationError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind as Jwt;

        match err.kind() {
            Jwt::ExpiredSignature => Self::TokenExpired,
            Jwt::ImmatureSignature => Self::TokenNotYetValid,
            Jwt::InvalidAudience => Self::AudienceMismatch,
            Jwt::InvalidIssuer => Self::IssuerMismatch,
            Jwt::MissingRequiredClaim(claim) if claim == "aud" => Self::AudienceMismatch,
            Jwt::MissingRequiredClaim(claim) if claim == "iss" => Self::IssuerMismatch,
            Jwt::InvalidSignature => {
                Self::SignatureInvalid("token signature does not verify".into())
            }
            Jwt::InvalidAlgorithm | Jwt::InvalidAlgorithmName | Jwt::MissingAlgorithm => {
                Self::SignatureInvalid(format!("unacceptable signing algorithm: {err}"))
            }
            Jwt::InvalidEcdsaKey | Jwt::InvalidRsaKey(_) | Jwt::InvalidKeyFormat => {
                Self::KeyFetchError(format!("unusable verification key: {err}"))
            }
            _ => Self::BadFormat(format!("malformed token: {err}")),
        }
    }
}
