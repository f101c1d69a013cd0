use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{0} not found")] NotFound(String),
    #[error("conflict: {0}")] Conflict(String),
    #[error("persistence failure: {0}")] Persistence(String),
    #[error("failed to decrypt stored secret: {0}")] Decrypt(String),
    #[error("failed to encrypt secret: {0}")] Encrypt(String),
    #[error("API key required for provider {0}")] MissingCredential(String),
    #[error("not configured: {0}")] NotConfigured(String),
    #[error("invalid input: {0}")] InvalidInput(String),
    #[error("failed to build API client: {0}")] ClientBuild(String),
}

impl RegistryError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "REG-1404",
            Self::Conflict(_) => "REG-1409",
            Self::Persistence(_) => "DB-1001",
            Self::Decrypt(_) => "SEC-1001",
            Self::Encrypt(_) => "SEC-1002",
            Self::MissingCredential(_) => "SEC-1401",
            Self::NotConfigured(_) => "SEL-1001",
            Self::InvalidInput(_) => "REG-1400",
            Self::ClientBuild(_) => "CLI-1001",
        }
    }

    pub fn explain(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "No record exists for the requested identifier.",
            Self::Conflict(_) => "A record with the same unique name or id already exists.",
            Self::Persistence(_) => "The application could not read or write the SQLite database.",
            Self::Decrypt(_) => "A stored API key could not be decrypted with the configured secret key.",
            Self::Encrypt(_) => "The API key could not be encrypted before storage.",
            Self::MissingCredential(_) => "The provider requires an API key but none is stored.",
            Self::NotConfigured(_) => "No active provider exposes an active model of the requested type.",
            Self::InvalidInput(_) => "The request failed validation before reaching the database.",
            Self::ClientBuild(_) => "The HTTP client for the provider could not be constructed.",
        }
    }
}

impl From<rusqlite::Error> for RegistryError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(inner, _)
                if inner.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::Conflict(err.to_string())
            }
            _ => Self::Persistence(err.to_string()),
        }
    }
}

impl From<r2d2::Error> for RegistryError {
    fn from(err: r2d2::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}
