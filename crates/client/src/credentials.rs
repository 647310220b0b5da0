use readylayer_core::SyncError;

/// Injectable credential capability. The fetcher and stream client take one
/// explicitly instead of reading ambient session state, so tests can run
/// with fixed tokens.
///
/// Expiry/refresh is the provider's problem; a stale token that still
/// reaches the server comes back as `Unauthenticated`.
pub trait CredentialProvider: Send + Sync + 'static {
    fn bearer_token(&self) -> Result<String, SyncError>;
}

/// Fixed-token provider.
#[derive(Clone, Debug)]
pub struct StaticCredentials {
    token: String,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn bearer_token(&self) -> Result<String, SyncError> {
        Ok(self.token.clone())
    }
}
