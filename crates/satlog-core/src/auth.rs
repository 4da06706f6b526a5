use std::fmt;

use thiserror::Error;

use crate::config::AuthConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Submit import batches.
    Ingest,
    /// Truncate the record store.
    Reset,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Ingest => f.write_str("ingest"),
            Capability::Reset => f.write_str("reset"),
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("credential does not grant the {0} capability")]
pub struct AuthorizationFailure(pub Capability);

/// Opaque pass/fail capability check consulted before any work is done.
pub trait AccessGate: Send + Sync {
    fn check(&self, credential: Option<&str>, capability: Capability)
        -> Result<(), AuthorizationFailure>;
}

/// Compares the presented credential against one configured key per
/// capability. A capability whose key is unset is never granted.
#[derive(Clone, Default)]
pub struct ApiKeyGate {
    import_key: Option<blake3::Hash>,
    admin_key: Option<blake3::Hash>,
}

impl ApiKeyGate {
    pub fn new(import_key: Option<&str>, admin_key: Option<&str>) -> Self {
        let digest = |key: &str| (!key.is_empty()).then(|| blake3::hash(key.as_bytes()));
        Self {
            import_key: import_key.and_then(digest),
            admin_key: admin_key.and_then(digest),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.import_key.as_deref(), config.admin_key.as_deref())
    }
}

impl fmt::Debug for ApiKeyGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyGate")
            .field("import_key", &self.import_key.is_some())
            .field("admin_key", &self.admin_key.is_some())
            .finish()
    }
}

impl AccessGate for ApiKeyGate {
    fn check(
        &self,
        credential: Option<&str>,
        capability: Capability,
    ) -> Result<(), AuthorizationFailure> {
        let expected = match capability {
            Capability::Ingest => self.import_key.as_ref(),
            Capability::Reset => self.admin_key.as_ref(),
        };

        // blake3::Hash equality is constant time
        match (expected, credential) {
            (Some(expected), Some(presented))
                if *expected == blake3::hash(presented.trim().as_bytes()) =>
            {
                Ok(())
            }
            _ => Err(AuthorizationFailure(capability)),
        }
    }
}

/// Grants everything. Only meant for tests and trusted local tooling.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessGate for AllowAll {
    fn check(&self, _: Option<&str>, _: Capability) -> Result<(), AuthorizationFailure> {
        Ok(())
    }
}
