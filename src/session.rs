//! Session establishment
//!
//! A [`SessionConnector`] turns account credentials into a live
//! [`StorageClient`]. Connectors are registered by name in a
//! [`crate::registry::Registry`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::client::StorageClient;
use crate::error::Result;

/// A secret value that is never printed
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Reveal the secret. Only session construction should need this.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Account credentials
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: Secret,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: Secret::new(password),
        }
    }
}

/// Establishes sessions with a storage service
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Authenticate and return a client bound to the account
    ///
    /// Fails with `Auth` when the service rejects the credentials.
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn StorageClient>>;
}
