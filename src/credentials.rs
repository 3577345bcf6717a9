//! Rotating pool of API keys for the conversion service.
//!
//! Each key carries its own credit budget on the service side. When the
//! service reports that the active key is exhausted (HTTP 401/402/403) the
//! client advances to the next key; the splitter also advances between the
//! chunks of a large document so each chunk lands on a fresh budget.
//!
//! The pool is an explicit object owned by the caller and passed by reference
//! into the orchestrator. The cursor is an atomic so that one pool can be
//! shared between documents without two pipelines reading and advancing it
//! inconsistently.

use crate::error::Pdf2MdError;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// A single API key. `Debug` and `Display` never print the full secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key, for the request header only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Last four characters, e.g. `…M7O`, for logs and progress output.
    pub fn masked(&self) -> String {
        let tail: String = self
            .0
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("…{tail}")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.masked()).finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

/// Ordered, non-empty set of credentials with a rotation cursor.
pub struct CredentialPool {
    credentials: Vec<Credential>,
    cursor: AtomicUsize,
}

impl CredentialPool {
    /// Build a pool from raw keys. Blank entries are dropped; an empty result
    /// is a configuration error.
    pub fn new<I, S>(keys: I) -> Result<Self, Pdf2MdError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let credentials: Vec<Credential> = keys
            .into_iter()
            .map(Into::into)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .map(Credential::new)
            .collect();

        if credentials.is_empty() {
            return Err(Pdf2MdError::InvalidConfig(
                "at least one API key is required".into(),
            ));
        }

        Ok(Self {
            credentials,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Parse a comma-separated list such as the `MARKER_API_KEYS` variable.
    pub fn from_list(list: &str) -> Result<Self, Pdf2MdError> {
        Self::new(list.split(','))
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// Whether the pool holds no credentials.
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Index of the credential `current()` returns.
    pub fn position(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    /// The credential at the cursor.
    pub fn current(&self) -> &Credential {
        &self.credentials[self.position()]
    }

    /// Advance the cursor by one (modulo pool size) and return the new
    /// credential. With a single credential this is a no-op.
    pub fn rotate(&self) -> &Credential {
        let len = self.credentials.len();
        let previous = self
            .cursor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |i| Some((i + 1) % len))
            .unwrap_or_else(|i| i);
        let next = (previous + 1) % len;
        let credential = &self.credentials[next];
        debug!(
            "Rotated API key #{} → #{} ({})",
            previous + 1,
            next + 1,
            credential.masked()
        );
        credential
    }
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPool")
            .field("credentials", &self.credentials)
            .field("cursor", &self.position())
            .finish()
    }
}
