//! Authenticated identity as observed from the identity provider.

use serde::{Deserialize, Serialize};

/// The authenticated user's identity for one sign-in session.
///
/// Produced by the identity tracker and read-only everywhere else. The `id`
/// is an opaque unique reference minted by the identity provider; the
/// display attributes are best-effort and may be absent.
///
/// "Signed out" is represented as `Option<Identity>::None` at the
/// boundaries, not as a sentinel value here.
///
/// # Examples
///
/// ```rust
/// use tasksync::types::Identity;
///
/// let identity = Identity::new("u1")
///     .with_email("ada@example.com")
///     .with_display_name("Ada");
/// assert_eq!(identity.id, "u1");
/// assert_eq!(identity.email.as_deref(), Some("ada@example.com"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque unique identifier from the identity provider.
    pub id: String,

    /// E-mail address, when the provider exposes one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Human-readable display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Avatar image URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_uri: Option<String>,
}

impl Identity {
    /// Create an identity with only the opaque id set.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            display_name: None,
            avatar_uri: None,
        }
    }

    /// Set the e-mail address.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Set the avatar URI.
    pub fn with_avatar_uri(mut self, uri: impl Into<String>) -> Self {
        self.avatar_uri = Some(uri.into());
        self
    }
}
