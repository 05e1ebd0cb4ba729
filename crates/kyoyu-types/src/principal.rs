//! Principal and profile types.
//!
//! A `Principal` is what the session provider reports: an authenticated
//! account. A `Profile` is the display row the backend provisions for that
//! account (asynchronously, by trigger), so a principal can exist for a while
//! without one.

use serde::{Deserialize, Serialize};

use crate::ids::PrincipalId;

/// Display name used when neither a name nor an email is known.
pub const UNKNOWN_NAME: &str = "Unknown";

/// An authenticated account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub email: String,
    /// Whether the account's email address has been confirmed.
    #[serde(default)]
    pub email_confirmed: bool,
}

impl Principal {
    /// Create a new, unconfirmed principal with a fresh ID.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: PrincipalId::new(),
            email: email.into(),
            email_confirmed: false,
        }
    }

    /// Mark the email as confirmed.
    pub fn confirmed(mut self) -> Self {
        self.email_confirmed = true;
        self
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.email, self.id.short())
    }
}

/// Public display row for a principal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: PrincipalId,
    pub name: String,
    pub email: String,
    /// Last update (Unix millis).
    pub updated_at: u64,
}

impl Profile {
    pub fn new(id: PrincipalId, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            email: email.into(),
            updated_at: crate::now_millis(),
        }
    }

    /// Name for display: the profile name, else the email, else [`UNKNOWN_NAME`].
    pub fn display_name(&self) -> &str {
        if !self.name.trim().is_empty() {
            &self.name
        } else if !self.email.trim().is_empty() {
            &self.email
        } else {
            UNKNOWN_NAME
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.email)
    }
}

/// Requested change to a profile. `None` leaves the field as is.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
}
