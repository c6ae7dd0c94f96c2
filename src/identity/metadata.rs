//! # Identity Metadata
//!
//! Holder-mutable metadata that accompanies an identity: display name,
//! contact fields, and preference flags. Free-text fields pass through
//! sanitization before they are merged — control characters are stripped
//! and injection-shaped input is rejected outright.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum length for display name
pub const MAX_DISPLAY_NAME_LENGTH: usize = 64;

/// Maximum length for a contact field
pub const MAX_CONTACT_LENGTH: usize = 128;

/// Patterns that mark a free-text field as injection-shaped
///
/// Matched case-insensitively after control characters are stripped.
const REJECTED_PATTERNS: &[&str] = &[
    "<script",
    "</script",
    "javascript:",
    "onerror=",
    "onload=",
    "' or ",
    "\" or ",
    "union select",
    "drop table",
    "; --",
    "../",
];

/// Who can see the identity's profile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyLevel {
    /// Visible only to the holder
    Private,
    /// Visible to enrolled custodians and granted tools
    #[default]
    Trusted,
    /// Visible to anyone presenting the DID
    Public,
}

/// How much metadata granted tools may read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharingLevel {
    /// Nothing beyond the DID itself
    None,
    /// Display name only
    #[default]
    Minimal,
    /// All metadata fields
    Full,
}

/// Preference flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Profile visibility
    pub privacy_level: PrivacyLevel,
    /// Tool-facing metadata exposure
    pub sharing_level: SharingLevel,
    /// Whether security notifications are delivered
    pub notifications_enabled: bool,
    /// Whether encrypted backups are produced
    pub backup_enabled: bool,
}

/// Holder-mutable identity metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityMetadata {
    /// Human-readable display name
    pub display_name: String,
    /// Optional contact email
    pub email: Option<String>,
    /// Optional contact phone
    pub phone: Option<String>,
    /// Preference flags
    pub preferences: Preferences,
}

impl IdentityMetadata {
    /// Create metadata with just a display name
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Default::default()
        }
    }

    /// Validate and sanitize all free-text fields in place
    pub fn sanitize(&mut self) -> Result<()> {
        self.display_name = sanitize_text("display_name", &self.display_name, MAX_DISPLAY_NAME_LENGTH)?;
        if self.display_name.is_empty() {
            return Err(Error::validation("display_name", "cannot be empty"));
        }

        if let Some(ref email) = self.email {
            self.email = Some(sanitize_text("email", email, MAX_CONTACT_LENGTH)?);
        }
        if let Some(ref phone) = self.phone {
            self.phone = Some(sanitize_text("phone", phone, MAX_CONTACT_LENGTH)?);
        }

        Ok(())
    }

    /// Apply a single update, sanitizing before merge
    pub fn apply_update(&mut self, update: MetadataUpdate) -> Result<()> {
        match update {
            MetadataUpdate::DisplayName(name) => {
                let name = sanitize_text("display_name", &name, MAX_DISPLAY_NAME_LENGTH)?;
                if name.is_empty() {
                    return Err(Error::validation("display_name", "cannot be empty"));
                }
                self.display_name = name;
            }
            MetadataUpdate::Email(email) => {
                self.email = match email {
                    Some(e) => Some(sanitize_text("email", &e, MAX_CONTACT_LENGTH)?),
                    None => None,
                };
            }
            MetadataUpdate::Phone(phone) => {
                self.phone = match phone {
                    Some(p) => Some(sanitize_text("phone", &p, MAX_CONTACT_LENGTH)?),
                    None => None,
                };
            }
            MetadataUpdate::Preferences(prefs) => {
                self.preferences = prefs;
            }
        }
        Ok(())
    }
}

/// A partial update to identity metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MetadataUpdate {
    /// Change the display name
    DisplayName(String),
    /// Set or clear the contact email
    Email(Option<String>),
    /// Set or clear the contact phone
    Phone(Option<String>),
    /// Replace the preference flags
    Preferences(Preferences),
}

/// Sanitize one free-text field
///
/// Strips control characters, trims surrounding whitespace, enforces the
/// length bound, and rejects script/SQL-injection-shaped input with a
/// `Validation` error.
pub fn sanitize_text(field: &'static str, input: &str, max_len: usize) -> Result<String> {
    let cleaned: String = input.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim().to_string();

    if cleaned.chars().count() > max_len {
        return Err(Error::validation(
            field,
            format!("too long: max {} characters", max_len),
        ));
    }

    let lowered = cleaned.to_lowercase();
    for pattern in REJECTED_PATTERNS {
        if lowered.contains(pattern) {
            return Err(Error::validation(field, "contains disallowed sequence"));
        }
    }

    Ok(cleaned)
}

// ============================================================================
// TESTS
// ============================================================================
