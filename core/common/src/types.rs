//! Common types used throughout filerelay.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Unique identifier for one logical cloud operation.
///
/// Two requests with identical fields still carry different ids, so a parked
/// request is always correlated by identity rather than by content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Third-party storage service reachable through the cloud API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Dropbox,
    #[serde(rename = "googledrive")]
    GoogleDrive,
    #[serde(rename = "picasa")]
    GooglePhotos,
    Box,
    #[serde(rename = "github")]
    GitHub,
    Gmail,
    #[serde(rename = "onedrive")]
    OneDrive,
    #[serde(rename = "clouddrive")]
    AmazonDrive,
    Facebook,
    Instagram,
    #[serde(rename = "customsource")]
    CustomSource,
}

impl Provider {
    /// Every supported provider.
    pub const ALL: [Provider; 11] = [
        Provider::Dropbox,
        Provider::GoogleDrive,
        Provider::GooglePhotos,
        Provider::Box,
        Provider::GitHub,
        Provider::Gmail,
        Provider::OneDrive,
        Provider::AmazonDrive,
        Provider::Facebook,
        Provider::Instagram,
        Provider::CustomSource,
    ];

    /// Name used on the wire for this provider.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Provider::Dropbox => "dropbox",
            Provider::GoogleDrive => "googledrive",
            Provider::GooglePhotos => "picasa",
            Provider::Box => "box",
            Provider::GitHub => "github",
            Provider::Gmail => "gmail",
            Provider::OneDrive => "onedrive",
            Provider::AmazonDrive => "clouddrive",
            Provider::Facebook => "facebook",
            Provider::Instagram => "instagram",
            Provider::CustomSource => "customsource",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for Provider {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        Provider::ALL
            .iter()
            .copied()
            .find(|p| p.wire_name() == lowered)
            .ok_or_else(|| crate::Error::InvalidInput(format!("Unknown provider '{}'", s)))
    }
}

/// Signed policy attached to requests when the account enforces security.
///
/// Both values are wiped from memory when dropped.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Security {
    /// Base64-encoded policy document.
    pub policy: String,
    /// HMAC signature of the policy.
    pub signature: String,
}

impl Security {
    /// Create a new security pair.
    ///
    /// # Errors
    /// - Returns error if either value is empty
    pub fn new(policy: impl Into<String>, signature: impl Into<String>) -> crate::Result<Self> {
        let policy = policy.into();
        let signature = signature.into();
        if policy.is_empty() || signature.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Security policy and signature must be non-empty".to_string(),
            ));
        }
        Ok(Self { policy, signature })
    }
}

impl fmt::Debug for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Security")
            .field("policy", &self.policy)
            .field("signature", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_request_ids_are_unique() {
        let a = RequestId::new();
        let b = RequestId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 32);
    }

    #[test]
    fn test_provider_wire_names_match_serde() {
        for provider in Provider::ALL {
            let json = serde_json::to_string(&provider).unwrap();
            assert_eq!(json, format!("\"{}\"", provider.wire_name()));
        }
    }

    #[test]
    fn test_provider_parse_unknown() {
        assert!("myspace".parse::<Provider>().is_err());
        assert_eq!(" Dropbox ".parse::<Provider>().unwrap(), Provider::Dropbox);
        assert_eq!("picasa".parse::<Provider>().unwrap(), Provider::GooglePhotos);
    }

    #[test]
    fn test_security_requires_values() {
        assert!(Security::new("", "sig").is_err());
        assert!(Security::new("policy", "").is_err());

        let security = Security::new("policy", "sig").unwrap();
        let debug = format!("{:?}", security);
        assert!(debug.contains("policy"));
        assert!(!debug.contains("sig\""));
    }

    proptest! {
        #[test]
        fn prop_provider_parse_ignores_case(index in 0usize..11, upper in proptest::bool::ANY) {
            let provider = Provider::ALL[index];
            let name = if upper {
                provider.wire_name().to_ascii_uppercase()
            } else {
                provider.wire_name().to_string()
            };
            prop_assert_eq!(name.parse::<Provider>().unwrap(), provider);
        }
    }
}
