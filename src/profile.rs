//! Signing Profiles
//!
//! Decides once, at engine construction, where signatures come from. The
//! pipeline never branches on environment after that.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::signing::{DetachedSignature, SignatureKind, SigningError, SigningIdentity};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningProfile {
    /// Identity problems are fatal.
    #[default]
    Production,
    /// May opt in to placeholder signatures.
    Development,
}

impl SigningProfile {
    pub fn name(self) -> &'static str {
        match self {
            SigningProfile::Production => "production",
            SigningProfile::Development => "development",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("placeholder signatures are only allowed in the development profile, not {0}")]
pub struct ProfileError(&'static str);

/// Profile plus the explicit placeholder opt-in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningPolicy {
    pub profile: SigningProfile,
    pub allow_placeholder_signature: bool,
}

impl SigningPolicy {
    pub fn production() -> Self {
        Self::default()
    }

    pub fn new(
        profile: SigningProfile,
        allow_placeholder_signature: bool,
    ) -> Result<Self, ProfileError> {
        if allow_placeholder_signature && profile != SigningProfile::Development {
            return Err(ProfileError(profile.name()));
        }
        Ok(Self {
            profile,
            allow_placeholder_signature,
        })
    }

    fn permits_placeholder(&self) -> bool {
        self.profile == SigningProfile::Development && self.allow_placeholder_signature
    }

    /// Turn an identity load result into a signature source.
    pub fn resolve(
        &self,
        identity: Result<SigningIdentity, SigningError>,
    ) -> Result<SignatureSource, SigningError> {
        match identity {
            Ok(identity) => {
                tracing::info!(subject = identity.subject(), "signing identity loaded");
                Ok(SignatureSource::Identity(Arc::new(identity)))
            }
            Err(err) if self.permits_placeholder() => {
                tracing::warn!(
                    error = %err,
                    "signing identity unavailable; bundles will carry a PLACEHOLDER signature"
                );
                Ok(SignatureSource::Placeholder {
                    reason: err.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SignatureSource {
    Identity(Arc<SigningIdentity>),
    /// Never verifies. `reason` records why no identity was available.
    Placeholder { reason: String },
}

impl SignatureSource {
    pub fn kind(&self) -> SignatureKind {
        match self {
            SignatureSource::Identity(identity) => identity.signature_kind(),
            SignatureSource::Placeholder { .. } => SignatureKind::Placeholder,
        }
    }

    pub fn sign(
        &self,
        manifest: &[u8],
        signing_time: DateTime<Utc>,
    ) -> Result<DetachedSignature, SigningError> {
        match self {
            SignatureSource::Identity(identity) => identity.sign(manifest, signing_time),
            SignatureSource::Placeholder { .. } => Ok(DetachedSignature::placeholder(signing_time)),
        }
    }
}
