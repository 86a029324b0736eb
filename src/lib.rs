//! PassForge Core - Wallet Pass Compiler
//!
//! # The Rules (Non-Negotiable)
//! 1. Templates Are Contracts
//! 2. Validation Is Protective: every violation is reported, errors block
//! 3. Deterministic Output: same inputs, same pixels, same archive bytes
//! 4. Manifests Enable Verification
//! 5. Signing Fails Closed

pub mod color;
pub mod layout;
pub mod templates;
pub mod barcode;
pub mod raster;
pub mod assets;
pub mod compositor;
pub mod document;
pub mod validation;
pub mod hashing;
pub mod manifest;
pub mod signing;
pub mod archive;
pub mod profile;
pub mod config;
pub mod pipeline;

pub use templates::{PassTemplate, RuntimeContext, TemplateId, StripMode};
pub use layout::{calculate_dimensions, calculate_layout, DimensionResult, LayoutResult, Scale};
pub use compositor::{StampCompositor, StampState, StripPlan, StripRasters};
pub use document::{PassDocument, PassDocumentBuilder, PASS_FORMAT_VERSION};
pub use validation::{
    ComplianceValidator, ValidationResult, ValidationRule, ValidationViolation, ViolationSeverity,
};
pub use hashing::{canonical_json, compute_job_hash, sha256_hex};
pub use manifest::{BundleFiles, Manifest};
pub use signing::{DetachedSignature, SignatureKind, SigningIdentity};
pub use archive::{verify_bundle, BundleStore, DirectoryStore, StoredBundle};
pub use profile::{SigningPolicy, SigningProfile};
pub use config::EngineConfig;
pub use pipeline::{
    CancellationToken, GenerationEngine, GenerationOutcome, GenerationRequest, PipelineError,
    SignedBundle,
};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
