//! Generation Pipeline - Single Entry Point
//!
//! CRITICAL: generate MUST validate first. No bypass.
//!
//! Stages run in strict order, each consuming the previous one:
//! `Validated -> AssetsBuilt -> ManifestComputed -> Signed -> Archived`.
//! A failure names its stage and nothing is written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::archive::{self, ArchiveError, BundleStore, StoredBundle, PASS_FILE};
use crate::assets::{self, AssetResolver, ResolvedAssets};
use crate::barcode::{BarcodeRenderError, BarcodeRenderer};
use crate::color::Rgb;
use crate::compositor::{
    RasterError, StampArtwork, StampArtworkSet, StampCell, StampCompositor, StampGridSpec,
    StampPalette, StripBackground, StripPlan, DEFAULT_ACCENT,
};
use crate::config::{ConfigError, EngineConfig};
use crate::document::{BuildInputs, DocumentError, PassDocument, PassDocumentBuilder};
use crate::hashing::{compute_job_hash, sha256_hex};
use crate::layout::{calculate_layout, Scale};
use crate::manifest::{BundleFiles, Manifest, ManifestError, MANIFEST_FILE, SIGNATURE_FILE};
use crate::profile::SignatureSource;
use crate::signing::{SignatureKind, SigningError};
use crate::templates::{PassTemplate, RuntimeContext, StripMode};
use crate::validation::{ComplianceValidator, ValidationResult};
use crate::ENGINE_VERSION;

#[cfg(feature = "test-hooks")]
use std::sync::atomic::AtomicU32;

#[cfg(feature = "test-hooks")]
static VALIDATION_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_validation_call_count() -> u32 {
    VALIDATION_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_validation_call_count() {
    VALIDATION_CALL_COUNT.store(0, Ordering::SeqCst);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validated,
    AssetsBuilt,
    ManifestComputed,
    Signed,
    Archived,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Validated => "validated",
            Stage::AssetsBuilt => "assets_built",
            Stage::ManifestComputed => "manifest_computed",
            Stage::Signed => "signed",
            Stage::Archived => "archived",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("staging directory: {0}")]
    Staging(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Validation failed: {}", .0.error_summary())]
    ValidationFailed(Box<ValidationResult>),

    #[error("Template requires engine >= {required}, current is {current}")]
    EngineVersionMismatch { required: String, current: String },

    #[error("Invalid version string: {0}")]
    InvalidVersion(String),

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: StageError,
    },

    #[error("Cancelled before {0} stage")]
    Cancelled(Stage),

    #[error("Worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Signing identity: {0}")]
    Identity(#[from] SigningError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

fn at<E: Into<StageError>>(stage: Stage) -> impl FnOnce(E) -> PipelineError {
    move |err| PipelineError::Stage {
        stage,
        source: err.into(),
    }
}

/// Shared flag a caller sets to abandon a request. Checked between stages.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self, next: Stage) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            tracing::info!(stage = %next, "generation cancelled");
            return Err(PipelineError::Cancelled(next));
        }
        Ok(())
    }
}

/// One pass to generate.
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    pub template: &'a PassTemplate,
    pub context: &'a RuntimeContext,
    /// Defaults to now.
    pub signing_time: Option<DateTime<Utc>>,
    pub cancel: CancellationToken,
}

impl<'a> GenerationRequest<'a> {
    pub fn new(template: &'a PassTemplate, context: &'a RuntimeContext) -> Self {
        Self {
            template,
            context,
            signing_time: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_signing_time(mut self, signing_time: DateTime<Utc>) -> Self {
        self.signing_time = Some(signing_time);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Immutable result of a successful run.
#[derive(Debug, Clone)]
pub struct SignedBundle {
    pub serial_number: String,
    /// Every archive member, `manifest.json` and `signature` included.
    pub files: BundleFiles,
    pub manifest: Vec<u8>,
    pub signature: Vec<u8>,
    pub signature_kind: SignatureKind,
    pub signing_time: DateTime<Utc>,
    pub archive: Vec<u8>,
}

impl SignedBundle {
    pub fn archive_sha256(&self) -> String {
        sha256_hex(&self.archive)
    }
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub bundle: SignedBundle,
    pub document: PassDocument,
    pub validation: ValidationResult,
    pub job_hash: String,
    pub stamp_cells: Vec<StampCell>,
    /// Everything non-fatal, validation warnings first.
    pub warnings: Vec<String>,
    /// Barcode raster from the configured renderer. Never bundled.
    pub barcode_preview: Option<Vec<u8>>,
    pub stored: Option<StoredBundle>,
}

/// JSON-friendly view of an outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSummary {
    pub serial_number: String,
    pub job_hash: String,
    pub engine_version: String,
    pub signature_kind: SignatureKind,
    pub signing_time: DateTime<Utc>,
    pub archive_sha256: String,
    pub archive_size: usize,
    pub files: BTreeMap<String, usize>,
    pub warnings: Vec<String>,
    pub stored: Option<StoredBundle>,
}

impl GenerationOutcome {
    pub fn summary(&self) -> GenerationSummary {
        GenerationSummary {
            serial_number: self.bundle.serial_number.clone(),
            job_hash: self.job_hash.clone(),
            engine_version: ENGINE_VERSION.to_string(),
            signature_kind: self.bundle.signature_kind,
            signing_time: self.bundle.signing_time,
            archive_sha256: self.bundle.archive_sha256(),
            archive_size: self.bundle.archive.len(),
            files: self
                .bundle
                .files
                .iter()
                .map(|(name, bytes)| (name.clone(), bytes.len()))
                .collect(),
            warnings: self.warnings.clone(),
            stored: self.stored.clone(),
        }
    }
}

/// Engine-level settings that do not come from the template.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub worker_threads: usize,
    pub pass_type_identifier: String,
    pub team_identifier: String,
    pub asset_root: Option<PathBuf>,
}

impl EngineSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            worker_threads: config.engine.worker_threads,
            pass_type_identifier: config.pass.pass_type_identifier.clone(),
            team_identifier: config.pass.team_identifier.clone(),
            asset_root: config.asset_root(),
        }
    }
}

/// The generation engine - single entry point for all bundle operations
pub struct GenerationEngine {
    pool: rayon::ThreadPool,
    validator: ComplianceValidator,
    resolver: AssetResolver,
    signer: SignatureSource,
    settings: EngineSettings,
    barcode_renderer: Option<Arc<dyn BarcodeRenderer>>,
}

impl fmt::Debug for GenerationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationEngine")
            .field("settings", &self.settings)
            .field("signer", &self.signer.kind())
            .finish_non_exhaustive()
    }
}

impl GenerationEngine {
    pub fn new(settings: EngineSettings, signer: SignatureSource) -> Result<Self, PipelineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.worker_threads.max(1))
            .thread_name(|i| format!("passforge-worker-{i}"))
            .build()?;
        let resolver = match &settings.asset_root {
            Some(root) => AssetResolver::new(root.clone()),
            None => AssetResolver::inline_only(),
        };
        Ok(Self {
            pool,
            validator: ComplianceValidator::new(),
            resolver,
            signer,
            settings,
            barcode_renderer: None,
        })
    }

    /// Loads the signing identity once; the profile decides what a load failure means.
    pub fn from_config(config: &EngineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let signer = config.signing_policy()?.resolve(config.load_identity())?;
        Self::new(EngineSettings::from_config(config), signer)
    }

    pub fn with_barcode_renderer(mut self, renderer: Arc<dyn BarcodeRenderer>) -> Self {
        self.barcode_renderer = Some(renderer);
        self
    }

    pub fn signature_kind(&self) -> SignatureKind {
        self.signer.kind()
    }

    /// Validate a template against a runtime context with the engine's assets.
    pub fn validate(
        &self,
        template: &PassTemplate,
        context: &RuntimeContext,
    ) -> Result<ValidationResult, PipelineError> {
        validate_template(&self.validator, template, context, &self.resolver)
    }

    /// Generate a signed bundle.
    ///
    /// CRITICAL: This ALWAYS calls validate internally. No bypass possible.
    #[tracing::instrument(skip_all, fields(template = %request.template.id))]
    pub fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<GenerationOutcome, PipelineError> {
        self.pool.install(|| self.run(request))
    }

    /// Generate, then hand the archive to `store`. Nothing is stored on failure.
    pub fn generate_and_store(
        &self,
        request: &GenerationRequest<'_>,
        store: &dyn BundleStore,
    ) -> Result<GenerationOutcome, PipelineError> {
        let mut outcome = self.generate(request)?;
        request.cancel.check(Stage::Archived)?;
        let stored = store
            .store(&outcome.bundle.serial_number, &outcome.bundle.archive)
            .map_err(at(Stage::Archived))?;
        outcome.stored = Some(stored);
        Ok(outcome)
    }

    fn run(&self, request: &GenerationRequest<'_>) -> Result<GenerationOutcome, PipelineError> {
        let cancel = &request.cancel;

        cancel.check(Stage::Validated)?;
        let validated = self.validated(request)?;
        tracing::info!(serial = %validated.serial_number, "validated");

        cancel.check(Stage::AssetsBuilt)?;
        let built = validated.build_assets(self)?;
        tracing::info!(files = built.files.len(), "assets built");

        cancel.check(Stage::ManifestComputed)?;
        let computed = built.compute_manifest()?;
        tracing::info!(entries = computed.manifest.len(), "manifest computed");

        cancel.check(Stage::Signed)?;
        let signing_time = request.signing_time.unwrap_or_else(Utc::now);
        let signed = computed.sign(&self.signer, signing_time)?;
        tracing::info!(kind = ?signed.signature_kind(), "manifest signed");

        cancel.check(Stage::Archived)?;
        let outcome = signed.archive()?;
        tracing::info!(
            bytes = outcome.bundle.archive.len(),
            sha256 = %outcome.bundle.archive_sha256(),
            "bundle archived"
        );
        Ok(outcome)
    }

    fn validated<'r>(
        &self,
        request: &GenerationRequest<'r>,
    ) -> Result<Validated<'r>, PipelineError> {
        let serial_number = request
            .context
            .serial_number
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let context = RuntimeContext {
            serial_number: Some(serial_number.clone()),
            ..request.context.clone()
        };

        // MANDATORY: Validation is always called. This is non-negotiable.
        let validation = self.validate(request.template, &context)?;
        if !validation.is_valid {
            tracing::warn!(errors = validation.errors.len(), "validation failed");
            return Err(PipelineError::ValidationFailed(Box::new(validation)));
        }

        let job_hash = compute_job_hash(request.template, request.context, ENGINE_VERSION)?;
        Ok(Validated {
            template: request.template,
            context,
            serial_number,
            validation,
            job_hash,
        })
    }
}

/// Engine version gate, then the compliance rules.
///
/// Every validation path goes through here, the engine's and the CLI's alike.
pub fn validate_template(
    validator: &ComplianceValidator,
    template: &PassTemplate,
    context: &RuntimeContext,
    resolver: &AssetResolver,
) -> Result<ValidationResult, PipelineError> {
    #[cfg(feature = "test-hooks")]
    VALIDATION_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

    check_engine_version(template)?;
    Ok(validator.validate(template, context, resolver))
}

fn check_engine_version(template: &PassTemplate) -> Result<(), PipelineError> {
    let engine_ver = semver::Version::parse(ENGINE_VERSION)
        .map_err(|_| PipelineError::InvalidVersion(ENGINE_VERSION.to_string()))?;
    let min_ver = semver::Version::parse(&template.engine_min_version)
        .map_err(|_| PipelineError::InvalidVersion(template.engine_min_version.clone()))?;

    if engine_ver < min_ver {
        return Err(PipelineError::EngineVersionMismatch {
            required: template.engine_min_version.clone(),
            current: ENGINE_VERSION.to_string(),
        });
    }
    Ok(())
}

// --- Stages ---

struct Validated<'a> {
    template: &'a PassTemplate,
    context: RuntimeContext,
    serial_number: String,
    validation: ValidationResult,
    job_hash: String,
}

struct AssetsBuilt {
    serial_number: String,
    validation: ValidationResult,
    job_hash: String,
    document: PassDocument,
    files: BundleFiles,
    stamp_cells: Vec<StampCell>,
    warnings: Vec<String>,
    barcode_preview: Option<Vec<u8>>,
}

struct ManifestComputed {
    built: AssetsBuilt,
    manifest: Manifest,
    manifest_bytes: Vec<u8>,
}

struct Signed {
    computed: ManifestComputed,
    signature: crate::signing::DetachedSignature,
    signature_bytes: Vec<u8>,
}

impl Validated<'_> {
    fn build_assets(self, engine: &GenerationEngine) -> Result<AssetsBuilt, PipelineError> {
        let stage = Stage::AssetsBuilt;
        let template = self.template;
        let colors = &template.colors;
        let foreground = Rgb::parse(&colors.foreground).unwrap_or(Rgb::WHITE);
        let background = Rgb::parse(&colors.background).unwrap_or(Rgb::BLACK);

        let resolved =
            assets::resolve_assets(&template.images, &engine.resolver, foreground, background);
        let plan = strip_plan(template, &self.context, &resolved, foreground);
        let inputs = BuildInputs {
            pass_type_identifier: engine.settings.pass_type_identifier.clone(),
            team_identifier: engine.settings.team_identifier.clone(),
            serial_number: self.serial_number.clone(),
            wide_logo: resolved.has_wide_logo(),
        };

        let (document, rasters) = rayon::join(
            || PassDocumentBuilder::build(template, &self.context, &inputs),
            || -> Result<_, StageError> {
                let strips = StampCompositor::compose(&plan)?;
                let strip_png = strips.encode_png()?;
                let icon_png = encode_set("icon", assets::icon_set(&resolved.icon))?;
                let logo_png = encode_set("logo", assets::logo_set(&resolved.logo))?;
                Ok((strips.cells, strip_png, icon_png, logo_png))
            },
        );
        let built = document.map_err(at(stage))?;
        let (stamp_cells, strip_png, icon_png, logo_png) = rasters.map_err(at(stage))?;

        let mut files = BundleFiles::new();
        let pass_json = built.document.to_json_bytes().map_err(at(stage))?;
        files.insert(PASS_FILE.to_string(), pass_json);
        for (name, scale, bytes) in strip_png
            .into_iter()
            .map(|(scale, bytes)| ("strip", scale, bytes))
            .chain(icon_png)
            .chain(logo_png)
        {
            files.insert(format!("{name}{}.png", scale.file_suffix()), bytes);
        }

        let mut warnings: Vec<String> = self
            .validation
            .warnings
            .iter()
            .map(|w| format!("{}: {}", w.rule, w.message))
            .collect();
        warnings.extend(
            resolved
                .warnings
                .iter()
                .filter(|w| !w.role.is_required())
                .map(|w| w.message.clone()),
        );

        let barcode_preview = match &engine.barcode_renderer {
            Some(renderer) => {
                match renderer.render(&built.document.barcode.message, template.barcode.format) {
                    Ok(bytes) => Some(bytes),
                    Err(BarcodeRenderError(reason)) => {
                        tracing::warn!(%reason, "barcode preview unavailable");
                        warnings.push(format!("barcode preview unavailable: {reason}"));
                        None
                    }
                }
            }
            None => None,
        };

        Ok(AssetsBuilt {
            serial_number: self.serial_number,
            validation: self.validation,
            job_hash: self.job_hash,
            document: built.document,
            files,
            stamp_cells,
            warnings,
            barcode_preview,
        })
    }
}

fn encode_set(
    name: &'static str,
    set: Vec<(Scale, image::RgbaImage)>,
) -> Result<Vec<(&'static str, Scale, Vec<u8>)>, StageError> {
    set.into_iter()
        .map(|(scale, img)| {
            crate::raster::encode_png(&img)
                .map(|bytes| (name, scale, bytes))
                .map_err(|source| {
                    StageError::Raster(RasterError::Encode {
                        scale: scale.factor(),
                        source,
                    })
                })
        })
        .collect()
}

fn strip_plan(
    template: &PassTemplate,
    context: &RuntimeContext,
    resolved: &ResolvedAssets,
    foreground: Rgb,
) -> StripPlan {
    let colors = &template.colors;
    let strip_base = Rgb::parse(&colors.strip_background).unwrap_or(Rgb::BLACK);
    let background = match &resolved.strip {
        Some(image) => StripBackground::Texture {
            base: strip_base,
            image: image.clone(),
        },
        None => StripBackground::Solid(strip_base),
    };

    match template.strip.mode {
        StripMode::Static => StripPlan::Static(background),
        StripMode::StampGrid => {
            let accent = match &colors.accent {
                Some(raw) => Rgb::parse(raw).unwrap_or(DEFAULT_ACCENT),
                None => DEFAULT_ACCENT,
            };
            StripPlan::StampGrid(StampGridSpec {
                background,
                layout: calculate_layout(context.stamps_required),
                stamps_earned: context.stamps_earned,
                milestones: template.stamp_program.milestones.clone(),
                artwork: StampArtworkSet {
                    unredeemed: StampArtwork::from_optional(resolved.stamp_unredeemed.clone()),
                    earned: StampArtwork::from_optional(resolved.stamp_earned.clone()),
                    milestone: resolved.stamp_milestone.clone().map(StampArtwork::Icon),
                },
                palette: StampPalette {
                    fill: foreground,
                    outline: foreground,
                    accent,
                    shadow: Rgb::BLACK,
                },
            })
        }
    }
}

impl AssetsBuilt {
    fn compute_manifest(self) -> Result<ManifestComputed, PipelineError> {
        let manifest = Manifest::compute(&self.files);
        let manifest_bytes = manifest.to_bytes().map_err(at(Stage::ManifestComputed))?;
        Ok(ManifestComputed {
            built: self,
            manifest,
            manifest_bytes,
        })
    }
}

impl ManifestComputed {
    fn sign(
        self,
        signer: &SignatureSource,
        signing_time: DateTime<Utc>,
    ) -> Result<Signed, PipelineError> {
        let stage = Stage::Signed;
        let signature = signer.sign(&self.manifest_bytes, signing_time).map_err(at(stage))?;
        let signature_bytes = signature.to_bytes();
        Ok(Signed {
            computed: self,
            signature,
            signature_bytes,
        })
    }
}

impl Signed {
    fn signature_kind(&self) -> SignatureKind {
        self.signature.kind
    }

    fn archive(self) -> Result<GenerationOutcome, PipelineError> {
        let stage = Stage::Archived;
        let ManifestComputed {
            built,
            manifest_bytes,
            ..
        } = self.computed;
        let AssetsBuilt {
            serial_number,
            validation,
            job_hash,
            document,
            mut files,
            stamp_cells,
            mut warnings,
            barcode_preview,
        } = built;

        files.insert(MANIFEST_FILE.to_string(), manifest_bytes.clone());
        files.insert(SIGNATURE_FILE.to_string(), self.signature_bytes.clone());

        let staging = tempfile::Builder::new()
            .prefix("passforge-")
            .tempdir()
            .map_err(at(stage))?;
        let archive = archive::stage_archive(&files, &staging).map_err(at(stage))?;

        if self.signature.kind == SignatureKind::Placeholder {
            tracing::warn!(serial = %serial_number, "bundle carries a PLACEHOLDER signature");
            warnings.push(
                "bundle carries a placeholder signature and will not verify".to_string(),
            );
        }

        Ok(GenerationOutcome {
            bundle: SignedBundle {
                serial_number,
                files,
                manifest: manifest_bytes,
                signature: self.signature_bytes,
                signature_kind: self.signature.kind,
                signing_time: self.signature.signing_time,
                archive,
            },
            document,
            validation,
            job_hash,
            stamp_cells,
            warnings,
            barcode_preview,
            stored: None,
        })
    }
}
