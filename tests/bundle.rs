//! End-to-end bundle tests: real signing identity, real archive bytes.

mod common;

use std::fs;

use passforge_core::{
    archive::{archive_bytes, read_archive, ArchiveError},
    manifest::{ManifestError, MANIFEST_FILE},
    pipeline::Stage,
    signing::SigningError,
    templates::{AssetSource, FieldSection},
    verify_bundle, DirectoryStore, EngineConfig, GenerationEngine, GenerationRequest, Manifest,
    PipelineError, SignatureKind,
};

fn generate() -> passforge_core::GenerationOutcome {
    generate_with(&common::engine(common::signing_identity(7)))
}

fn generate_with(engine: &GenerationEngine) -> passforge_core::GenerationOutcome {
    let template = common::template();
    let context = common::context();
    let request =
        GenerationRequest::new(&template, &context).with_signing_time(common::fixed_time());
    engine.generate(&request).unwrap()
}

#[test]
fn strip_images_have_exact_dimensions() {
    let outcome = generate();
    let files = &outcome.bundle.files;
    for (name, w, h) in [
        ("strip.png", 375, 144),
        ("strip@2x.png", 750, 288),
        ("strip@3x.png", 1125, 432),
    ] {
        let img = image::load_from_memory(&files[name]).unwrap();
        assert_eq!((img.width(), img.height()), (w, h), "{name}");
    }
    for name in ["icon.png", "icon@2x.png", "icon@3x.png", "logo.png", "logo@3x.png"] {
        assert!(files.contains_key(name), "{name} missing");
    }
}

#[test]
fn manifest_covers_every_member_and_verifies() {
    let outcome = generate();
    let manifest = Manifest::from_bytes(&outcome.bundle.manifest).unwrap();

    let members = read_archive(&outcome.bundle.archive).unwrap();
    assert_eq!(manifest.len(), members.len() - 2);
    for name in members.keys() {
        let listed = manifest.get(name).is_some();
        assert_eq!(listed, name != "manifest.json" && name != "signature", "{name}");
    }

    let report = verify_bundle(&outcome.bundle.archive).unwrap();
    assert_eq!(report.signature_kind, SignatureKind::EcdsaP256Sha256);
    assert_eq!(report.signing_time, common::fixed_time());
    assert_eq!(report.manifest_entries, manifest.len());
    assert!(report.signer.contains("PassForge Test Signer"));
}

#[test]
fn tampered_asset_fails_verification() {
    let outcome = generate();
    let mut files = read_archive(&outcome.bundle.archive).unwrap();
    files.get_mut("strip@2x.png").unwrap()[40] ^= 0xFF;

    let err = verify_bundle(&archive_bytes(&files).unwrap()).unwrap_err();
    assert!(matches!(
        err,
        ArchiveError::Manifest(ManifestError::DigestMismatch { ref file }) if file == "strip@2x.png"
    ));
}

#[test]
fn tampered_manifest_fails_verification() {
    let outcome = generate();

    // A flipped digest no longer matches its file.
    let mut files = read_archive(&outcome.bundle.archive).unwrap();
    let manifest = String::from_utf8(files[MANIFEST_FILE].clone()).unwrap();
    let digest = Manifest::from_bytes(manifest.as_bytes())
        .unwrap()
        .get("pass.json")
        .unwrap()
        .to_string();
    let flipped = if digest.starts_with('0') {
        format!("1{}", &digest[1..])
    } else {
        format!("0{}", &digest[1..])
    };
    files.insert(MANIFEST_FILE.into(), manifest.replace(&digest, &flipped).into_bytes());
    assert!(verify_bundle(&archive_bytes(&files).unwrap()).is_err());

    // A consistent but re-computed manifest is caught by the signature.
    let mut files = read_archive(&outcome.bundle.archive).unwrap();
    files.insert("pass.json".into(), b"{\"formatVersion\":1}".to_vec());
    files.remove(MANIFEST_FILE);
    let signature = files.remove("signature").unwrap();
    let recomputed = Manifest::compute(&files).to_bytes().unwrap();
    files.insert(MANIFEST_FILE.into(), recomputed);
    files.insert("signature".into(), signature);

    let err = verify_bundle(&archive_bytes(&files).unwrap()).unwrap_err();
    assert!(matches!(err, ArchiveError::Signature(SigningError::VerificationFailed)));
}

#[test]
fn fixed_serial_and_time_give_identical_archives() {
    let engine = common::engine(common::signing_identity(7));
    let first = generate_with(&engine);
    let second = generate_with(&engine);
    assert_eq!(first.bundle.archive, second.bundle.archive);
    assert_eq!(first.bundle.archive_sha256(), second.bundle.archive_sha256());
}

#[test]
fn document_respects_field_limits() {
    let outcome = generate();
    let document = &outcome.document;
    for section in FieldSection::ALL {
        if let Some(max) = section.max_fields() {
            assert!(document.fields(section).len() <= max, "{}", section.name());
        }
    }

    let expires = document
        .fields(FieldSection::Auxiliary)
        .iter()
        .find(|f| f.key == "expires")
        .unwrap();
    assert_eq!(expires.value, "12/31/26");
    assert_eq!(document.expiration_date.as_deref(), Some("2026-12-31T23:59:59Z"));
    assert_eq!(document.fields(FieldSection::Primary)[0].value, "7 of 10");
    assert_eq!(document.barcode.message, "spring-2026:cust-0042:SN-0001");
    assert_eq!(outcome.stamp_cells.len(), 10);
}

fn write_config(dir: &std::path::Path, signing: &str) -> std::path::PathBuf {
    let path = dir.join("passforge.toml");
    let config = format!(
        "[engine]\nworker_threads = 2\n\n\
         [pass]\npass_type_identifier = \"pass.com.example.loyalty\"\n\
         team_identifier = \"ABCDE12345\"\n\n\
         [output]\ndirectory = \"bundles\"\n\n{signing}"
    );
    fs::write(&path, config).unwrap();
    path
}

#[test]
fn configured_identity_generates_and_stores() {
    let dir = tempfile::tempdir().unwrap();
    common::write_p12(dir.path(), 9, false);
    std::env::set_var("PASSFORGE_TEST_P12_STORE", common::P12_PASSPHRASE);
    let path = write_config(
        dir.path(),
        "[signing]\npkcs12_path = \"pass.p12\"\npassphrase_env = \"PASSFORGE_TEST_P12_STORE\"\n",
    );

    let config = EngineConfig::load(&path).unwrap();
    let engine = GenerationEngine::from_config(&config).unwrap();
    assert_eq!(engine.signature_kind(), SignatureKind::EcdsaP256Sha256);

    let store = DirectoryStore::new(config.output_dir());
    let template = common::template();
    let context = common::context();
    let outcome = engine
        .generate_and_store(&GenerationRequest::new(&template, &context), &store)
        .unwrap();

    let stored = outcome.stored.clone().unwrap();
    let target = dir.path().join("bundles").join("SN-0001.pkpass");
    assert_eq!(std::path::PathBuf::from(&stored.location), target);
    let on_disk = fs::read(&target).unwrap();
    assert_eq!(on_disk, outcome.bundle.archive);
    assert_eq!(stored.sha256, outcome.bundle.archive_sha256());
    assert!(verify_bundle(&on_disk).is_ok());
}

#[test]
fn wrong_passphrase_is_fatal_in_production() {
    let dir = tempfile::tempdir().unwrap();
    common::write_p12(dir.path(), 9, false);
    std::env::set_var("PASSFORGE_TEST_P12_WRONG", "not the passphrase");
    let path = write_config(
        dir.path(),
        "[signing]\npkcs12_path = \"pass.p12\"\npassphrase_env = \"PASSFORGE_TEST_P12_WRONG\"\n",
    );

    let config = EngineConfig::load(&path).unwrap();
    assert!(matches!(
        GenerationEngine::from_config(&config),
        Err(PipelineError::Identity(SigningError::BadPassphrase))
    ));
}

#[test]
fn production_without_identity_refuses_to_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "");
    let config = EngineConfig::load(&path).unwrap();
    assert!(matches!(
        GenerationEngine::from_config(&config),
        Err(PipelineError::Identity(SigningError::NotConfigured))
    ));
}

#[test]
fn development_placeholder_is_marked_and_does_not_verify() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        "[signing]\nprofile = \"development\"\nallow_placeholder_signature = true\n",
    );
    let config = EngineConfig::load(&path).unwrap();
    let engine = GenerationEngine::from_config(&config).unwrap();
    assert_eq!(engine.signature_kind(), SignatureKind::Placeholder);

    let template = common::template();
    let context = common::context();
    let outcome = engine
        .generate(&GenerationRequest::new(&template, &context))
        .unwrap();
    assert_eq!(outcome.bundle.signature_kind, SignatureKind::Placeholder);
    assert!(outcome.warnings.iter().any(|w| w.contains("placeholder")));
    assert!(matches!(
        verify_bundle(&outcome.bundle.archive),
        Err(ArchiveError::Signature(SigningError::PlaceholderSignature))
    ));
}

#[test]
fn expired_certificate_fails_at_signing_and_stores_nothing() {
    let dir = tempfile::tempdir().unwrap();
    common::write_p12(dir.path(), 11, true);
    std::env::set_var("PASSFORGE_TEST_P12_EXPIRED", common::P12_PASSPHRASE);
    let path = write_config(
        dir.path(),
        "[signing]\npkcs12_path = \"pass.p12\"\npassphrase_env = \"PASSFORGE_TEST_P12_EXPIRED\"\n",
    );

    let config = EngineConfig::load(&path).unwrap();
    let engine = GenerationEngine::from_config(&config).unwrap();
    let store = DirectoryStore::new(config.output_dir());
    let template = common::template();
    let context = common::context();

    let err = engine
        .generate_and_store(&GenerationRequest::new(&template, &context), &store)
        .unwrap_err();
    assert!(matches!(err, PipelineError::Stage { stage: Stage::Signed, .. }));
    assert!(!config.output_dir().exists());
}

#[test]
fn rsa_pkcs12_from_openssl_signs_verifiable_bundles() {
    let dir = tempfile::tempdir().unwrap();
    let fixture =
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/rsa_signer.p12");
    fs::copy(fixture, dir.path().join("pass.p12")).unwrap();
    std::env::set_var("PASSFORGE_TEST_P12_RSA", "fixture-passphrase");
    let path = write_config(
        dir.path(),
        "[signing]\npkcs12_path = \"pass.p12\"\npassphrase_env = \"PASSFORGE_TEST_P12_RSA\"\n",
    );

    let config = EngineConfig::load(&path).unwrap();
    let engine = GenerationEngine::from_config(&config).unwrap();
    assert_eq!(engine.signature_kind(), SignatureKind::RsaSha256);

    let outcome = generate_with(&engine);
    let report = verify_bundle(&outcome.bundle.archive).unwrap();
    assert_eq!(report.signature_kind, SignatureKind::RsaSha256);
    assert!(report.signer.contains("Pass Type ID: pass.com.example.loyalty"));
}

#[test]
fn wide_logo_drops_logo_text() {
    use base64::Engine;

    let mut logo = Vec::new();
    image::RgbaImage::from_pixel(400, 100, image::Rgba([255, 255, 255, 255]))
        .write_to(&mut std::io::Cursor::new(&mut logo), image::ImageFormat::Png)
        .unwrap();
    let mut template = common::template();
    template.images.logo = Some(AssetSource::Base64 {
        base64: base64::engine::general_purpose::STANDARD.encode(&logo),
    });

    let engine = common::engine(common::signing_identity(7));
    let context = common::context();
    let outcome = engine
        .generate(&GenerationRequest::new(&template, &context))
        .unwrap();
    assert_eq!(outcome.document.logo_text, None);

    // The square default glyph leaves the text in place.
    assert_eq!(generate().document.logo_text.as_deref(), Some("Bean Co"));
}
