//! Shared fixtures: a throwaway ECDSA P-256 signing identity, a stamp-card
//! template and a runtime context.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use p256::pkcs8::EncodePrivateKey;
use serde_json::json;
use std::path::{Path, PathBuf};

use passforge_core::pipeline::EngineSettings;
use passforge_core::profile::SignatureSource;
use passforge_core::{GenerationEngine, PassTemplate, RuntimeContext, SigningIdentity};
use std::sync::Arc;

pub const P12_PASSPHRASE: &str = "correct horse battery staple";

/// PKCS#8 P-256 key from `seed` and a self-signed certificate for it.
pub fn identity_parts(seed: u8, expired: bool) -> (Vec<u8>, Vec<u8>) {
    let pkcs8 = p256::SecretKey::from_slice(&[seed; 32])
        .expect("scalar in range")
        .to_pkcs8_der()
        .expect("encode pkcs8")
        .as_bytes()
        .to_vec();
    let key = rcgen::KeyPair::try_from(pkcs8.as_slice()).expect("rcgen key");
    let mut params =
        rcgen::CertificateParams::new(vec!["passes.example.test".into()]).expect("params");
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "PassForge Test Signer");
    if expired {
        params.not_before = rcgen::date_time_ymd(1999, 1, 1);
        params.not_after = rcgen::date_time_ymd(2000, 1, 1);
    }
    let cert = params.self_signed(&key).expect("self-signed cert");
    (pkcs8, cert.der().to_vec())
}

pub fn signing_identity(seed: u8) -> SigningIdentity {
    let (key, cert) = identity_parts(seed, false);
    SigningIdentity::from_parts(&key, &cert).expect("identity")
}

/// Write a PKCS#12 container to `dir` and return its path.
pub fn write_p12(dir: &Path, seed: u8, expired: bool) -> PathBuf {
    let (key, cert) = identity_parts(seed, expired);
    let chain = p12_keystore::PrivateKeyChain::new(
        &key,
        [seed; 20],
        [p12_keystore::Certificate::from_der(&cert).expect("keystore cert")],
    );
    let mut store = p12_keystore::KeyStore::new();
    store.add_entry("passforge", p12_keystore::KeyStoreEntry::PrivateKeyChain(chain));
    let pfx = store.writer(P12_PASSPHRASE).write().expect("pfx");
    let path = dir.join("pass.p12");
    std::fs::write(&path, pfx).expect("write p12");
    path
}

pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 9, 30, 0).unwrap()
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        worker_threads: 2,
        pass_type_identifier: "pass.com.example.loyalty".into(),
        team_identifier: "ABCDE12345".into(),
        asset_root: None,
    }
}

pub fn engine(identity: SigningIdentity) -> GenerationEngine {
    GenerationEngine::new(settings(), SignatureSource::Identity(Arc::new(identity)))
        .expect("engine")
}

/// Ten-stamp coffee card with milestones at 8 and 10 on a black strip.
pub fn template() -> PassTemplate {
    serde_json::from_value(json!({
        "id": "coffee-card",
        "name": "Coffee Card",
        "description": "Bean Co loyalty card for {{customerName}}",
        "organizationName": "Bean Co",
        "logoText": "Bean Co",
        "colors": {
            "foreground": "rgb(255, 255, 255)",
            "background": "rgb(20, 20, 20)",
            "label": "rgb(200, 200, 200)",
            "stripBackground": "#000000"
        },
        "fields": {
            "header": [{"key": "points", "label": "POINTS", "value": "{{points}}"}],
            "primary": [{
                "key": "stamps",
                "label": "STAMPS",
                "value": "{{stampsEarned}} of {{stampsRequired}}",
                "textAlignment": "center"
            }],
            "secondary": [{"key": "member", "label": "MEMBER", "value": "{{customerName}}"}],
            "back": [{"key": "terms", "label": "TERMS", "value": "One stamp per purchase."}]
        },
        "barcode": {"format": "qr", "altText": "{{customerId}}"},
        "stampProgram": {"milestones": [8, 10]},
        "expiry": {"enabled": true}
    }))
    .expect("fixture template")
}

pub fn context() -> RuntimeContext {
    serde_json::from_value(json!({
        "stampsEarned": 7,
        "stampsRequired": 10,
        "points": 70,
        "expiryDate": "2026-12-31",
        "customerId": "cust-0042",
        "campaignId": "spring-2026",
        "customerName": "Ada",
        "serialNumber": "SN-0001",
        "locale": "en-US"
    }))
    .expect("fixture context")
}
