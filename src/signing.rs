//! Detached Manifest Signatures
//!
//! The `signature` member is a DER-encoded CMS `SignedData` (RFC 5652) over
//! the detached manifest bytes. Signed attributes carry the content type,
//! the signing time and the SHA-256 message digest; the signer certificate
//! and the rest of the PKCS#12 chain are embedded for the verifier.
//!
//! RSA keys sign with PKCS#1 v1.5 and ECDSA P-256 keys with RFC 6979 nonces,
//! so a fixed signing time gives identical signature bytes.

use chrono::{DateTime, Utc};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedAttributes, SignedData, SignerIdentifier,
    SignerInfo, SignerInfos,
};
use const_oid::db::{rfc5911, rfc5912};
use der::asn1::{GeneralizedTime, ObjectIdentifier, OctetString, SetOfVec, UtcTime};
use der::{Any, Decode, DecodeOwned, Encode};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, PrivateKeyInfo};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use x509_cert::attr::Attribute;
use x509_cert::spki::AlgorithmIdentifierOwned;
use x509_cert::time::Time;
use x509_cert::Certificate;

const PLACEHOLDER_LABEL: &str = "UNSIGNED DEVELOPMENT PLACEHOLDER";

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("signing identity is not configured")]
    NotConfigured,

    #[error("passphrase environment variable {0} is not set")]
    PassphraseUnset(String),

    #[error("failed to read signing identity {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed PKCS#12 container: {0}")]
    Pkcs12(String),

    #[error("PKCS#12 passphrase rejected")]
    BadPassphrase,

    #[error("PKCS#12 container holds no private key")]
    MissingKey,

    #[error("PKCS#12 container holds no certificate")]
    MissingCertificate,

    #[error("private key is not a usable RSA or ECDSA P-256 PKCS#8 key: {0}")]
    InvalidKey(String),

    #[error("invalid certificate: {0}")]
    Certificate(String),

    #[error("key algorithm {0} is not RSA or ECDSA P-256")]
    UnsupportedKeyAlgorithm(String),

    #[error("certificate does not match the private key")]
    KeyMismatch,

    #[error("certificate is not valid at {0}")]
    CertificateNotValidAt(DateTime<Utc>),

    #[error("signing time {0} cannot be encoded")]
    SigningTimeOutOfRange(DateTime<Utc>),

    #[error("CMS encoding failed: {0}")]
    Encoding(#[from] der::Error),

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("placeholder signatures never verify")]
    PlaceholderSignature,

    #[error("signature does not match the manifest")]
    VerificationFailed,
}

fn malformed(reason: impl fmt::Display) -> SigningError {
    SigningError::MalformedSignature(reason.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureKind {
    /// RSA PKCS#1 v1.5 with SHA-256, what Wallet certificates use.
    RsaSha256,
    EcdsaP256Sha256,
    /// Development-only stand-in; carries no key material and never verifies.
    Placeholder,
}

enum SignerKey {
    Rsa(rsa::pkcs1v15::SigningKey<Sha256>),
    EcdsaP256(p256::ecdsa::SigningKey),
}

impl SignerKey {
    fn from_pkcs8(der: &[u8]) -> Result<Self, SigningError> {
        let invalid = |e: &dyn fmt::Display| SigningError::InvalidKey(e.to_string());
        let algorithm = PrivateKeyInfo::from_der(der).map_err(|e| invalid(&e))?.algorithm.oid;
        if algorithm == rfc5912::RSA_ENCRYPTION {
            let key = rsa::RsaPrivateKey::from_pkcs8_der(der).map_err(|e| invalid(&e))?;
            Ok(SignerKey::Rsa(rsa::pkcs1v15::SigningKey::new(key)))
        } else if algorithm == rfc5912::ID_EC_PUBLIC_KEY {
            let key = p256::ecdsa::SigningKey::from_pkcs8_der(der).map_err(|e| invalid(&e))?;
            Ok(SignerKey::EcdsaP256(key))
        } else {
            Err(SigningError::UnsupportedKeyAlgorithm(algorithm.to_string()))
        }
    }

    fn matches(&self, public: &PublicKey) -> bool {
        match (self, public) {
            (SignerKey::Rsa(key), PublicKey::Rsa(public)) => {
                let private: &rsa::RsaPrivateKey = key.as_ref();
                private.to_public_key() == *public
            }
            (SignerKey::EcdsaP256(key), PublicKey::EcdsaP256(public)) => {
                key.verifying_key() == public
            }
            _ => false,
        }
    }

    fn kind(&self) -> SignatureKind {
        match self {
            SignerKey::Rsa(_) => SignatureKind::RsaSha256,
            SignerKey::EcdsaP256(_) => SignatureKind::EcdsaP256Sha256,
        }
    }

    fn sign(&self, message: &[u8]) -> Result<(AlgorithmIdentifierOwned, Vec<u8>), SigningError> {
        let failed = |e: rsa::signature::Error| SigningError::InvalidKey(e.to_string());
        match self {
            SignerKey::Rsa(key) => {
                let signature = key.try_sign(message).map_err(failed)?;
                let algorithm = AlgorithmIdentifierOwned {
                    oid: rfc5912::RSA_ENCRYPTION,
                    parameters: Some(Any::null()),
                };
                Ok((algorithm, signature.to_bytes().into_vec()))
            }
            SignerKey::EcdsaP256(key) => {
                let signature: p256::ecdsa::Signature = key.try_sign(message).map_err(failed)?;
                let algorithm = AlgorithmIdentifierOwned {
                    oid: rfc5912::ECDSA_WITH_SHA_256,
                    parameters: None,
                };
                Ok((algorithm, signature.to_der().as_bytes().to_vec()))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PublicKey {
    Rsa(rsa::RsaPublicKey),
    EcdsaP256(p256::ecdsa::VerifyingKey),
}

impl PublicKey {
    fn verify(
        &self,
        algorithm: ObjectIdentifier,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), SigningError> {
        match self {
            PublicKey::Rsa(key) => {
                if algorithm != rfc5912::RSA_ENCRYPTION
                    && algorithm != rfc5912::SHA_256_WITH_RSA_ENCRYPTION
                {
                    return Err(SigningError::UnsupportedKeyAlgorithm(algorithm.to_string()));
                }
                let signature =
                    rsa::pkcs1v15::Signature::try_from(signature).map_err(malformed)?;
                rsa::pkcs1v15::VerifyingKey::<Sha256>::new(key.clone())
                    .verify(message, &signature)
                    .map_err(|_| SigningError::VerificationFailed)
            }
            PublicKey::EcdsaP256(key) => {
                if algorithm != rfc5912::ECDSA_WITH_SHA_256 {
                    return Err(SigningError::UnsupportedKeyAlgorithm(algorithm.to_string()));
                }
                let signature = p256::ecdsa::Signature::from_der(signature).map_err(malformed)?;
                key.verify(message, &signature)
                    .map_err(|_| SigningError::VerificationFailed)
            }
        }
    }
}

struct CertificateInfo {
    certificate: Certificate,
    public_key: PublicKey,
    subject: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl CertificateInfo {
    fn parse(der: &[u8]) -> Result<Self, SigningError> {
        let certificate =
            Certificate::from_der(der).map_err(|e| SigningError::Certificate(e.to_string()))?;
        Self::from_certificate(certificate)
    }

    fn from_certificate(certificate: Certificate) -> Result<Self, SigningError> {
        let invalid = |e: &dyn fmt::Display| SigningError::Certificate(e.to_string());
        let tbs = &certificate.tbs_certificate;
        let spki = &tbs.subject_public_key_info;
        let spki_der = spki.to_der().map_err(|e| invalid(&e))?;
        let public_key = if spki.algorithm.oid == rfc5912::RSA_ENCRYPTION {
            PublicKey::Rsa(
                rsa::RsaPublicKey::from_public_key_der(&spki_der).map_err(|e| invalid(&e))?,
            )
        } else if spki.algorithm.oid == rfc5912::ID_EC_PUBLIC_KEY {
            PublicKey::EcdsaP256(
                p256::ecdsa::VerifyingKey::from_public_key_der(&spki_der)
                    .map_err(|e| invalid(&e))?,
            )
        } else {
            return Err(SigningError::UnsupportedKeyAlgorithm(spki.algorithm.oid.to_string()));
        };
        Ok(Self {
            public_key,
            subject: tbs.subject.to_string(),
            not_before: decode_time(tbs.validity.not_before)?,
            not_after: decode_time(tbs.validity.not_after)?,
            certificate,
        })
    }

    fn check_valid_at(&self, at: DateTime<Utc>) -> Result<(), SigningError> {
        if at < self.not_before || at > self.not_after {
            return Err(SigningError::CertificateNotValidAt(at));
        }
        Ok(())
    }

    fn issuer_and_serial(&self) -> IssuerAndSerialNumber {
        let tbs = &self.certificate.tbs_certificate;
        IssuerAndSerialNumber {
            issuer: tbs.issuer.clone(),
            serial_number: tbs.serial_number.clone(),
        }
    }
}

fn decode_time(time: Time) -> Result<DateTime<Utc>, SigningError> {
    let secs = i64::try_from(time.to_unix_duration().as_secs())
        .map_err(|e| SigningError::Certificate(e.to_string()))?;
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| SigningError::Certificate("time out of range".into()))
}

/// UTCTime through 2049, GeneralizedTime after, as RFC 5652 requires.
fn encode_time(at: DateTime<Utc>) -> Result<Time, SigningError> {
    let out_of_range = || SigningError::SigningTimeOutOfRange(at);
    let secs = u64::try_from(at.timestamp()).map_err(|_| out_of_range())?;
    let since_epoch = Duration::from_secs(secs);
    match UtcTime::from_unix_duration(since_epoch) {
        Ok(utc) => Ok(Time::UtcTime(utc)),
        Err(_) => GeneralizedTime::from_unix_duration(since_epoch)
            .map(Time::GeneralTime)
            .map_err(|_| out_of_range()),
    }
}

/// Enrolled signing identity. Key material stays inside; `Debug` is redacted.
pub struct SigningIdentity {
    key: SignerKey,
    certificate_der: Vec<u8>,
    certificate: CertificateInfo,
    chain: Vec<Certificate>,
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("subject", &self.certificate.subject)
            .field("kind", &self.key.kind())
            .field("key", &"<redacted>")
            .finish()
    }
}

impl SigningIdentity {
    /// Build from a PKCS#8 RSA or P-256 key and a DER certificate for the same key.
    pub fn from_parts(key_pkcs8_der: &[u8], certificate_der: &[u8]) -> Result<Self, SigningError> {
        let key = SignerKey::from_pkcs8(key_pkcs8_der)?;
        let certificate = CertificateInfo::parse(certificate_der)?;
        if !key.matches(&certificate.public_key) {
            return Err(SigningError::KeyMismatch);
        }
        Ok(Self {
            key,
            certificate_der: certificate_der.to_vec(),
            certificate,
            chain: Vec::new(),
        })
    }

    /// Loads the first private key entry. Its issuing certificates travel
    /// in every signature.
    pub fn from_pkcs12(der: &[u8], passphrase: &str) -> Result<Self, SigningError> {
        let store = p12_keystore::KeyStore::from_pkcs12(der, passphrase).map_err(|e| match e {
            p12_keystore::error::Error::MacError(_) => SigningError::BadPassphrase,
            other => SigningError::Pkcs12(other.to_string()),
        })?;
        let (alias, entry) = store.private_key_chain().ok_or(SigningError::MissingKey)?;
        let (leaf, issuers) = entry
            .chain()
            .split_first()
            .ok_or(SigningError::MissingCertificate)?;
        let mut identity = Self::from_parts(entry.key(), leaf.as_der())?;
        identity.chain = issuers
            .iter()
            .map(|cert| Certificate::from_der(cert.as_der()))
            .collect::<Result<_, _>>()
            .map_err(|e| SigningError::Certificate(e.to_string()))?;
        tracing::debug!(
            alias,
            subject = %identity.subject(),
            chain = identity.chain.len(),
            "loaded PKCS#12 signing identity"
        );
        Ok(identity)
    }

    pub fn from_pkcs12_file(path: &Path, passphrase: &str) -> Result<Self, SigningError> {
        let der = std::fs::read(path).map_err(|source| SigningError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_pkcs12(&der, passphrase)
    }

    pub fn subject(&self) -> &str {
        &self.certificate.subject
    }

    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    pub fn signature_kind(&self) -> SignatureKind {
        self.key.kind()
    }

    /// Fails if the certificate is not valid at `signing_time`.
    pub fn sign(
        &self,
        manifest: &[u8],
        signing_time: DateTime<Utc>,
    ) -> Result<DetachedSignature, SigningError> {
        self.certificate.check_valid_at(signing_time)?;
        let signing_time = truncate_to_seconds(signing_time);

        let signed_attrs = signed_attributes(manifest, signing_time)?;
        let (signature_algorithm, signature) = self.key.sign(&signed_attrs.to_der()?)?;
        let signer_info = SignerInfo {
            version: CmsVersion::V1,
            sid: SignerIdentifier::IssuerAndSerialNumber(self.certificate.issuer_and_serial()),
            digest_alg: sha256_algorithm(),
            signed_attrs: Some(signed_attrs),
            signature_algorithm,
            signature: OctetString::new(signature)?,
            unsigned_attrs: None,
        };

        let certificates = std::iter::once(&self.certificate.certificate)
            .chain(&self.chain)
            .cloned()
            .map(CertificateChoices::Certificate);
        let signed_data = SignedData {
            version: CmsVersion::V1,
            digest_algorithms: SetOfVec::from_iter([sha256_algorithm()])?,
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: rfc5911::ID_DATA,
                econtent: None,
            },
            certificates: Some(CertificateSet(SetOfVec::from_iter(certificates)?)),
            crls: None,
            signer_infos: SignerInfos(SetOfVec::from_iter([signer_info])?),
        };
        let content_info = ContentInfo {
            content_type: rfc5911::ID_SIGNED_DATA,
            content: Any::encode_from(&signed_data)?,
        };

        Ok(DetachedSignature {
            kind: self.key.kind(),
            signing_time,
            der: content_info.to_der()?,
        })
    }
}

fn truncate_to_seconds(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(t.timestamp(), 0).unwrap_or(t)
}

fn sha256_algorithm() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: rfc5912::ID_SHA_256,
        parameters: None,
    }
}

fn attribute(oid: ObjectIdentifier, value: Any) -> Result<Attribute, der::Error> {
    Ok(Attribute {
        oid,
        values: SetOfVec::from_iter([value])?,
    })
}

fn signed_attributes(
    manifest: &[u8],
    signing_time: DateTime<Utc>,
) -> Result<SignedAttributes, SigningError> {
    let digest = OctetString::new(Sha256::digest(manifest).as_slice())?;
    Ok(SetOfVec::from_iter([
        attribute(rfc5911::ID_CONTENT_TYPE, Any::encode_from(&rfc5911::ID_DATA)?)?,
        attribute(
            rfc5911::ID_SIGNING_TIME,
            Any::encode_from(&encode_time(signing_time)?)?,
        )?,
        attribute(rfc5911::ID_MESSAGE_DIGEST, Any::encode_from(&digest)?)?,
    ])?)
}

/// First value of the signed attribute `oid`.
fn attribute_value<T: DecodeOwned>(
    attrs: &SignedAttributes,
    oid: ObjectIdentifier,
) -> Result<T, SigningError> {
    let value = attrs
        .iter()
        .find(|attr| attr.oid == oid)
        .and_then(|attr| attr.values.get(0))
        .ok_or_else(|| malformed(format!("signed attribute {oid} missing")))?;
    T::from_der(&value.to_der()?).map_err(malformed)
}

/// A decoded CMS envelope with exactly one signer.
struct SignedEnvelope {
    signed_data: SignedData,
}

impl SignedEnvelope {
    fn decode(bytes: &[u8]) -> Result<Self, SigningError> {
        let content_info = ContentInfo::from_der(bytes).map_err(malformed)?;
        if content_info.content_type != rfc5911::ID_SIGNED_DATA {
            return Err(malformed(format!(
                "content type {} is not signed-data",
                content_info.content_type
            )));
        }
        let signed_data = content_info
            .content
            .decode_as::<SignedData>()
            .map_err(malformed)?;
        if signed_data.signer_infos.0.len() != 1 {
            return Err(malformed(format!(
                "expected one signer, found {}",
                signed_data.signer_infos.0.len()
            )));
        }
        if signed_data.encap_content_info.econtent.is_some() {
            return Err(malformed("content must be detached"));
        }
        Ok(Self { signed_data })
    }

    fn signer(&self) -> Result<&SignerInfo, SigningError> {
        let signer = self
            .signed_data
            .signer_infos
            .0
            .get(0)
            .ok_or_else(|| malformed("no signer"))?;
        if signer.digest_alg.oid != rfc5912::ID_SHA_256 {
            return Err(malformed(format!("digest {} is not SHA-256", signer.digest_alg.oid)));
        }
        Ok(signer)
    }

    fn signed_attrs(&self) -> Result<&SignedAttributes, SigningError> {
        self.signer()?
            .signed_attrs
            .as_ref()
            .ok_or_else(|| malformed("signed attributes missing"))
    }

    fn signing_time(&self) -> Result<DateTime<Utc>, SigningError> {
        let time: Time = attribute_value(self.signed_attrs()?, rfc5911::ID_SIGNING_TIME)?;
        decode_time(time).map_err(malformed)
    }

    fn kind(&self) -> Result<SignatureKind, SigningError> {
        let oid = self.signer()?.signature_algorithm.oid;
        if oid == rfc5912::RSA_ENCRYPTION || oid == rfc5912::SHA_256_WITH_RSA_ENCRYPTION {
            Ok(SignatureKind::RsaSha256)
        } else if oid == rfc5912::ECDSA_WITH_SHA_256 {
            Ok(SignatureKind::EcdsaP256Sha256)
        } else {
            Err(SigningError::UnsupportedKeyAlgorithm(oid.to_string()))
        }
    }

    /// The embedded certificate named by the signer identifier.
    fn signer_certificate(&self) -> Result<CertificateInfo, SigningError> {
        let SignerIdentifier::IssuerAndSerialNumber(sid) = &self.signer()?.sid else {
            return Err(malformed("signer must be named by issuer and serial number"));
        };
        self.signed_data
            .certificates
            .iter()
            .flat_map(|set| set.0.iter())
            .find_map(|choice| match choice {
                CertificateChoices::Certificate(cert)
                    if cert.tbs_certificate.issuer == sid.issuer
                        && cert.tbs_certificate.serial_number == sid.serial_number =>
                {
                    Some(cert.clone())
                }
                _ => None,
            })
            .ok_or_else(|| malformed("signer certificate is not embedded"))
            .and_then(CertificateInfo::from_certificate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedSignature {
    pub kind: SignatureKind,
    pub signing_time: DateTime<Utc>,
    /// DER `ContentInfo`, or the placeholder text.
    der: Vec<u8>,
}

impl DetachedSignature {
    pub fn placeholder(signing_time: DateTime<Utc>) -> Self {
        let signing_time = truncate_to_seconds(signing_time);
        let text = format!("{PLACEHOLDER_LABEL} {}", signing_time.to_rfc3339());
        Self {
            kind: SignatureKind::Placeholder,
            signing_time,
            der: text.into_bytes(),
        }
    }

    /// Bytes of the `signature` archive member.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.der.clone()
    }

    /// Decodes the envelope without checking the signature.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SigningError> {
        if let Some(rest) = bytes.strip_prefix(PLACEHOLDER_LABEL.as_bytes()) {
            let stamp = std::str::from_utf8(rest).map_err(malformed)?.trim();
            let signing_time = DateTime::parse_from_rfc3339(stamp)
                .map_err(malformed)?
                .with_timezone(&Utc);
            return Ok(Self {
                kind: SignatureKind::Placeholder,
                signing_time,
                der: bytes.to_vec(),
            });
        }
        let envelope = SignedEnvelope::decode(bytes)?;
        Ok(Self {
            kind: envelope.kind()?,
            signing_time: envelope.signing_time()?,
            der: bytes.to_vec(),
        })
    }

    /// Verify against the embedded signer certificate. Returns its subject.
    pub fn verify(&self, manifest: &[u8]) -> Result<String, SigningError> {
        if self.kind == SignatureKind::Placeholder {
            return Err(SigningError::PlaceholderSignature);
        }
        let envelope = SignedEnvelope::decode(&self.der)?;
        let signer = envelope.signer()?;
        let attrs = envelope.signed_attrs()?;

        let content_type: ObjectIdentifier = attribute_value(attrs, rfc5911::ID_CONTENT_TYPE)?;
        if content_type != rfc5911::ID_DATA {
            return Err(malformed(format!("signed content type {content_type} is not data")));
        }
        let digest: OctetString = attribute_value(attrs, rfc5911::ID_MESSAGE_DIGEST)?;
        if digest.as_bytes() != Sha256::digest(manifest).as_slice() {
            return Err(SigningError::VerificationFailed);
        }

        let certificate = envelope.signer_certificate()?;
        certificate.check_valid_at(self.signing_time)?;
        certificate.public_key.verify(
            signer.signature_algorithm.oid,
            &attrs.to_der()?,
            signer.signature.as_bytes(),
        )?;
        Ok(certificate.subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use p256::pkcs8::EncodePrivateKey;

    const FIXTURES: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

    fn fixture(name: &str) -> Vec<u8> {
        std::fs::read(Path::new(FIXTURES).join(name)).unwrap()
    }

    /// P-256 PKCS#8 key from a fixed seed and a self-signed certificate for it.
    fn identity_parts(seed: u8, expired: bool) -> (Vec<u8>, Vec<u8>) {
        let pkcs8 = p256::SecretKey::from_slice(&[seed; 32])
            .unwrap()
            .to_pkcs8_der()
            .unwrap()
            .as_bytes()
            .to_vec();
        let key = rcgen::KeyPair::try_from(pkcs8.as_slice()).unwrap();
        let mut params = rcgen::CertificateParams::new(vec!["passes.test".into()]).unwrap();
        if expired {
            params.not_before = rcgen::date_time_ymd(1999, 1, 1);
            params.not_after = rcgen::date_time_ymd(2000, 1, 1);
        }
        let cert = params.self_signed(&key).unwrap();
        (pkcs8, cert.der().to_vec())
    }

    fn rsa_identity() -> SigningIdentity {
        SigningIdentity::from_parts(&fixture("rsa_signer.key.der"), &fixture("rsa_signer.crt.der"))
            .unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let (key, cert) = identity_parts(7, false);
        let identity = SigningIdentity::from_parts(&key, &cert).unwrap();
        assert_eq!(identity.signature_kind(), SignatureKind::EcdsaP256Sha256);
        let manifest = br#"{"pass.json":"00"}"#;
        let sig = identity.sign(manifest, now()).unwrap();
        let parsed = DetachedSignature::from_bytes(&sig.to_bytes()).unwrap();
        assert_eq!(parsed, sig);
        assert_eq!(parsed.signing_time, now());
        assert!(parsed.verify(manifest).is_ok());
    }

    #[test]
    fn rsa_signature_is_cms_signed_data() {
        let identity = rsa_identity();
        assert_eq!(identity.signature_kind(), SignatureKind::RsaSha256);
        let manifest = br#"{"icon.png":"ab"}"#;
        let sig = identity.sign(manifest, now()).unwrap();

        let content_info = ContentInfo::from_der(&sig.to_bytes()).unwrap();
        assert_eq!(content_info.content_type, rfc5911::ID_SIGNED_DATA);
        let signed_data = content_info.content.decode_as::<SignedData>().unwrap();
        assert_eq!(signed_data.encap_content_info.econtent_type, rfc5911::ID_DATA);
        assert!(signed_data.encap_content_info.econtent.is_none());
        assert_eq!(signed_data.certificates.as_ref().unwrap().0.len(), 1);

        let signer = signed_data.signer_infos.0.get(0).unwrap();
        assert_eq!(signer.digest_alg.oid, rfc5912::ID_SHA_256);
        assert_eq!(signer.signature_algorithm.oid, rfc5912::RSA_ENCRYPTION);
        assert_eq!(signer.signature.as_bytes().len(), 256);
        let attrs = signer.signed_attrs.as_ref().unwrap();
        let digest: OctetString = attribute_value(attrs, rfc5911::ID_MESSAGE_DIGEST).unwrap();
        assert_eq!(digest.as_bytes(), Sha256::digest(manifest).as_slice());

        let subject = sig.verify(manifest).unwrap();
        assert!(subject.contains("Pass Type ID: pass.com.example.loyalty"), "{subject}");
    }

    #[test]
    fn rsa_signatures_are_deterministic() {
        let identity = rsa_identity();
        let first = identity.sign(b"{}", now()).unwrap();
        let second = identity.sign(b"{}", now()).unwrap();
        assert_eq!(first.to_bytes(), second.to_bytes());
    }

    #[test]
    fn verifies_openssl_detached_signature() {
        let sig = DetachedSignature::from_bytes(&fixture("openssl_manifest.signature")).unwrap();
        assert_eq!(sig.kind, SignatureKind::RsaSha256);
        assert_eq!(sig.signing_time, Utc.with_ymd_and_hms(2026, 10, 16, 11, 39, 37).unwrap());

        let manifest = fixture("openssl_manifest.json");
        let subject = sig.verify(&manifest).unwrap();
        assert!(subject.contains("pass.com.example.loyalty"), "{subject}");

        let mut altered = manifest.clone();
        altered[2] ^= 0x01;
        assert!(matches!(sig.verify(&altered), Err(SigningError::VerificationFailed)));
    }

    #[test]
    fn altered_manifest_fails() {
        let (key, cert) = identity_parts(7, false);
        let identity = SigningIdentity::from_parts(&key, &cert).unwrap();
        let sig = identity.sign(b"{\"a\":\"1\"}", now()).unwrap();
        assert!(matches!(
            sig.verify(b"{\"a\":\"2\"}"),
            Err(SigningError::VerificationFailed)
        ));
    }

    #[test]
    fn mismatched_key_and_certificate_rejected() {
        let (key, _) = identity_parts(1, false);
        let (_, other_cert) = identity_parts(2, false);
        assert!(matches!(
            SigningIdentity::from_parts(&key, &other_cert),
            Err(SigningError::KeyMismatch)
        ));
        assert!(matches!(
            SigningIdentity::from_parts(&key, &fixture("rsa_signer.crt.der")),
            Err(SigningError::KeyMismatch)
        ));
    }

    #[test]
    fn expired_certificate_cannot_sign() {
        let (key, cert) = identity_parts(7, true);
        let identity = SigningIdentity::from_parts(&key, &cert).unwrap();
        assert!(matches!(
            identity.sign(b"{}", now()),
            Err(SigningError::CertificateNotValidAt(_))
        ));
    }

    #[test]
    fn openssl_pkcs12_loads_and_rejects_bad_passphrase() {
        let p12 = fixture("rsa_signer.p12");
        let identity = SigningIdentity::from_pkcs12(&p12, "fixture-passphrase").unwrap();
        assert_eq!(identity.certificate_der(), fixture("rsa_signer.crt.der").as_slice());
        assert_eq!(identity.signature_kind(), SignatureKind::RsaSha256);
        assert!(matches!(
            SigningIdentity::from_pkcs12(&p12, "wrong"),
            Err(SigningError::BadPassphrase)
        ));
    }

    #[test]
    fn pkcs12_written_by_keystore_round_trips() {
        let (key, cert) = identity_parts(7, false);
        let mut store = p12_keystore::KeyStore::new();
        let chain = p12_keystore::PrivateKeyChain::new(
            &key,
            [1u8; 20],
            [p12_keystore::Certificate::from_der(&cert).unwrap()],
        );
        store.add_entry("pass", p12_keystore::KeyStoreEntry::PrivateKeyChain(chain));
        let pfx = store.writer("hunter2").write().unwrap();

        let identity = SigningIdentity::from_pkcs12(&pfx, "hunter2").unwrap();
        assert_eq!(identity.certificate_der(), cert.as_slice());
        assert!(matches!(
            SigningIdentity::from_pkcs12(&pfx, "wrong"),
            Err(SigningError::BadPassphrase)
        ));
    }

    #[test]
    fn placeholder_never_verifies() {
        let sig = DetachedSignature::placeholder(now());
        let parsed = DetachedSignature::from_bytes(&sig.to_bytes()).unwrap();
        assert_eq!(parsed.kind, SignatureKind::Placeholder);
        assert_eq!(parsed.signing_time, now());
        assert!(matches!(parsed.verify(b"{}"), Err(SigningError::PlaceholderSignature)));
    }

    #[test]
    fn debug_output_is_redacted() {
        let identity = rsa_identity();
        let debug = format!("{identity:?}");
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn garbage_envelope_rejected() {
        let sig = rsa_identity().sign(b"{}", now()).unwrap().to_bytes();
        assert!(DetachedSignature::from_bytes(&sig[..10]).is_err());
        assert!(DetachedSignature::from_bytes(b"XXXX").is_err());
    }
}
