//! Barcode Formats - Platform Mapping and Charset Rules
//!
//! Symbol rendering belongs to an external collaborator. This module only
//! knows which messages each symbology can carry and how formats map onto
//! the wallet platform's identifiers.

use serde::{Deserialize, Serialize};

/// QR payloads above this many bytes get dense enough to scan poorly.
pub const QR_WARN_BYTES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarcodeFormat {
    Qr,
    Code128,
    Code39,
    Ean13,
    Ean8,
    Upca,
    Pdf417,
    Aztec,
}

impl BarcodeFormat {
    pub fn name(self) -> &'static str {
        match self {
            BarcodeFormat::Qr => "QR",
            BarcodeFormat::Code128 => "Code128",
            BarcodeFormat::Code39 => "Code39",
            BarcodeFormat::Ean13 => "EAN-13",
            BarcodeFormat::Ean8 => "EAN-8",
            BarcodeFormat::Upca => "UPC-A",
            BarcodeFormat::Pdf417 => "PDF417",
            BarcodeFormat::Aztec => "Aztec",
        }
    }

    /// Wallet platform format identifier.
    ///
    /// Linear retail symbologies have no native wallet format and ride on Code128.
    pub fn platform_identifier(self) -> &'static str {
        match self {
            BarcodeFormat::Qr => "PKBarcodeFormatQR",
            BarcodeFormat::Pdf417 => "PKBarcodeFormatPDF417",
            BarcodeFormat::Aztec => "PKBarcodeFormatAztec",
            BarcodeFormat::Code128
            | BarcodeFormat::Code39
            | BarcodeFormat::Ean13
            | BarcodeFormat::Ean8
            | BarcodeFormat::Upca => "PKBarcodeFormatCode128",
        }
    }

    /// Check a resolved message against the symbology's character set.
    pub fn check_message(self, message: &str) -> CharsetCheck {
        if message.is_empty() {
            return CharsetCheck::Invalid("message is empty".to_string());
        }
        match self {
            BarcodeFormat::Ean13 => numeric_of_len(message, &[12, 13]),
            BarcodeFormat::Ean8 => numeric_of_len(message, &[7, 8]),
            BarcodeFormat::Upca => numeric_of_len(message, &[11, 12]),
            BarcodeFormat::Code128 => match message.chars().find(|c| !c.is_ascii()) {
                Some(c) => CharsetCheck::Invalid(format!("non-ASCII character '{c}'")),
                None => CharsetCheck::Ok,
            },
            BarcodeFormat::Code39 => match message.chars().find(|c| !is_code39_char(*c)) {
                Some(c) => CharsetCheck::Invalid(format!(
                    "character '{c}' outside Code39 set (A-Z 0-9 space - . $ / + %)"
                )),
                None => CharsetCheck::Ok,
            },
            BarcodeFormat::Pdf417 | BarcodeFormat::Aztec => {
                match message.chars().find(|c| u32::from(*c) > 0xFF) {
                    Some(c) => CharsetCheck::Invalid(format!(
                        "character '{c}' not encodable in ISO-8859-1"
                    )),
                    None => CharsetCheck::Ok,
                }
            }
            BarcodeFormat::Qr => {
                if message.len() > QR_WARN_BYTES {
                    CharsetCheck::Oversized {
                        bytes: message.len(),
                        limit: QR_WARN_BYTES,
                    }
                } else {
                    CharsetCheck::Ok
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CharsetCheck {
    Ok,
    Invalid(String),
    /// Encodable, but large enough to warrant a warning.
    Oversized { bytes: usize, limit: usize },
}

fn numeric_of_len(message: &str, lengths: &[usize]) -> CharsetCheck {
    if let Some(c) = message.chars().find(|c| !c.is_ascii_digit()) {
        return CharsetCheck::Invalid(format!("non-digit character '{c}'"));
    }
    if !lengths.contains(&message.len()) {
        let allowed: Vec<String> = lengths.iter().map(|l| l.to_string()).collect();
        return CharsetCheck::Invalid(format!(
            "length {} not in {{{}}}",
            message.len(),
            allowed.join(", ")
        ));
    }
    CharsetCheck::Ok
}

fn is_code39_char(c: char) -> bool {
    c.is_ascii_uppercase()
        || c.is_ascii_digit()
        || matches!(c, ' ' | '-' | '.' | '$' | '/' | '+' | '%')
}

/// External barcode service: message and format in, raster bytes out.
pub trait BarcodeRenderer: Send + Sync {
    fn render(&self, message: &str, format: BarcodeFormat) -> Result<Vec<u8>, BarcodeRenderError>;
}

#[derive(Debug, thiserror::Error)]
#[error("barcode rendering failed: {0}")]
pub struct BarcodeRenderError(pub String);
