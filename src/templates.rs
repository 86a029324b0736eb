//! Template System - Pass Templates and Runtime Context
//!
//! A template is owned by the editor and is immutable for the duration of a
//! generation request. The runtime context carries the per-recipient values.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::barcode::BarcodeFormat;

pub type TemplateId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassTemplate {
    pub id: TemplateId,
    pub name: String,
    pub description: String,
    pub organization_name: String,
    #[serde(default = "default_template_version")]
    pub template_version: String,
    #[serde(default = "default_template_version")]
    pub engine_min_version: String,
    #[serde(default)]
    pub logo_text: Option<String>,
    pub colors: ColorSet,
    #[serde(default)]
    pub fields: FieldSections,
    #[serde(default)]
    pub images: ImageAssets,
    pub barcode: BarcodeSpec,
    #[serde(default)]
    pub stamp_program: StampProgram,
    #[serde(default)]
    pub strip: StripConfig,
    #[serde(default)]
    pub expiry: ExpiryConfig,
}

fn default_template_version() -> String {
    "1.0.0".to_string()
}

impl PassTemplate {
    pub fn from_json_file(path: &Path) -> Result<Self, TemplateLoadError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateLoadError {
    #[error("Failed to read input: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Raw color strings; parsed and checked by the validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorSet {
    pub foreground: String,
    pub background: String,
    pub label: String,
    pub strip_background: String,
    /// Milestone ring color. Defaults to a warm gold.
    #[serde(default)]
    pub accent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldSection {
    Header,
    Primary,
    Secondary,
    Auxiliary,
    Back,
}

impl FieldSection {
    pub const ALL: [FieldSection; 5] = [
        FieldSection::Header,
        FieldSection::Primary,
        FieldSection::Secondary,
        FieldSection::Auxiliary,
        FieldSection::Back,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FieldSection::Header => "header",
            FieldSection::Primary => "primary",
            FieldSection::Secondary => "secondary",
            FieldSection::Auxiliary => "auxiliary",
            FieldSection::Back => "back",
        }
    }

    /// Platform display limit; `None` for the unbounded back section.
    pub fn max_fields(self) -> Option<usize> {
        match self {
            FieldSection::Header => Some(2),
            FieldSection::Primary => Some(2),
            FieldSection::Secondary => Some(4),
            FieldSection::Auxiliary => Some(4),
            FieldSection::Back => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSections {
    #[serde(default)]
    pub header: Vec<FieldDef>,
    #[serde(default)]
    pub primary: Vec<FieldDef>,
    #[serde(default)]
    pub secondary: Vec<FieldDef>,
    #[serde(default)]
    pub auxiliary: Vec<FieldDef>,
    #[serde(default)]
    pub back: Vec<FieldDef>,
}

impl FieldSections {
    pub fn section(&self, section: FieldSection) -> &[FieldDef] {
        match section {
            FieldSection::Header => &self.header,
            FieldSection::Primary => &self.primary,
            FieldSection::Secondary => &self.secondary,
            FieldSection::Auxiliary => &self.auxiliary,
            FieldSection::Back => &self.back,
        }
    }

    /// All fields in section order.
    pub fn iter(&self) -> impl Iterator<Item = (FieldSection, &FieldDef)> {
        FieldSection::ALL
            .into_iter()
            .flat_map(move |s| self.section(s).iter().map(move |f| (s, f)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub key: String,
    #[serde(default)]
    pub label: String,
    /// May contain `{{placeholder}}` tokens.
    pub value: String,
    #[serde(default)]
    pub text_alignment: Option<TextAlignment>,
    #[serde(default)]
    pub change_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlignment {
    Left,
    Center,
    Right,
    Natural,
}

/// Where an image comes from: a path under the asset root, or inline bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssetSource {
    Path { path: String },
    Base64 { base64: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAssets {
    #[serde(default)]
    pub logo: Option<AssetSource>,
    #[serde(default)]
    pub icon: Option<AssetSource>,
    #[serde(default)]
    pub strip: Option<AssetSource>,
    #[serde(default)]
    pub stamp_unredeemed: Option<AssetSource>,
    #[serde(default)]
    pub stamp_earned: Option<AssetSource>,
    #[serde(default)]
    pub stamp_milestone: Option<AssetSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BarcodeSpec {
    /// Colon-delimited segments, each of which may hold placeholders.
    #[serde(default)]
    pub message_template: String,
    pub format: BarcodeFormat,
    #[serde(default)]
    pub alt_text: Option<String>,
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

fn default_encoding() -> String {
    "iso-8859-1".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StampProgram {
    /// 1-based stamp positions that get milestone treatment.
    #[serde(default)]
    pub milestones: Vec<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StripMode {
    /// Stamp grid composed over the strip background.
    #[default]
    StampGrid,
    /// The template's strip image as-is, no stamps.
    Static,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StripConfig {
    #[serde(default)]
    pub mode: StripMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_expiry_key")]
    pub key: String,
    #[serde(default = "default_expiry_label")]
    pub label: String,
}

fn default_expiry_key() -> String {
    "expires".to_string()
}

fn default_expiry_label() -> String {
    "EXPIRES".to_string()
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            key: default_expiry_key(),
            label: default_expiry_label(),
        }
    }
}

/// Per-recipient values for one generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeContext {
    #[serde(default)]
    pub stamps_earned: u32,
    pub stamps_required: u32,
    #[serde(default)]
    pub points: u64,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    pub customer_id: String,
    pub campaign_id: String,
    #[serde(default)]
    pub customer_name: Option<String>,
    /// Generated when absent.
    #[serde(default)]
    pub serial_number: Option<String>,
    /// BCP 47 tag used for date formatting, e.g. `en-US`.
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl RuntimeContext {
    pub fn from_json_file(path: &Path) -> Result<Self, TemplateLoadError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn stamps_remaining(&self) -> u32 {
        self.stamps_required.saturating_sub(self.stamps_earned)
    }

    /// Value for a `{{placeholder}}` identifier, if the context knows it.
    pub fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "stampsEarned" => Some(self.stamps_earned.min(self.stamps_required).to_string()),
            "stampsRequired" => Some(self.stamps_required.to_string()),
            "stampsRemaining" => Some(self.stamps_remaining().to_string()),
            "points" => Some(self.points.to_string()),
            "customerId" => Some(self.customer_id.clone()),
            "campaignId" => Some(self.campaign_id.clone()),
            "customerName" => self.customer_name.clone(),
            "serialNumber" => self.serial_number.clone(),
            "expiryDate" => self.expiry_date.map(|d| d.format("%Y-%m-%d").to_string()),
            other => self.extra.get(other).cloned(),
        }
    }
}
