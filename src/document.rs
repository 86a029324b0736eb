//! Pass Document Builder - `pass.json`
//!
//! Merges a template with a runtime context. Input is assumed to have passed
//! the compliance validator; this module only substitutes placeholders and
//! applies the conditional inclusion rules.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::color::{ColorParseError, Rgb};
use crate::templates::{FieldDef, FieldSection, PassTemplate, RuntimeContext, TextAlignment};

pub const PASS_FORMAT_VERSION: u32 = 1;
pub const DEFAULT_BARCODE_TEMPLATE: &str = "{{campaignId}}:{{customerId}}:{{serialNumber}}";

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("{field}: {source}")]
    Color {
        field: &'static str,
        #[source]
        source: ColorParseError,
    },

    #[error("failed to serialize pass document: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result of replacing `{{identifier}}` tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub text: String,
    /// Identifiers with no context value; their tokens were left verbatim.
    pub unresolved: Vec<String>,
}

pub fn substitute(input: &str, ctx: &RuntimeContext) -> Substitution {
    let mut text = String::with_capacity(input.len());
    let mut unresolved = Vec::new();
    let mut rest = input;

    while let Some(open) = rest.find("{{") {
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            break;
        };
        text.push_str(&rest[..open]);
        let token = &after[..close];
        match ctx.lookup(token.trim()) {
            Some(value) => text.push_str(&value),
            None => {
                text.push_str(&rest[open..open + 2 + close + 2]);
                unresolved.push(token.trim().to_string());
            }
        }
        rest = &after[close + 2..];
    }
    text.push_str(rest);

    Substitution { text, unresolved }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassDocument {
    pub format_version: u32,
    pub pass_type_identifier: String,
    pub serial_number: String,
    pub team_identifier: String,
    pub organization_name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_text: Option<String>,
    pub foreground_color: String,
    pub background_color: String,
    pub label_color: String,
    pub store_card: PassStructure,
    pub barcodes: Vec<PassBarcode>,
    /// Single-barcode key for older wallet clients.
    pub barcode: PassBarcode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<String>,
}

impl PassDocument {
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, DocumentError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn fields(&self, section: FieldSection) -> &[PassField] {
        let s = &self.store_card;
        match section {
            FieldSection::Header => &s.header_fields,
            FieldSection::Primary => &s.primary_fields,
            FieldSection::Secondary => &s.secondary_fields,
            FieldSection::Auxiliary => &s.auxiliary_fields,
            FieldSection::Back => &s.back_fields,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassStructure {
    pub header_fields: Vec<PassField>,
    pub primary_fields: Vec<PassField>,
    pub secondary_fields: Vec<PassField>,
    pub auxiliary_fields: Vec<PassField>,
    pub back_fields: Vec<PassField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassField {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_alignment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassBarcode {
    pub message: String,
    pub format: String,
    pub message_encoding: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
}

fn alignment_identifier(alignment: TextAlignment) -> &'static str {
    match alignment {
        TextAlignment::Left => "PKTextAlignmentLeft",
        TextAlignment::Center => "PKTextAlignmentCenter",
        TextAlignment::Right => "PKTextAlignmentRight",
        TextAlignment::Natural => "PKTextAlignmentNatural",
    }
}

/// Identity values supplied by configuration and the pipeline, not the template.
#[derive(Debug, Clone)]
pub struct BuildInputs {
    pub pass_type_identifier: String,
    pub team_identifier: String,
    pub serial_number: String,
    /// The bundled logo spans the header (see `ResolvedAssets::has_wide_logo`).
    pub wide_logo: bool,
}

#[derive(Debug, Clone)]
pub struct BuiltDocument {
    pub document: PassDocument,
    /// Sorted, deduplicated placeholder identifiers left unresolved.
    pub unresolved: Vec<String>,
}

pub struct PassDocumentBuilder;

impl PassDocumentBuilder {
    pub fn build(
        template: &PassTemplate,
        context: &RuntimeContext,
        inputs: &BuildInputs,
    ) -> Result<BuiltDocument, DocumentError> {
        let mut ctx = context.clone();
        ctx.serial_number = Some(inputs.serial_number.clone());
        let mut unresolved = BTreeSet::new();
        let mut sub = |s: &str| -> String {
            let out = substitute(s, &ctx);
            unresolved.extend(out.unresolved);
            out.text
        };

        let mut build_section = |fields: &[FieldDef]| -> Vec<PassField> {
            fields
                .iter()
                .map(|f| PassField {
                    key: f.key.clone(),
                    label: (!f.label.is_empty()).then(|| sub(&f.label)),
                    value: sub(&f.value),
                    text_alignment: f.text_alignment.map(|a| alignment_identifier(a).to_string()),
                    change_message: f.change_message.clone(),
                })
                .collect()
        };

        let fields = &template.fields;
        let mut store_card = PassStructure {
            header_fields: build_section(&fields.header),
            primary_fields: build_section(&fields.primary),
            secondary_fields: build_section(&fields.secondary),
            auxiliary_fields: build_section(&fields.auxiliary),
            back_fields: build_section(&fields.back),
        };

        let mut expiration_date = None;
        if let (true, Some(date)) = (template.expiry.enabled, context.expiry_date) {
            let field = PassField {
                key: template.expiry.key.clone(),
                label: Some(template.expiry.label.clone()),
                value: format_short_date(date, context.locale.as_deref()),
                text_alignment: None,
                change_message: None,
            };
            let aux_limit = FieldSection::Auxiliary.max_fields().unwrap_or(usize::MAX);
            if store_card.auxiliary_fields.len() < aux_limit {
                store_card.auxiliary_fields.push(field);
            } else {
                store_card.back_fields.push(field);
            }
            expiration_date = Some(date.format("%Y-%m-%dT23:59:59Z").to_string());
        }

        let message_template = if template.barcode.message_template.trim().is_empty() {
            DEFAULT_BARCODE_TEMPLATE
        } else {
            template.barcode.message_template.as_str()
        };
        let message = message_template
            .split(':')
            .map(|segment| sub(segment))
            .collect::<Vec<_>>()
            .join(":");
        let barcode = PassBarcode {
            message,
            format: template.barcode.format.platform_identifier().to_string(),
            message_encoding: template.barcode.encoding.clone(),
            alt_text: template.barcode.alt_text.as_deref().map(&mut sub),
        };

        // A wide logo spans the header; text next to it would be cropped.
        let logo_text = if inputs.wide_logo {
            None
        } else {
            template.logo_text.as_deref().map(&mut sub)
        };

        let description = sub(&template.description);
        let colors = &template.colors;
        let document = PassDocument {
            format_version: PASS_FORMAT_VERSION,
            pass_type_identifier: inputs.pass_type_identifier.clone(),
            serial_number: inputs.serial_number.clone(),
            team_identifier: inputs.team_identifier.clone(),
            organization_name: template.organization_name.clone(),
            description,
            logo_text,
            foreground_color: css_color("foreground", &colors.foreground)?,
            background_color: css_color("background", &colors.background)?,
            label_color: css_color("label", &colors.label)?,
            store_card,
            barcodes: vec![barcode.clone()],
            barcode,
            expiration_date,
        };

        Ok(BuiltDocument {
            document,
            unresolved: unresolved.into_iter().collect(),
        })
    }
}

fn css_color(field: &'static str, raw: &str) -> Result<String, DocumentError> {
    Rgb::parse(raw)
        .map(Rgb::to_css)
        .map_err(|source| DocumentError::Color { field, source })
}

/// Short date in the recipient's locale; US style when none is given.
pub fn format_short_date(date: NaiveDate, locale: Option<&str>) -> String {
    let locale = locale.unwrap_or("en-US");
    let mut parts = locale.split(['-', '_']);
    let language = parts.next().unwrap_or("en").to_ascii_lowercase();
    let region = parts.next().map(str::to_ascii_uppercase);

    let pattern = match (language.as_str(), region.as_deref()) {
        ("en", Some("US")) | ("en", None) => "%-m/%-d/%y",
        ("en", Some("CA")) | ("sv", _) | ("lt", _) => "%Y-%m-%d",
        ("en", _) | ("fr", _) | ("es", _) | ("it", _) | ("pt", _) | ("el", _) => "%d/%m/%Y",
        ("de", _) | ("ru", _) | ("pl", _) | ("cs", _) | ("fi", _) | ("nb", _) | ("tr", _) => {
            "%d.%m.%Y"
        }
        ("nl", _) => "%d-%m-%Y",
        ("ja", _) | ("zh", _) => "%Y/%m/%d",
        ("ko", _) => "%Y. %-m. %-d.",
        _ => "%Y-%m-%d",
    };
    date.format(pattern).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barcode::BarcodeFormat;
    use crate::templates::{BarcodeSpec, ColorSet, ExpiryConfig, FieldSections};

    fn ctx() -> RuntimeContext {
        RuntimeContext {
            stamps_earned: 7,
            stamps_required: 10,
            points: 120,
            expiry_date: NaiveDate::from_ymd_opt(2026, 12, 31),
            customer_id: "c-42".into(),
            campaign_id: "spring".into(),
            customer_name: Some("Ada".into()),
            ..Default::default()
        }
    }

    fn field(key: &str, value: &str) -> FieldDef {
        FieldDef {
            key: key.into(),
            label: key.to_uppercase(),
            value: value.into(),
            text_alignment: None,
            change_message: None,
        }
    }

    fn template() -> PassTemplate {
        PassTemplate {
            id: "coffee".into(),
            name: "Coffee".into(),
            description: "{{customerName}}'s coffee card".into(),
            organization_name: "Bean Co".into(),
            template_version: "1.0.0".into(),
            engine_min_version: "1.0.0".into(),
            logo_text: Some("Bean Co".into()),
            colors: ColorSet {
                foreground: "rgb(255, 255, 255)".into(),
                background: "#000000".into(),
                label: "rgb(200,200,200)".into(),
                strip_background: "#000000".into(),
                accent: None,
            },
            fields: FieldSections {
                header: vec![field("points", "{{points}}")],
                primary: vec![field("stamps", "{{stampsEarned}}/{{stampsRequired}}")],
                auxiliary: vec![field("tier", "{{tier}}")],
                ..Default::default()
            },
            images: Default::default(),
            barcode: BarcodeSpec {
                message_template: String::new(),
                format: BarcodeFormat::Qr,
                alt_text: Some("{{customerId}}".into()),
                encoding: "iso-8859-1".into(),
            },
            stamp_program: Default::default(),
            strip: Default::default(),
            expiry: ExpiryConfig {
                enabled: true,
                ..Default::default()
            },
        }
    }

    fn inputs(wide_logo: bool) -> BuildInputs {
        BuildInputs {
            pass_type_identifier: "pass.com.example".into(),
            team_identifier: "TEAM123".into(),
            serial_number: "SN-1".into(),
            wide_logo,
        }
    }

    #[test]
    fn substitution_leaves_unknown_tokens() {
        let out = substitute("{{points}} pts, {{ mystery }} and {{", &ctx());
        assert_eq!(out.text, "120 pts, {{ mystery }} and {{");
        assert_eq!(out.unresolved, ["mystery"]);
    }

    #[test]
    fn builds_fields_and_colors() {
        let built = PassDocumentBuilder::build(&template(), &ctx(), &inputs(false)).unwrap();
        let doc = &built.document;
        assert_eq!(doc.format_version, 1);
        assert_eq!(doc.serial_number, "SN-1");
        assert_eq!(doc.description, "Ada's coffee card");
        assert_eq!(doc.background_color, "rgb(0, 0, 0)");
        assert_eq!(doc.label_color, "rgb(200, 200, 200)");
        assert_eq!(doc.fields(FieldSection::Header)[0].value, "120");
        assert_eq!(doc.fields(FieldSection::Primary)[0].value, "7/10");
        assert_eq!(built.unresolved, ["tier"]);
        assert_eq!(doc.logo_text.as_deref(), Some("Bean Co"));
    }

    #[test]
    fn default_barcode_message_is_colon_delimited() {
        let built = PassDocumentBuilder::build(&template(), &ctx(), &inputs(false)).unwrap();
        let doc = &built.document;
        assert_eq!(doc.barcode.message, "spring:c-42:SN-1");
        assert_eq!(doc.barcode.format, "PKBarcodeFormatQR");
        assert_eq!(doc.barcode.alt_text.as_deref(), Some("c-42"));
        assert_eq!(doc.barcodes, vec![doc.barcode.clone()]);
    }

    #[test]
    fn wide_logo_suppresses_logo_text() {
        let built = PassDocumentBuilder::build(&template(), &ctx(), &inputs(true)).unwrap();
        assert_eq!(built.document.logo_text, None);
        let json = String::from_utf8(built.document.to_json_bytes().unwrap()).unwrap();
        assert!(!json.contains("logoText"));
    }

    #[test]
    fn expiry_needs_flag_and_date() {
        let built = PassDocumentBuilder::build(&template(), &ctx(), &inputs(false)).unwrap();
        let aux = built.document.fields(FieldSection::Auxiliary);
        assert_eq!(aux.last().unwrap().value, "12/31/26");
        assert_eq!(
            built.document.expiration_date.as_deref(),
            Some("2026-12-31T23:59:59Z")
        );

        let mut no_flag = template();
        no_flag.expiry.enabled = false;
        let built = PassDocumentBuilder::build(&no_flag, &ctx(), &inputs(false)).unwrap();
        assert_eq!(built.document.fields(FieldSection::Auxiliary).len(), 1);
        assert_eq!(built.document.expiration_date, None);

        let mut no_date = ctx();
        no_date.expiry_date = None;
        let built = PassDocumentBuilder::build(&template(), &no_date, &inputs(false)).unwrap();
        assert_eq!(built.document.expiration_date, None);
    }

    #[test]
    fn expiry_spills_to_back_when_auxiliary_is_full() {
        let mut t = template();
        t.fields.auxiliary = (0..4).map(|i| field(&format!("a{i}"), "x")).collect();
        let built = PassDocumentBuilder::build(&t, &ctx(), &inputs(false)).unwrap();
        assert_eq!(built.document.fields(FieldSection::Auxiliary).len(), 4);
        assert_eq!(built.document.fields(FieldSection::Back)[0].key, "expires");
    }

    #[test]
    fn short_dates_follow_locale() {
        let d = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        assert_eq!(format_short_date(d, None), "3/7/26");
        assert_eq!(format_short_date(d, Some("en-GB")), "07/03/2026");
        assert_eq!(format_short_date(d, Some("de-DE")), "07.03.2026");
        assert_eq!(format_short_date(d, Some("ja")), "2026/03/07");
        assert_eq!(format_short_date(d, Some("xx")), "2026-03-07");
    }
}
