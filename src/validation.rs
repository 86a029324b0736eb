//! Validation System - Compliance Rules
//!
//! Every rule runs and every violation is collected. Errors block generation;
//! warnings never do.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::assets::{AssetResolver, AssetRole};
use crate::barcode::CharsetCheck;
use crate::color::Rgb;
use crate::document::{substitute, DEFAULT_BARCODE_TEMPLATE};
use crate::layout::{MAX_STAMPS, MIN_STAMPS};
use crate::templates::{FieldSection, PassTemplate, RuntimeContext, StripMode};

/// Stand-in with the shape of a generated serial, used when the context has none yet.
const SAMPLE_SERIAL: &str = "f47ac10b-58cc-4372-a567-0e02b2c3d479";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationViolation {
    pub rule: String,
    pub severity: ViolationSeverity,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub remediation: Vec<String>,
}

impl ValidationViolation {
    pub fn error(rule: &str, message: impl Into<String>) -> Self {
        Self::new(rule, ViolationSeverity::Error, message.into())
    }

    pub fn warning(rule: &str, message: impl Into<String>) -> Self {
        Self::new(rule, ViolationSeverity::Warning, message.into())
    }

    fn new(rule: &str, severity: ViolationSeverity, message: String) -> Self {
        Self {
            rule: rule.to_string(),
            severity,
            message,
            expected: None,
            actual: None,
            remediation: vec![],
        }
    }

    pub fn expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn actual(mut self, actual: impl Into<String>) -> Self {
        self.actual = Some(actual.into());
        self
    }

    pub fn remediation(mut self, step: impl Into<String>) -> Self {
        self.remediation.push(step.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationViolation>,
    pub warnings: Vec<ValidationViolation>,
    pub template_id: String,
    pub template_version: String,
}

impl ValidationResult {
    fn from_violations(template: &PassTemplate, violations: Vec<ValidationViolation>) -> Self {
        let (errors, warnings): (Vec<_>, Vec<_>) = violations
            .into_iter()
            .partition(|v| v.severity == ViolationSeverity::Error);
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            template_id: template.id.clone(),
            template_version: template.template_version.clone(),
        }
    }

    /// `rule: message` for every error, joined for a one-line summary.
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|v| format!("{}: {}", v.rule, v.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// What a rule sees besides the template.
pub struct ValidationInput<'a> {
    pub context: &'a RuntimeContext,
    pub assets: &'a AssetResolver,
}

/// Validation rule trait - produces violations
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(
        &self,
        input: &ValidationInput<'_>,
        template: &PassTemplate,
    ) -> Vec<ValidationViolation>;
}

// --- Concrete Rules ---

pub struct FieldCountRule;

impl ValidationRule for FieldCountRule {
    fn name(&self) -> &'static str {
        "field_count"
    }

    fn validate(
        &self,
        _: &ValidationInput<'_>,
        template: &PassTemplate,
    ) -> Vec<ValidationViolation> {
        FieldSection::ALL
            .into_iter()
            .filter_map(|section| {
                let max = section.max_fields()?;
                let count = template.fields.section(section).len();
                (count > max).then(|| {
                    ValidationViolation::error(
                        self.name(),
                        format!("{} section has too many fields", section.name()),
                    )
                    .expected(format!("at most {max}"))
                    .actual(count.to_string())
                    .remediation(format!("Move fields out of the {} section", section.name()))
                })
            })
            .collect()
    }
}

pub struct FieldKeyRule;

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl ValidationRule for FieldKeyRule {
    fn name(&self) -> &'static str {
        "field_key"
    }

    fn validate(
        &self,
        _: &ValidationInput<'_>,
        template: &PassTemplate,
    ) -> Vec<ValidationViolation> {
        let mut violations = vec![];
        let mut seen = BTreeSet::new();

        let expiry_key = template.expiry.enabled.then_some(template.expiry.key.as_str());
        let keys = template
            .fields
            .iter()
            .map(|(section, f)| (section.name(), f.key.as_str()))
            .chain(expiry_key.map(|k| ("expiry", k)));

        for (section, key) in keys {
            if !is_valid_key(key) {
                violations.push(
                    ValidationViolation::error(
                        self.name(),
                        format!("invalid field key '{key}' in {section} section"),
                    )
                    .expected("letter followed by letters, digits or underscores")
                    .actual(key)
                    .remediation("Rename the field key"),
                );
            } else if !seen.insert(key) {
                violations.push(
                    ValidationViolation::error(
                        self.name(),
                        format!("duplicate field key '{key}' in {section} section"),
                    )
                    .remediation("Field keys must be unique across all sections"),
                );
            }
        }
        violations
    }
}

pub struct ColorFormatRule;

impl ValidationRule for ColorFormatRule {
    fn name(&self) -> &'static str {
        "color_format"
    }

    fn validate(
        &self,
        _: &ValidationInput<'_>,
        template: &PassTemplate,
    ) -> Vec<ValidationViolation> {
        let c = &template.colors;
        let colors = [
            ("foreground", Some(&c.foreground)),
            ("background", Some(&c.background)),
            ("label", Some(&c.label)),
            ("stripBackground", Some(&c.strip_background)),
            ("accent", c.accent.as_ref()),
        ];

        colors
            .into_iter()
            .filter_map(|(name, value)| {
                let value = value?;
                let err = Rgb::parse(value).err()?;
                Some(
                    ValidationViolation::error(self.name(), format!("{name} color: {err}"))
                        .expected("rgb(r, g, b) with channels 0-255, or #RRGGBB")
                        .actual(value.as_str())
                        .remediation("Use an explicit rgb() value"),
                )
            })
            .collect()
    }
}

pub struct BarcodeCharsetRule;

impl ValidationRule for BarcodeCharsetRule {
    fn name(&self) -> &'static str {
        "barcode_charset"
    }

    fn validate(
        &self,
        input: &ValidationInput<'_>,
        template: &PassTemplate,
    ) -> Vec<ValidationViolation> {
        let format = template.barcode.format;
        let message = barcode_message(template, input.context);
        match format.check_message(&message) {
            CharsetCheck::Ok => vec![],
            CharsetCheck::Invalid(reason) => vec![ValidationViolation::error(
                self.name(),
                format!("{} message rejected: {reason}", format.name()),
            )
            .actual(message)
            .remediation("Change the barcode format or the message template")],
            CharsetCheck::Oversized { bytes, limit } => vec![ValidationViolation::warning(
                self.name(),
                format!("{} message is large and may scan poorly", format.name()),
            )
            .expected(format!("at most {limit} bytes"))
            .actual(format!("{bytes} bytes"))],
        }
    }
}

fn barcode_message(template: &PassTemplate, context: &RuntimeContext) -> String {
    let raw = template.barcode.message_template.trim();
    let raw = if raw.is_empty() { DEFAULT_BARCODE_TEMPLATE } else { raw };
    raw.split(':')
        .map(|segment| substitute(segment, context).text)
        .collect::<Vec<_>>()
        .join(":")
}

pub struct RequiredAssetsRule;

impl ValidationRule for RequiredAssetsRule {
    fn name(&self) -> &'static str {
        "required_assets"
    }

    fn validate(
        &self,
        input: &ValidationInput<'_>,
        template: &PassTemplate,
    ) -> Vec<ValidationViolation> {
        let mut violations = vec![];

        for role in [AssetRole::Icon, AssetRole::Logo] {
            let problem = match role.source(&template.images) {
                None => Some("not provided".to_string()),
                Some(source) => input.assets.decode(source).err().map(|e| e.to_string()),
            };
            if let Some(problem) = problem {
                violations.push(
                    ValidationViolation::warning(
                        self.name(),
                        format!("{} {problem}; a default image will be substituted", role.name()),
                    )
                    .remediation(format!("Provide a decodable {} image", role.name())),
                );
            }
        }

        if template.strip.mode == StripMode::Static && template.images.strip.is_none() {
            violations.push(ValidationViolation::warning(
                self.name(),
                "static strip mode without a strip image; the strip background color is used",
            ));
        }
        violations
    }
}

pub struct StampProgramRule;

impl ValidationRule for StampProgramRule {
    fn name(&self) -> &'static str {
        "stamp_program"
    }

    fn validate(
        &self,
        input: &ValidationInput<'_>,
        template: &PassTemplate,
    ) -> Vec<ValidationViolation> {
        let mut violations = vec![];
        let required = input.context.stamps_required;
        let earned = input.context.stamps_earned;

        if !(MIN_STAMPS..=MAX_STAMPS).contains(&required) {
            violations.push(
                ValidationViolation::error(self.name(), "stampsRequired out of range")
                    .expected(format!("{MIN_STAMPS}-{MAX_STAMPS}"))
                    .actual(required.to_string()),
            );
        }

        let mut seen = BTreeSet::new();
        for &m in &template.stamp_program.milestones {
            if !seen.insert(m) {
                violations.push(ValidationViolation::error(
                    self.name(),
                    format!("milestone {m} listed more than once"),
                ));
            } else if m < 2 || m > required {
                violations.push(
                    ValidationViolation::error(
                        self.name(),
                        format!("milestone {m} outside the stamp card"),
                    )
                    .expected(format!("2-{required}"))
                    .actual(m.to_string()),
                );
            }
        }

        if earned > required {
            violations.push(
                ValidationViolation::warning(
                    self.name(),
                    "stampsEarned exceeds stampsRequired; it will be clamped",
                )
                .expected(format!("at most {required}"))
                .actual(earned.to_string()),
            );
        }
        violations
    }
}

pub struct PlaceholderRule;

impl ValidationRule for PlaceholderRule {
    fn name(&self) -> &'static str {
        "placeholders"
    }

    fn validate(
        &self,
        input: &ValidationInput<'_>,
        template: &PassTemplate,
    ) -> Vec<ValidationViolation> {
        let mut texts: Vec<&str> = template
            .fields
            .iter()
            .flat_map(|(_, f)| [f.label.as_str(), f.value.as_str()])
            .collect();
        texts.push(&template.description);
        texts.push(&template.barcode.message_template);
        texts.extend(template.barcode.alt_text.as_deref());
        texts.extend(template.logo_text.as_deref());

        let unresolved: BTreeSet<String> = texts
            .into_iter()
            .flat_map(|t| substitute(t, input.context).unresolved)
            .collect();

        unresolved
            .into_iter()
            .map(|token| {
                ValidationViolation::warning(
                    self.name(),
                    format!("placeholder '{{{{{token}}}}}' has no value and is left verbatim"),
                )
                .remediation(format!("Supply '{token}' in the runtime context"))
            })
            .collect()
    }
}

pub struct PassIdentityRule;

impl ValidationRule for PassIdentityRule {
    fn name(&self) -> &'static str {
        "pass_identity"
    }

    fn validate(
        &self,
        _: &ValidationInput<'_>,
        template: &PassTemplate,
    ) -> Vec<ValidationViolation> {
        [
            ("description", &template.description),
            ("organizationName", &template.organization_name),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| ValidationViolation::error(self.name(), format!("{name} is empty")))
        .collect()
    }
}

/// Runs every compliance rule and collects the results.
pub struct ComplianceValidator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl ComplianceValidator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(FieldCountRule),
                Box::new(FieldKeyRule),
                Box::new(ColorFormatRule),
                Box::new(BarcodeCharsetRule),
                Box::new(RequiredAssetsRule),
                Box::new(StampProgramRule),
                Box::new(PlaceholderRule),
                Box::new(PassIdentityRule),
            ],
        }
    }

    pub fn validate(
        &self,
        template: &PassTemplate,
        context: &RuntimeContext,
        assets: &AssetResolver,
    ) -> ValidationResult {
        let context = if context.serial_number.is_some() {
            context.clone()
        } else {
            RuntimeContext {
                serial_number: Some(SAMPLE_SERIAL.to_string()),
                ..context.clone()
            }
        };
        let input = ValidationInput {
            context: &context,
            assets,
        };

        let violations: Vec<_> = self
            .rules
            .iter()
            .flat_map(|rule| rule.validate(&input, template))
            .collect();

        let result = ValidationResult::from_violations(template, violations);
        tracing::debug!(
            template = %template.id,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "validation complete"
        );
        result
    }
}

impl Default for ComplianceValidator {
    fn default() -> Self {
        Self::new()
    }
}
