//! PassForge CLI - Bridge interface for the editor
//!
//! Commands: layout, validate, generate, verify
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 on validation failure, 1 on any other failure

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::Level;

use passforge_core::{
    assets::AssetResolver,
    calculate_dimensions, calculate_layout,
    pipeline::validate_template,
    validation::ValidationResult,
    verify_bundle, ComplianceValidator, DirectoryStore, EngineConfig, GenerationEngine,
    GenerationRequest, PassTemplate, PipelineError, RuntimeContext, Scale,
};

#[derive(Parser)]
#[command(name = "passforge-cli")]
#[command(about = "PassForge CLI - Wallet Pass Compiler", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// More log output on stderr (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Stamp grid layout and strip geometry
    Layout {
        /// Stamps on the card (1-30)
        #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..=30))]
        stamps: u32,

        /// Only this scale factor (1, 2 or 3)
        #[arg(long)]
        scale: Option<u32>,
    },

    /// Validate a template against a runtime context
    Validate {
        /// Template JSON file
        #[arg(short, long)]
        template: PathBuf,

        /// Runtime context JSON file
        #[arg(short, long)]
        context: PathBuf,

        /// Directory that template image paths resolve against
        #[arg(long)]
        assets: Option<PathBuf>,
    },

    /// Generate, sign and store a pass bundle
    Generate {
        /// Engine configuration (TOML)
        #[arg(long)]
        config: PathBuf,

        /// Template JSON file
        #[arg(short, long)]
        template: PathBuf,

        /// Runtime context JSON file
        #[arg(short, long)]
        context: PathBuf,
    },

    /// Recompute digests and check the signature of a bundle
    Verify {
        /// Path to a .pkpass archive
        #[arg(short, long)]
        bundle: PathBuf,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn emit<T: Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => fail(format!("Failed to serialize output: {e}")),
    }
}

fn fail(message: impl std::fmt::Display) -> ExitCode {
    let output = serde_json::json!({ "success": false, "error": message.to_string() });
    println!("{output}");
    ExitCode::FAILURE
}

fn load_inputs(template: &Path, context: &Path) -> Result<(PassTemplate, RuntimeContext), String> {
    let template = PassTemplate::from_json_file(template)
        .map_err(|e| format!("Failed to load template {}: {e}", template.display()))?;
    let context = RuntimeContext::from_json_file(context)
        .map_err(|e| format!("Failed to load context {}: {e}", context.display()))?;
    Ok((template, context))
}

fn validate_files(
    template: &Path,
    context: &Path,
    assets: Option<PathBuf>,
) -> Result<ValidationResult, String> {
    let (template, context) = load_inputs(template, context)?;
    let resolver = match assets {
        Some(root) => AssetResolver::new(root),
        None => AssetResolver::inline_only(),
    };
    validate_template(&ComplianceValidator::new(), &template, &context, &resolver)
        .map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Layout { stamps, scale } => {
            let scales = match scale {
                None => Scale::ALL.to_vec(),
                Some(factor) => match Scale::from_factor(factor) {
                    Some(s) => vec![s],
                    None => return fail(format!("Unsupported scale {factor}; use 1, 2 or 3")),
                },
            };
            let layout = calculate_layout(stamps);
            let dimensions: Vec<_> = scales
                .into_iter()
                .map(|s| calculate_dimensions(&layout, s))
                .collect();
            emit(&serde_json::json!({ "layout": layout, "dimensions": dimensions }))
        }

        Commands::Validate {
            template,
            context,
            assets,
        } => {
            let result = match validate_files(&template, &context, assets) {
                Ok(result) => result,
                Err(e) => return fail(e),
            };
            let code = emit(&result);
            if result.is_valid {
                code
            } else {
                ExitCode::from(2) // Validation failure
            }
        }

        Commands::Generate {
            config,
            template,
            context,
        } => {
            let config = match EngineConfig::load(&config) {
                Ok(c) => c,
                Err(e) => return fail(e),
            };
            let (template, context) = match load_inputs(&template, &context) {
                Ok(inputs) => inputs,
                Err(e) => return fail(e),
            };
            let engine = match GenerationEngine::from_config(&config) {
                Ok(engine) => engine,
                Err(e) => return fail(e),
            };
            let store = DirectoryStore::new(config.output_dir());
            let request = GenerationRequest::new(&template, &context);

            match engine.generate_and_store(&request, &store) {
                Ok(outcome) => emit(&serde_json::json!({
                    "success": true,
                    "bundle": outcome.summary(),
                })),
                Err(PipelineError::ValidationFailed(result)) => {
                    emit(&serde_json::json!({ "success": false, "validation": result }));
                    ExitCode::from(2) // Generation refused (validation)
                }
                Err(e) => fail(e),
            }
        }

        Commands::Verify { bundle } => {
            let bytes = match std::fs::read(&bundle) {
                Ok(b) => b,
                Err(e) => return fail(format!("Failed to read {}: {e}", bundle.display())),
            };
            match verify_bundle(&bytes) {
                Ok(report) => emit(&serde_json::json!({ "valid": true, "report": report })),
                Err(e) => {
                    emit(&serde_json::json!({ "valid": false, "error": e.to_string() }));
                    ExitCode::FAILURE
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_outside_one_to_thirty_are_rejected() {
        for bad in ["0", "31"] {
            let parsed = Cli::try_parse_from(["passforge-cli", "layout", "--stamps", bad]);
            assert!(parsed.is_err(), "--stamps {bad} accepted");
        }
        for good in ["1", "30"] {
            assert!(Cli::try_parse_from(["passforge-cli", "layout", "--stamps", good]).is_ok());
        }
    }

    fn write_inputs(dir: &Path, engine_min_version: &str) -> (PathBuf, PathBuf) {
        let template = serde_json::json!({
            "id": "card",
            "name": "Card",
            "description": "Loyalty card",
            "organizationName": "Bean Co",
            "engineMinVersion": engine_min_version,
            "colors": {
                "foreground": "rgb(255, 255, 255)",
                "background": "rgb(0, 0, 0)",
                "label": "rgb(200, 200, 200)",
                "stripBackground": "#000000"
            },
            "barcode": {"format": "qr"}
        });
        let context = serde_json::json!({
            "stampsEarned": 1,
            "stampsRequired": 5,
            "customerId": "c-1",
            "campaignId": "spring"
        });
        let template_path = dir.join("template.json");
        let context_path = dir.join("context.json");
        std::fs::write(&template_path, template.to_string()).unwrap();
        std::fs::write(&context_path, context.to_string()).unwrap();
        (template_path, context_path)
    }

    #[test]
    fn validate_command_applies_engine_version_gate() {
        let dir = tempfile::tempdir().unwrap();

        let (template, context) = write_inputs(dir.path(), "1.0.0");
        assert!(validate_files(&template, &context, None).is_ok());

        let (template, context) = write_inputs(dir.path(), "42.0.0");
        let err = validate_files(&template, &context, None).unwrap_err();
        assert!(err.contains("42.0.0"), "{err}");
    }
}
