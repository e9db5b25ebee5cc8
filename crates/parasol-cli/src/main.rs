use std::env;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use parasol_contracts::design::{DesignConfig, ExportFormat};
use parasol_contracts::encoded::EncodedImage;
use parasol_contracts::events::EventWriter;
use parasol_contracts::outcome::RenderFailure;
use parasol_contracts::receipts::{build_receipt, write_receipt, RenderReceipt};
use parasol_contracts::studio::{parse_command, StudioCommand, STUDIO_HELP_LINES};
use parasol_engine::normalize::{normalize_image_file, NormalizeOptions};
use parasol_engine::plan::{build_render_plan, RenderPlan, Segment};
use parasol_engine::{
    build_provider, CredentialReselector, ProviderKind, RenderEngine, RenderOutcome,
};

#[derive(Debug, Parser)]
#[command(name = "parasol", version, about = "Umbrella render studio")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// One-shot render of a base photo with the given styling.
    Render(RenderArgs),
    /// Print the assembled instruction plan without calling a provider.
    Plan(PlanArgs),
    /// Interactive styling session.
    Studio(StudioArgs),
}

#[derive(Debug, Parser)]
struct RenderArgs {
    #[arg(long)]
    base: PathBuf,
    #[arg(long)]
    pattern: Option<PathBuf>,
    #[arg(long)]
    handle_image: Option<PathBuf>,
    /// Design configuration JSON; defaults apply for missing fields.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "gemini")]
    provider: String,
    #[arg(long)]
    model: Option<String>,
    /// API credential; falls back to the provider's environment variable.
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long, default_value = "renders")]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct PlanArgs {
    #[arg(long)]
    base: PathBuf,
    #[arg(long)]
    pattern: Option<PathBuf>,
    #[arg(long)]
    handle_image: Option<PathBuf>,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct StudioArgs {
    #[arg(long, default_value = "gemini")]
    provider: String,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long, default_value = "renders")]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("parasol error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Render(args) => run_render(args),
        Command::Plan(args) => {
            run_plan(args)?;
            Ok(0)
        }
        Command::Studio(args) => {
            run_studio(args)?;
            Ok(0)
        }
    }
}

fn run_render(args: RenderArgs) -> Result<i32> {
    let options = NormalizeOptions::default();
    let base = normalize_image_file(&args.base, &options)?;
    let pattern = args
        .pattern
        .as_deref()
        .map(|path| normalize_image_file(path, &options))
        .transpose()?;
    let handle_image = args
        .handle_image
        .as_deref()
        .map(|path| normalize_image_file(path, &options))
        .transpose()?;

    let loaded = load_design_config(args.config.as_deref())?;
    let config = DesignConfig {
        handle_image: handle_image.or(loaded.handle_image.clone()),
        ..loaded
    };

    let mut engine = build_engine(
        &args.provider,
        args.api_key,
        args.model,
        &args.out,
        args.events,
    )?;

    match engine.render(&base, pattern.as_ref(), &config) {
        Ok(outcome) => {
            finish_render(&mut engine, &outcome, &config, &args.out)?;
            Ok(0)
        }
        Err(failure) => {
            report_failure(&failure);
            Ok(1)
        }
    }
}

fn run_plan(args: PlanArgs) -> Result<()> {
    let options = NormalizeOptions::default();
    let base = normalize_image_file(&args.base, &options)?;
    let pattern = args
        .pattern
        .as_deref()
        .map(|path| normalize_image_file(path, &options))
        .transpose()?;
    let handle_image = args
        .handle_image
        .as_deref()
        .map(|path| normalize_image_file(path, &options))
        .transpose()?;

    let loaded = load_design_config(args.config.as_deref())?;
    let config = DesignConfig {
        handle_image: handle_image.or(loaded.handle_image.clone()),
        ..loaded
    };

    let plan = build_render_plan(&base, pattern.as_ref(), &config);
    print_plan(&plan);
    Ok(())
}

fn run_studio(args: StudioArgs) -> Result<()> {
    let engine = build_engine(
        &args.provider,
        args.api_key,
        args.model,
        &args.out,
        args.events,
    )?;

    let mut session = StudioSession {
        engine,
        config: DesignConfig::default(),
        base: None,
        pattern: None,
        last_result: None,
        out_dir: args.out,
        options: NormalizeOptions::default(),
    };

    println!(
        "Parasol studio started ({} / {}). Type /help for commands.",
        session.engine.provider_name(),
        session.engine.provider_model()
    );

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let command = parse_command(line.trim_end_matches(['\n', '\r']));
        if command == StudioCommand::Quit {
            break;
        }
        session.handle(&command)?;
    }

    Ok(())
}

struct StudioSession {
    engine: RenderEngine,
    config: DesignConfig,
    base: Option<EncodedImage>,
    pattern: Option<EncodedImage>,
    last_result: Option<EncodedImage>,
    out_dir: PathBuf,
    options: NormalizeOptions,
}

impl StudioSession {
    fn handle(&mut self, command: &StudioCommand) -> Result<()> {
        if let Some((next, feedback)) = apply_config_command(&self.config, command) {
            self.config = next;
            println!("{feedback}");
            return Ok(());
        }

        match command {
            StudioCommand::Noop => {}
            StudioCommand::Help => {
                for help_line in STUDIO_HELP_LINES {
                    println!("{help_line}");
                }
            }
            StudioCommand::Status => {
                println!(
                    "state: {} | provider: {} ({}) | quota flag: {} | base: {} | pattern: {}",
                    self.engine.state(),
                    self.engine.provider_name(),
                    self.engine.provider_model(),
                    self.engine.quota_flagged(),
                    self.base.is_some(),
                    self.pattern.is_some(),
                );
            }
            StudioCommand::SetBase(path) => {
                match normalize_image_file(Path::new(path), &self.options) {
                    Ok(image) => {
                        self.base = Some(image);
                        self.last_result = None;
                        println!("Base image loaded from {path}");
                    }
                    // A bad upload aborts only this load; the session keeps going.
                    Err(err) => println!("Base image rejected: {err:#}"),
                }
            }
            StudioCommand::SetPattern(path) => match path {
                Some(path) => match normalize_image_file(Path::new(path), &self.options) {
                    Ok(image) => {
                        self.pattern = Some(image);
                        println!("Pattern image loaded from {path}");
                    }
                    Err(err) => println!("Pattern image rejected: {err:#}"),
                },
                None => {
                    self.pattern = None;
                    println!("Pattern image cleared");
                }
            },
            StudioCommand::SetHandleImage(path) => match path {
                Some(path) => match normalize_image_file(Path::new(path), &self.options) {
                    Ok(image) => {
                        self.config = DesignConfig {
                            handle_image: Some(image),
                            ..self.config.clone()
                        };
                        println!("Replacement handle loaded from {path}");
                    }
                    Err(err) => println!("Handle image rejected: {err:#}"),
                },
                None => {
                    self.config = DesignConfig {
                        handle_image: None,
                        ..self.config.clone()
                    };
                    println!("Replacement handle cleared");
                }
            },
            StudioCommand::ShowPlan => {
                let Some(base) = self.base.as_ref() else {
                    println!("Load a base image first (/base <path>)");
                    return Ok(());
                };
                let plan = build_render_plan(base, self.pattern.as_ref(), &self.config);
                print_plan(&plan);
            }
            StudioCommand::Render => {
                let Some(base) = self.base.clone() else {
                    println!("Load a base image first (/base <path>)");
                    return Ok(());
                };
                let pattern = self.pattern.clone();
                match self.engine.render(&base, pattern.as_ref(), &self.config) {
                    Ok(outcome) => {
                        self.last_result = outcome.image.clone();
                        finish_render(&mut self.engine, &outcome, &self.config, &self.out_dir)?;
                    }
                    Err(failure) => report_failure(&failure),
                }
            }
            StudioCommand::Export => {
                let Some(image) = self.last_result.as_ref() else {
                    println!("Nothing to export yet; run /render first");
                    return Ok(());
                };
                let path = write_artifact(&self.out_dir, image, self.config.export_format)?;
                println!("Exported {}", path.display());
            }
            StudioCommand::ReselectKey => match prompt_for_credential()? {
                Some(credential) => {
                    self.engine.apply_credential(credential);
                    println!("Credential updated; state reset");
                }
                None => println!("Keeping the current credential"),
            },
            StudioCommand::Unknown { command } => {
                println!("Unknown command /{command}; try /help");
            }
            StudioCommand::Invalid { command, reason } => {
                println!("/{command}: {reason}");
            }
            StudioCommand::Quit => {}
            // Config setters are handled by apply_config_command above.
            _ => {}
        }
        Ok(())
    }
}

/// Config edits produce a new value; the previous one is never touched.
/// Returns the updated config and a line of user feedback, or `None` for
/// commands that are not plain config setters.
fn apply_config_command(
    config: &DesignConfig,
    command: &StudioCommand,
) -> Option<(DesignConfig, String)> {
    let updated = match command {
        StudioCommand::SetCanopyMode(mode) => (
            DesignConfig {
                canopy_mode: *mode,
                ..config.clone()
            },
            format!("Canopy mode set to {:?}", mode),
        ),
        StudioCommand::SetSolidColor(value) => (
            DesignConfig {
                solid_color: value.clone(),
                ..config.clone()
            },
            format!("Solid color set to {value}"),
        ),
        StudioCommand::SetPatternScale(scale) => (
            DesignConfig {
                pattern_scale: *scale,
                ..config.clone()
            },
            format!("Pattern scale set to {scale}x"),
        ),
        StudioCommand::SetOffsets { x, y } => (
            DesignConfig {
                offset_x: *x,
                offset_y: *y,
                ..config.clone()
            },
            format!("Pattern alignment set to X:{x}% Y:{y}%"),
        ),
        StudioCommand::SetHandleMaterial { material, wood } => (
            DesignConfig {
                handle_material: *material,
                handle_wood: wood.or(config.handle_wood),
                ..config.clone()
            },
            format!("Handle material set to {}", material.label()),
        ),
        StudioCommand::SetHandleFinish(finish) => (
            DesignConfig {
                handle_finish: *finish,
                ..config.clone()
            },
            format!("Handle finish set to {}", finish.label()),
        ),
        StudioCommand::SetHandleColor(value) => (
            DesignConfig {
                handle_color: value.clone(),
                ..config.clone()
            },
            format!("Handle color set to {value}"),
        ),
        StudioCommand::SetTipMaterial(material) => (
            DesignConfig {
                tip_material: *material,
                ..config.clone()
            },
            format!("Tip material set to {}", material.label()),
        ),
        StudioCommand::SetTipFinish(finish) => (
            DesignConfig {
                tip_finish: *finish,
                ..config.clone()
            },
            format!("Tip finish set to {}", finish.label()),
        ),
        StudioCommand::SetTipColor(value) => (
            DesignConfig {
                tip_color: value.clone(),
                ..config.clone()
            },
            format!("Tip color set to {value}"),
        ),
        StudioCommand::SetInstructions(text) => {
            let feedback = if text.trim().is_empty() {
                "Special instructions cleared".to_string()
            } else {
                format!("Special instructions set: {}", text.trim())
            };
            (
                DesignConfig {
                    special_instructions: text.clone(),
                    ..config.clone()
                },
                feedback,
            )
        }
        StudioCommand::SetExportFormat(format) => (
            DesignConfig {
                export_format: *format,
                ..config.clone()
            },
            format!("Export format set to {}", format.label()),
        ),
        _ => return None,
    };
    Some(updated)
}

fn build_engine(
    provider: &str,
    api_key: Option<String>,
    model: Option<String>,
    out_dir: &Path,
    events: Option<PathBuf>,
) -> Result<RenderEngine> {
    let Some(kind) = ProviderKind::from_keyword(provider) else {
        bail!("unknown provider '{provider}' (expected gemini, openai, or dryrun)");
    };
    // Resolved exactly once, up front; providers never consult the
    // environment themselves.
    let credential = resolve_credential(kind, api_key);
    let provider = build_provider(kind, credential, model)?;
    let events_path = events.unwrap_or_else(|| out_dir.join("events.jsonl"));
    let engine = RenderEngine::new(provider, EventWriter::for_session(events_path))
        .with_reselector(Box::new(InteractiveReselector));
    Ok(engine)
}

fn resolve_credential(kind: ProviderKind, flag: Option<String>) -> Option<String> {
    if let Some(flag) = flag {
        let trimmed = flag.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }
    kind.credential_env_var()
        .and_then(|var| env::var(var).ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn load_design_config(path: Option<&Path>) -> Result<DesignConfig> {
    let Some(path) = path else {
        return Ok(DesignConfig::default());
    };
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid config JSON in {}", path.display()))
}

fn finish_render(
    engine: &mut RenderEngine,
    outcome: &RenderOutcome,
    config: &DesignConfig,
    out_dir: &Path,
) -> Result<()> {
    for warning in &outcome.warnings {
        println!("warning: {warning}");
    }

    let stamp = Utc::now().timestamp_millis();
    let artifact_path = match outcome.image.as_ref() {
        Some(image) => {
            let path = write_artifact_stamped(out_dir, image, config.export_format, stamp)?;
            println!("Saved {}", path.display());
            Some(path)
        }
        None => {
            println!("The provider returned no image; nothing to display");
            None
        }
    };

    let receipt_path = out_dir.join(format!("render-receipt-{stamp}.json"));
    let payload = build_receipt(
        &RenderReceipt {
            provider: engine.provider_name(),
            model: engine.provider_model(),
            canopy_resolution: outcome.canopy.label(),
            warnings: &outcome.warnings,
            image_produced: outcome.image.is_some(),
            image_path: artifact_path.as_deref(),
        },
        config,
    );
    write_receipt(&receipt_path, &payload)?;

    let mut event = parasol_contracts::events::EventPayload::new();
    event.insert(
        "receipt_path".to_string(),
        serde_json::Value::String(receipt_path.to_string_lossy().to_string()),
    );
    if let Some(path) = artifact_path.as_ref() {
        event.insert(
            "image_path".to_string(),
            serde_json::Value::String(path.to_string_lossy().to_string()),
        );
    }
    engine.events().emit("artifact_written", event)?;
    Ok(())
}

fn report_failure(failure: &RenderFailure) {
    eprintln!("render failed ({}): {}", failure.kind(), failure.message());
}

fn write_artifact(out_dir: &Path, image: &EncodedImage, format: ExportFormat) -> Result<PathBuf> {
    write_artifact_stamped(out_dir, image, format, Utc::now().timestamp_millis())
}

fn write_artifact_stamped(
    out_dir: &Path,
    image: &EncodedImage,
    format: ExportFormat,
    stamp_millis: i64,
) -> Result<PathBuf> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed creating {}", out_dir.display()))?;
    let path = out_dir.join(export_file_name(format, stamp_millis));
    fs::write(&path, image.decode()?)
        .with_context(|| format!("failed writing {}", path.display()))?;
    Ok(path)
}

fn export_file_name(format: ExportFormat, stamp_millis: i64) -> String {
    format!("umbrella-design-{stamp_millis}.{}", format.extension())
}

fn print_plan(plan: &RenderPlan) {
    println!("canopy resolution: {}", plan.canopy.label());
    for warning in &plan.warnings {
        println!("warning: {warning}");
    }
    for (idx, segment) in plan.segments.iter().enumerate() {
        match segment {
            Segment::Text(text) => println!("{:>2}. {text}", idx + 1),
            Segment::Image(image) => println!(
                "{:>2}. [image attachment: {}, {} base64 chars]",
                idx + 1,
                image.mime_type(),
                image.payload().len()
            ),
        }
    }
}

struct InteractiveReselector;

impl CredentialReselector for InteractiveReselector {
    fn reselect(&mut self) -> Option<String> {
        println!("The provider rejected the request; a different API key may help.");
        prompt_for_credential().ok().flatten()
    }
}

fn prompt_for_credential() -> Result<Option<String>> {
    print!("Enter a replacement API key (blank keeps the current one): ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let trimmed = line.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}
