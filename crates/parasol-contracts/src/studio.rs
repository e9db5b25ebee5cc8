use crate::design::{CanopyMode, ExportFormat, MaterialFinish, MaterialKind, WoodKind};

/// One parsed line of studio input. Slash commands drive the session;
/// bare text becomes the special-instructions block of the next render.
#[derive(Debug, Clone, PartialEq)]
pub enum StudioCommand {
    Noop,
    Help,
    Quit,
    Status,
    Render,
    Export,
    ReselectKey,
    ShowPlan,
    SetBase(String),
    SetPattern(Option<String>),
    SetHandleImage(Option<String>),
    SetCanopyMode(CanopyMode),
    SetSolidColor(String),
    SetPatternScale(f64),
    SetOffsets { x: f64, y: f64 },
    SetHandleMaterial {
        material: MaterialKind,
        wood: Option<WoodKind>,
    },
    SetHandleFinish(MaterialFinish),
    SetHandleColor(String),
    SetTipMaterial(MaterialKind),
    SetTipFinish(MaterialFinish),
    SetTipColor(String),
    SetInstructions(String),
    SetExportFormat(ExportFormat),
    Unknown { command: String },
    Invalid { command: String, reason: String },
}

pub const STUDIO_HELP_LINES: &[&str] = &[
    "/base <path>            load the base umbrella photo",
    "/pattern [path]         load (or clear) the canopy pattern image",
    "/handle_image [path]    load (or clear) a replacement handle photo",
    "/canopy pattern|color   choose the canopy fill mode",
    "/color <value>          solid canopy color",
    "/scale <factor>         pattern scale factor",
    "/offset <x> <y>         pattern alignment offsets (percent)",
    "/handle <material> [wood kind]",
    "/handle_finish matte|glossy",
    "/handle_color <value>",
    "/tip <material>",
    "/tip_finish matte|glossy",
    "/tip_color <value>",
    "/notes [text]           special instructions (blank clears)",
    "/format tiff_300|png_72|jpg_72",
    "/plan                   preview the assembled instructions",
    "/render                 generate a variant",
    "/export                 save the last result again",
    "/key                    switch the API credential",
    "/status  /help  /quit",
];

fn invalid(command: &str, reason: &str) -> StudioCommand {
    StudioCommand::Invalid {
        command: command.to_string(),
        reason: reason.to_string(),
    }
}

fn optional_path(arg: &str) -> Option<String> {
    let trimmed = arg.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn parse_command(text: &str) -> StudioCommand {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return StudioCommand::Noop;
    }

    let Some(slash_tail) = raw_trimmed.strip_prefix('/') else {
        return StudioCommand::SetInstructions(raw_trimmed.to_string());
    };

    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    if command_len == 0 {
        return StudioCommand::SetInstructions(raw_trimmed.to_string());
    }
    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();

    match command.as_str() {
        "help" => StudioCommand::Help,
        "quit" | "exit" => StudioCommand::Quit,
        "status" => StudioCommand::Status,
        "render" => StudioCommand::Render,
        "export" => StudioCommand::Export,
        "key" => StudioCommand::ReselectKey,
        "plan" => StudioCommand::ShowPlan,
        "base" => match optional_path(arg) {
            Some(path) => StudioCommand::SetBase(path),
            None => invalid(&command, "a path is required"),
        },
        "pattern" => StudioCommand::SetPattern(optional_path(arg)),
        "handle_image" => StudioCommand::SetHandleImage(optional_path(arg)),
        "canopy" => match CanopyMode::from_keyword(arg) {
            Some(mode) => StudioCommand::SetCanopyMode(mode),
            None => invalid(&command, "expected 'pattern' or 'color'"),
        },
        "color" => match optional_path(arg) {
            Some(value) => StudioCommand::SetSolidColor(value),
            None => invalid(&command, "a color value is required"),
        },
        "scale" => match arg.parse::<f64>() {
            Ok(scale) if scale > 0.0 => StudioCommand::SetPatternScale(scale),
            Ok(_) => invalid(&command, "scale must be positive"),
            Err(_) => invalid(&command, "expected a number"),
        },
        "offset" => {
            let parts: Vec<&str> = arg.split_whitespace().collect();
            let parsed = match parts.as_slice() {
                [x, y] => x.parse::<f64>().ok().zip(y.parse::<f64>().ok()),
                _ => None,
            };
            match parsed {
                Some((x, y)) => StudioCommand::SetOffsets { x, y },
                None => invalid(&command, "expected two numbers"),
            }
        }
        "handle" => {
            let mut words = arg.split_whitespace();
            let Some(material) = words.next().and_then(MaterialKind::from_keyword) else {
                return invalid(&command, "expected plastic, metal, or wood");
            };
            match (material, words.next()) {
                (MaterialKind::Wood, Some(word)) => match WoodKind::from_keyword(word) {
                    Some(wood) => StudioCommand::SetHandleMaterial {
                        material,
                        wood: Some(wood),
                    },
                    None => invalid(&command, "unknown wood kind"),
                },
                (_, Some(_)) => invalid(&command, "only wood takes a wood kind"),
                (_, None) => StudioCommand::SetHandleMaterial {
                    material,
                    wood: None,
                },
            }
        }
        "handle_finish" => match MaterialFinish::from_keyword(arg) {
            Some(finish) => StudioCommand::SetHandleFinish(finish),
            None => invalid(&command, "expected 'matte' or 'glossy'"),
        },
        "handle_color" => match optional_path(arg) {
            Some(value) => StudioCommand::SetHandleColor(value),
            None => invalid(&command, "a color value is required"),
        },
        "tip" => match MaterialKind::from_keyword(arg) {
            Some(material) => StudioCommand::SetTipMaterial(material),
            None => invalid(&command, "expected plastic, metal, or wood"),
        },
        "tip_finish" => match MaterialFinish::from_keyword(arg) {
            Some(finish) => StudioCommand::SetTipFinish(finish),
            None => invalid(&command, "expected 'matte' or 'glossy'"),
        },
        "tip_color" => match optional_path(arg) {
            Some(value) => StudioCommand::SetTipColor(value),
            None => invalid(&command, "a color value is required"),
        },
        "notes" => StudioCommand::SetInstructions(arg.to_string()),
        "format" => match ExportFormat::from_keyword(arg) {
            Some(format) => StudioCommand::SetExportFormat(format),
            None => invalid(&command, "expected tiff_300, png_72, or jpg_72"),
        },
        _ => StudioCommand::Unknown { command },
    }
}
