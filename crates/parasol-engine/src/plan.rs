use parasol_contracts::design::{CanopyMode, DesignConfig, MaterialKind, WoodKind};
use parasol_contracts::encoded::EncodedImage;
use serde::Serialize;

use crate::push_unique_warning;

/// One ordered element of the provider request: an instruction block or an
/// attached image.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Image(EncodedImage),
}

/// How the canopy step actually resolved. `PatternMissing` is the explicit
/// branch for pattern mode with no pattern image: the request falls back to
/// the solid color, and the caller can see that it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CanopyResolution {
    Pattern,
    Solid,
    PatternMissing,
}

impl CanopyResolution {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pattern => "pattern",
            Self::Solid => "solid",
            Self::PatternMissing => "pattern_missing",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderPlan {
    pub segments: Vec<Segment>,
    pub canopy: CanopyResolution,
    pub warnings: Vec<String>,
}

impl RenderPlan {
    pub fn attached_images(&self) -> Vec<&EncodedImage> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Image(image) => Some(image),
                Segment::Text(_) => None,
            })
            .collect()
    }

    /// The instruction blocks joined in order, for providers that take one
    /// flat prompt instead of interleaved parts.
    pub fn instruction_text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Text(text) => Some(text.as_str()),
                Segment::Image(_) => None,
            })
            .collect::<Vec<&str>>()
            .join("\n\n")
    }
}

/// Deterministically assemble the generation request from one configuration
/// snapshot. Pure and total: bad combinations degrade with a warning, they
/// never fail.
pub fn build_render_plan(
    base: &EncodedImage,
    pattern: Option<&EncodedImage>,
    config: &DesignConfig,
) -> RenderPlan {
    let mut segments = Vec::new();
    let mut warnings = Vec::new();

    segments.push(Segment::Text(
        "ROLE: Senior industrial product photographer and CGI artist.".to_string(),
    ));
    segments.push(Segment::Text(
        "STRICT GEOMETRY PROTECTION: The physical structure of the umbrella must not be \
         altered. Ribbons, straps, fasteners, screws, rings, and every small hardware \
         detail stay exactly as they are."
            .to_string(),
    ));

    segments.push(Segment::Text(
        "SOURCE STRUCTURE: Use this image as an absolute geometric template. Every detail, \
         including handle straps, fabric labels, and metal joints, must be preserved \
         exactly as it appears."
            .to_string(),
    ));
    segments.push(Segment::Image(base.clone()));

    let canopy = match (config.canopy_mode, pattern) {
        (CanopyMode::Pattern, Some(pattern)) => {
            segments.push(Segment::Text(format!(
                "TEXTILE APPLICATION: Apply the following pattern. Scale: {}x. Alignment: \
                 X:{}%, Y:{}%. Wrap it realistically around each canopy panel following \
                 the seams.",
                config.pattern_scale, config.offset_x, config.offset_y
            )));
            segments.push(Segment::Image(pattern.clone()));
            CanopyResolution::Pattern
        }
        (CanopyMode::Pattern, None) => {
            push_unique_warning(
                &mut warnings,
                "canopy mode is pattern but no pattern image is loaded; using the solid \
                 color instead"
                    .to_string(),
            );
            segments.push(Segment::Text(solid_color_instruction(&config.solid_color)));
            CanopyResolution::PatternMissing
        }
        (CanopyMode::Color, _) => {
            segments.push(Segment::Text(solid_color_instruction(&config.solid_color)));
            CanopyResolution::Solid
        }
    };

    if let Some(handle_image) = config.handle_image.as_ref() {
        segments.push(Segment::Text(format!(
            "HANDLE REPLACEMENT: Swap the original handle for the one in the next image. \
             Apply color {} and a {} finish. Preserve any straps visible on the new handle.",
            config.handle_color,
            config.handle_finish.label()
        )));
        segments.push(Segment::Image(handle_image.clone()));
    } else {
        segments.push(Segment::Text(format!(
            "MATERIAL SPECIFICATIONS:\n\
             - Material: {}.\n\
             - Finish: {}.\n\
             - Primary color: {}.\n\
             - Only the color and material texture of the handle change. Its shape and \
             any ribbons or straps attached to it do not.",
            material_description(config.handle_material, config.handle_wood),
            config.handle_finish.label(),
            config.handle_color
        )));
    }

    let instructions = config.special_instructions.trim();
    if !instructions.is_empty() {
        segments.push(Segment::Text(format!(
            "CRITICAL USER INSTRUCTIONS (PRIORITY 1): {instructions}"
        )));
    }

    segments.push(Segment::Text(format!(
        "TIP SPEC: Color {}, {} material, {} finish.",
        config.tip_color,
        material_description(config.tip_material, None),
        config.tip_finish.label()
    )));

    segments.push(Segment::Text(
        "FINAL OUTPUT REQUIREMENTS:\n\
         - Background: pure white (#FFFFFF).\n\
         - The entire umbrella is visible from tip to handle.\n\
         - No cropping. No artistic distortion. High precision industrial photography \
         style."
            .to_string(),
    ));

    RenderPlan {
        segments,
        canopy,
        warnings,
    }
}

fn solid_color_instruction(color: &str) -> String {
    format!("TEXTILE COLOR: Solid color {color} with realistic fabric grain.")
}

fn material_description(material: MaterialKind, wood: Option<WoodKind>) -> String {
    match (material, wood) {
        (MaterialKind::Wood, Some(wood)) => format!("{} wood", wood.label()),
        (material, _) => material.label().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use parasol_contracts::design::{CanopyMode, DesignConfig, MaterialKind, WoodKind};
    use parasol_contracts::encoded::EncodedImage;

    use super::{build_render_plan, CanopyResolution, Segment};

    fn sample_image(tag: &str) -> EncodedImage {
        EncodedImage::from_bytes("image/jpeg", tag.as_bytes())
    }

    #[test]
    fn pattern_mode_with_image_attaches_base_and_pattern() {
        let config = DesignConfig {
            canopy_mode: CanopyMode::Pattern,
            ..DesignConfig::default()
        };
        let base = sample_image("base");
        let pattern = sample_image("pattern");
        let plan = build_render_plan(&base, Some(&pattern), &config);

        assert_eq!(plan.canopy, CanopyResolution::Pattern);
        assert_eq!(plan.attached_images(), vec![&base, &pattern]);
        assert!(plan.warnings.is_empty());
        assert!(plan.instruction_text().contains("TEXTILE APPLICATION"));
    }

    #[test]
    fn color_mode_attaches_base_only() {
        let config = DesignConfig {
            canopy_mode: CanopyMode::Color,
            solid_color: "#204060".to_string(),
            ..DesignConfig::default()
        };
        let base = sample_image("base");
        let pattern = sample_image("pattern");
        // A loaded pattern image is ignored outside pattern mode.
        let plan = build_render_plan(&base, Some(&pattern), &config);

        assert_eq!(plan.canopy, CanopyResolution::Solid);
        assert_eq!(plan.attached_images(), vec![&base]);
        assert!(plan
            .instruction_text()
            .contains("TEXTILE COLOR: Solid color #204060"));
    }

    #[test]
    fn missing_pattern_resolves_explicitly_with_warning() {
        let config = DesignConfig {
            canopy_mode: CanopyMode::Pattern,
            ..DesignConfig::default()
        };
        let base = sample_image("base");
        let plan = build_render_plan(&base, None, &config);

        assert_eq!(plan.canopy, CanopyResolution::PatternMissing);
        assert_eq!(plan.attached_images(), vec![&base]);
        assert_eq!(plan.warnings.len(), 1);
        assert!(plan.instruction_text().contains("TEXTILE COLOR"));
        assert!(!plan.instruction_text().contains("TEXTILE APPLICATION"));
    }

    #[test]
    fn special_instructions_appear_once_trimmed() {
        let mut config = DesignConfig {
            canopy_mode: CanopyMode::Color,
            special_instructions: "  keep the logo sharp  ".to_string(),
            ..DesignConfig::default()
        };
        let base = sample_image("base");
        let plan = build_render_plan(&base, None, &config);
        let text = plan.instruction_text();
        assert_eq!(text.matches("CRITICAL USER INSTRUCTIONS").count(), 1);
        assert!(text.contains("CRITICAL USER INSTRUCTIONS (PRIORITY 1): keep the logo sharp"));

        config.special_instructions = "   ".to_string();
        let plan = build_render_plan(&base, None, &config);
        assert!(!plan
            .instruction_text()
            .contains("CRITICAL USER INSTRUCTIONS"));
    }

    #[test]
    fn instructions_sit_between_handle_and_tip_rules() {
        let config = DesignConfig {
            canopy_mode: CanopyMode::Color,
            special_instructions: "matte everywhere".to_string(),
            ..DesignConfig::default()
        };
        let plan = build_render_plan(&sample_image("base"), None, &config);
        let text = plan.instruction_text();
        let handle_at = text.find("MATERIAL SPECIFICATIONS").expect("handle block");
        let critical_at = text.find("CRITICAL USER INSTRUCTIONS").expect("critical block");
        let tip_at = text.find("TIP SPEC").expect("tip block");
        assert!(handle_at < critical_at && critical_at < tip_at);
    }

    #[test]
    fn handle_replacement_swaps_text_and_attaches_image() {
        let handle = sample_image("handle");
        let config = DesignConfig {
            canopy_mode: CanopyMode::Color,
            handle_image: Some(handle.clone()),
            ..DesignConfig::default()
        };
        let base = sample_image("base");
        let plan = build_render_plan(&base, None, &config);

        assert_eq!(plan.attached_images(), vec![&base, &handle]);
        let text = plan.instruction_text();
        assert!(text.contains("HANDLE REPLACEMENT"));
        assert!(!text.contains("MATERIAL SPECIFICATIONS"));
    }

    #[test]
    fn wood_handles_name_the_wood_kind() {
        let config = DesignConfig {
            canopy_mode: CanopyMode::Color,
            handle_material: MaterialKind::Wood,
            handle_wood: Some(WoodKind::Ebony),
            ..DesignConfig::default()
        };
        let plan = build_render_plan(&sample_image("base"), None, &config);
        assert!(plan.instruction_text().contains("EBONY wood"));
    }

    #[test]
    fn tip_image_is_never_attached() {
        let config = DesignConfig {
            canopy_mode: CanopyMode::Color,
            tip_image: Some(sample_image("tip")),
            ..DesignConfig::default()
        };
        let base = sample_image("base");
        let plan = build_render_plan(&base, None, &config);
        assert_eq!(plan.attached_images(), vec![&base]);
    }

    #[test]
    fn first_attachment_is_the_geometric_template() {
        let config = DesignConfig::default();
        let base = sample_image("base");
        let pattern = sample_image("pattern");
        let plan = build_render_plan(&base, Some(&pattern), &config);
        let first_image = plan
            .segments
            .iter()
            .find_map(|segment| match segment {
                Segment::Image(image) => Some(image),
                Segment::Text(_) => None,
            })
            .expect("at least one attachment");
        assert_eq!(first_image, &base);
        assert!(plan
            .instruction_text()
            .starts_with("ROLE: Senior industrial product photographer"));
    }
}
