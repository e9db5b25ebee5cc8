use serde::{Deserialize, Serialize};

use crate::encoded::EncodedImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanopyMode {
    Pattern,
    Color,
}

impl CanopyMode {
    pub fn from_keyword(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pattern" => Some(Self::Pattern),
            "color" | "solid" => Some(Self::Color),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaterialKind {
    Plastic,
    Metal,
    Wood,
}

impl MaterialKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Plastic => "PLASTIC",
            Self::Metal => "METAL",
            Self::Wood => "WOOD",
        }
    }

    pub fn from_keyword(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "plastic" => Some(Self::Plastic),
            "metal" => Some(Self::Metal),
            "wood" => Some(Self::Wood),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaterialFinish {
    Matte,
    Glossy,
}

impl MaterialFinish {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Matte => "MATTE",
            Self::Glossy => "GLOSSY",
        }
    }

    pub fn from_keyword(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "matte" => Some(Self::Matte),
            "glossy" | "gloss" => Some(Self::Glossy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WoodKind {
    Oak,
    Walnut,
    Bamboo,
    Ebony,
}

impl WoodKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Oak => "OAK",
            Self::Walnut => "WALNUT",
            Self::Bamboo => "BAMBOO",
            Self::Ebony => "EBONY",
        }
    }

    pub fn from_keyword(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "oak" => Some(Self::Oak),
            "walnut" => Some(Self::Walnut),
            "bamboo" => Some(Self::Bamboo),
            "ebony" => Some(Self::Ebony),
            _ => None,
        }
    }
}

/// Export selector: file format plus the resolution class the studio offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportFormat {
    #[serde(rename = "TIFF_300")]
    Tiff300,
    #[serde(rename = "PNG_72")]
    Png72,
    #[serde(rename = "JPG_72")]
    Jpg72,
}

impl ExportFormat {
    /// File extension for exported artifacts: `tiff` collapses to `tif`,
    /// everything else is the lowercase format prefix.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Tiff300 => "tif",
            Self::Png72 => "png",
            Self::Jpg72 => "jpg",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Tiff300 => "TIFF_300",
            Self::Png72 => "PNG_72",
            Self::Jpg72 => "JPG_72",
        }
    }

    pub fn from_keyword(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tiff_300" | "tiff" | "tif" => Some(Self::Tiff300),
            "png_72" | "png" => Some(Self::Png72),
            "jpg_72" | "jpg" | "jpeg" => Some(Self::Jpg72),
            _ => None,
        }
    }
}

/// One complete styling request for the umbrella being rendered.
///
/// An immutable value: the studio builds a fresh copy per edit and the
/// engine only ever borrows it, so plan assembly stays pure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DesignConfig {
    pub canopy_mode: CanopyMode,
    pub solid_color: String,
    pub pattern_scale: f64,
    pub offset_x: f64,
    pub offset_y: f64,

    pub handle_image: Option<EncodedImage>,
    pub handle_material: MaterialKind,
    pub handle_finish: MaterialFinish,
    pub handle_wood: Option<WoodKind>,
    pub handle_color: String,

    // Tip replacement images are carried in the data model but never
    // attached to a request; only the handle has an image-swap path.
    pub tip_image: Option<EncodedImage>,
    pub tip_material: MaterialKind,
    pub tip_finish: MaterialFinish,
    pub tip_color: String,

    pub special_instructions: String,
    pub export_format: ExportFormat,
}

impl Default for DesignConfig {
    fn default() -> Self {
        Self {
            canopy_mode: CanopyMode::Pattern,
            solid_color: "#ffffff".to_string(),
            pattern_scale: 1.0,
            offset_x: 50.0,
            offset_y: 50.0,
            handle_image: None,
            handle_material: MaterialKind::Plastic,
            handle_finish: MaterialFinish::Matte,
            handle_wood: Some(WoodKind::Oak),
            handle_color: "#1a1a1a".to_string(),
            tip_image: None,
            tip_material: MaterialKind::Metal,
            tip_finish: MaterialFinish::Glossy,
            tip_color: "#333333".to_string(),
            special_instructions: String::new(),
            export_format: ExportFormat::Png72,
        }
    }
}
