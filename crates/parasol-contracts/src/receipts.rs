use std::path::Path;

use serde_json::{Map, Value};

use crate::design::DesignConfig;

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

/// Summary of one render call, written as JSON beside the exported artifact.
#[derive(Debug, Clone)]
pub struct RenderReceipt<'a> {
    pub provider: &'a str,
    pub model: &'a str,
    pub canopy_resolution: &'a str,
    pub warnings: &'a [String],
    pub image_produced: bool,
    pub image_path: Option<&'a Path>,
}

pub fn build_receipt(receipt: &RenderReceipt<'_>, config: &DesignConfig) -> Value {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );
    root.insert(
        "config".to_string(),
        sanitize_payload(&serde_json::to_value(config).unwrap_or(Value::Null)),
    );
    root.insert(
        "provider".to_string(),
        Value::String(receipt.provider.to_string()),
    );
    root.insert("model".to_string(), Value::String(receipt.model.to_string()));
    root.insert(
        "canopy_resolution".to_string(),
        Value::String(receipt.canopy_resolution.to_string()),
    );
    root.insert(
        "warnings".to_string(),
        Value::Array(
            receipt
                .warnings
                .iter()
                .cloned()
                .map(Value::String)
                .collect(),
        ),
    );
    root.insert(
        "image_produced".to_string(),
        Value::Bool(receipt.image_produced),
    );
    root.insert(
        "image_path".to_string(),
        receipt
            .image_path
            .map(|path| Value::String(path.to_string_lossy().to_string()))
            .unwrap_or(Value::Null),
    );
    Value::Object(root)
}

pub fn write_receipt(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)?;
    Ok(())
}

/// Image payloads never land in receipts; the keys that carry them are
/// replaced with a marker.
fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(
                    lowered.as_str(),
                    "b64_json" | "data" | "image" | "handleimage" | "tipimage"
                ) && !row.is_null()
                {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use crate::design::DesignConfig;
    use crate::encoded::EncodedImage;

    use super::{build_receipt, write_receipt, RenderReceipt, RECEIPT_SCHEMA_VERSION};

    #[test]
    fn receipt_omits_image_payloads() -> anyhow::Result<()> {
        let config = DesignConfig {
            handle_image: Some(EncodedImage::from_bytes("image/png", b"handle")),
            ..DesignConfig::default()
        };
        let warnings = vec!["note".to_string()];
        let payload = build_receipt(
            &RenderReceipt {
                provider: "dryrun",
                model: "dryrun-render-1",
                canopy_resolution: "solid",
                warnings: &warnings,
                image_produced: true,
                image_path: None,
            },
            &config,
        );

        assert_eq!(payload["schema_version"], json!(RECEIPT_SCHEMA_VERSION));
        assert_eq!(payload["config"]["handleImage"], json!("<omitted>"));
        assert_eq!(payload["config"]["tipImage"], Value::Null);
        assert_eq!(payload["provider"], json!("dryrun"));
        assert_eq!(payload["warnings"], json!(["note"]));
        assert_eq!(payload["image_path"], Value::Null);
        Ok(())
    }

    #[test]
    fn receipt_writes_pretty_json() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let receipt_path = temp.path().join("render-receipt.json");
        let image_path = temp.path().join("umbrella-design-1.png");
        let config = DesignConfig::default();
        let payload = build_receipt(
            &RenderReceipt {
                provider: "gemini",
                model: "gemini-2.5-flash-image",
                canopy_resolution: "pattern",
                warnings: &[],
                image_produced: true,
                image_path: Some(&image_path),
            },
            &config,
        );
        write_receipt(&receipt_path, &payload)?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&receipt_path)?)?;
        assert_eq!(parsed["provider"], json!("gemini"));
        assert_eq!(
            parsed["image_path"],
            json!(image_path.to_string_lossy())
        );
        Ok(())
    }
}
