pub mod classify;
pub mod normalize;
pub mod plan;

use std::io::Cursor;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use parasol_contracts::design::DesignConfig;
use parasol_contracts::encoded::EncodedImage;
use parasol_contracts::events::{EventPayload, EventWriter};
use parasol_contracts::outcome::{ProcessingState, RenderFailure};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::classify::{classify_failure, TransportFailure};
use crate::plan::{build_render_plan, CanopyResolution, RenderPlan, Segment};

pub const GEMINI_DEFAULT_MODEL: &str = "gemini-2.5-flash-image";
pub const GEMINI_DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-image-1";
pub const OPENAI_DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

const DRYRUN_MODEL: &str = "dryrun-render-1";
const DRYRUN_SIDE: u32 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Gemini,
    OpenAi,
    Dryrun,
}

impl ProviderKind {
    pub fn from_keyword(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Some(Self::Gemini),
            "openai" => Some(Self::OpenAi),
            "dryrun" => Some(Self::Dryrun),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
            Self::Dryrun => "dryrun",
        }
    }

    /// Environment variable the CLI consults once at startup when no
    /// credential flag is given. Never read mid-call.
    pub fn credential_env_var(&self) -> Option<&'static str> {
        match self {
            Self::Gemini => Some("GEMINI_API_KEY"),
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Dryrun => None,
        }
    }
}

/// A generation backend. One synchronous upstream call per render: no
/// client-side retries, no queueing, no timeout. `Ok(None)` means the
/// provider answered without producing an image, which is not an error.
pub trait RenderProvider {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn render(&self, plan: &RenderPlan) -> Result<Option<EncodedImage>, TransportFailure>;
    /// Apply a reselected credential to subsequent calls.
    fn set_credential(&mut self, credential: String);
}

pub fn build_provider(
    kind: ProviderKind,
    credential: Option<String>,
    model: Option<String>,
) -> Result<Box<dyn RenderProvider>> {
    match kind {
        ProviderKind::Dryrun => Ok(Box::new(DryrunProvider::new())),
        ProviderKind::Gemini => {
            let Some(credential) = credential else {
                bail!("no API credential resolved for provider '{}'", kind.label());
            };
            let mut provider = GeminiProvider::new(credential)?;
            if let Some(model) = model {
                provider = provider.with_model(model);
            }
            Ok(Box::new(provider))
        }
        ProviderKind::OpenAi => {
            let Some(credential) = credential else {
                bail!("no API credential resolved for provider '{}'", kind.label());
            };
            let mut provider = OpenAiProvider::new(credential)?;
            if let Some(model) = model {
                provider = provider.with_model(model);
            }
            Ok(Box::new(provider))
        }
    }
}

pub struct GeminiProvider {
    api_key: String,
    api_base: String,
    model: String,
    http: HttpClient,
}

impl GeminiProvider {
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_api_base(api_key, GEMINI_DEFAULT_API_BASE)
    }

    pub fn with_api_base(api_key: String, api_base: &str) -> Result<Self> {
        Ok(Self {
            api_key,
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            model: GEMINI_DEFAULT_MODEL.to_string(),
            http: untimed_http_client()?,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn parts(plan: &RenderPlan) -> Vec<Value> {
        plan.segments
            .iter()
            .map(|segment| match segment {
                Segment::Text(text) => json!({ "text": text }),
                Segment::Image(image) => json!({
                    "inlineData": {
                        "mimeType": image.mime_type(),
                        "data": image.payload(),
                    }
                }),
            })
            .collect()
    }

    /// First inline-image part across the returned candidates, if any.
    fn first_image(response_payload: &Value) -> Option<EncodedImage> {
        let candidates = response_payload.get("candidates")?.as_array()?;
        for candidate in candidates {
            let Some(parts) = candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
            else {
                continue;
            };
            for part in parts {
                let Some(inline) = part
                    .get("inlineData")
                    .or_else(|| part.get("inline_data"))
                    .and_then(Value::as_object)
                else {
                    continue;
                };
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if data.is_empty() {
                    continue;
                }
                let mime = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .unwrap_or("image/png");
                return Some(EncodedImage::from_base64(mime, data));
            }
        }
        None
    }
}

impl RenderProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn render(&self, plan: &RenderPlan) -> Result<Option<EncodedImage>, TransportFailure> {
        let endpoint = self.endpoint();
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": Self::parts(plan),
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
            },
        });

        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .map_err(|err| {
                TransportFailure::from_message(format!("Gemini request failed: {err}"))
            })?;
        let response_payload = read_json_response("Gemini", response)?;
        Ok(Self::first_image(&response_payload))
    }

    fn set_credential(&mut self, credential: String) {
        self.api_key = credential;
    }
}

pub struct OpenAiProvider {
    api_key: String,
    api_base: String,
    model: String,
    http: HttpClient,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_api_base(api_key, OPENAI_DEFAULT_API_BASE)
    }

    pub fn with_api_base(api_key: String, api_base: &str) -> Result<Self> {
        Ok(Self {
            api_key,
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            model: OPENAI_DEFAULT_MODEL.to_string(),
            http: untimed_http_client()?,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn form(&self, plan: &RenderPlan) -> Result<MultipartForm, TransportFailure> {
        let mut form = MultipartForm::new()
            .text("model", self.model.clone())
            .text("prompt", plan.instruction_text())
            .text("n", "1")
            .text("size", "1024x1024");

        for (idx, image) in plan.attached_images().into_iter().enumerate() {
            let bytes = image.decode().map_err(|err| {
                TransportFailure::from_message(format!("OpenAI attachment decode failed: {err:#}"))
            })?;
            let file_name = format!("attachment-{idx}.{}", extension_for_mime(image.mime_type()));
            let part = MultipartPart::bytes(bytes)
                .file_name(file_name)
                .mime_str(image.mime_type())
                .map_err(|err| {
                    TransportFailure::from_message(format!(
                        "OpenAI attachment mime rejected: {err}"
                    ))
                })?;
            form = form.part("image[]", part);
        }
        Ok(form)
    }

    fn first_image(&self, response_payload: &Value) -> Result<Option<EncodedImage>, TransportFailure> {
        let rows = response_payload
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for row in rows {
            let Some(obj) = row.as_object() else {
                continue;
            };
            if let Some(b64) = obj.get("b64_json").and_then(Value::as_str) {
                if !b64.is_empty() {
                    return Ok(Some(EncodedImage::from_base64("image/png", b64)));
                }
            }
            if let Some(url) = obj.get("url").and_then(Value::as_str) {
                return self.download_image(url).map(Some);
            }
        }
        Ok(None)
    }

    fn download_image(&self, url: &str) -> Result<EncodedImage, TransportFailure> {
        let response = self.http.get(url).send().map_err(|err| {
            TransportFailure::from_message(format!("failed downloading OpenAI image: {err}"))
        })?;
        let status = response.status();
        if !status.is_success() {
            let code = status.as_u16();
            let body = response.text().unwrap_or_default();
            return Err(TransportFailure::with_status(
                code,
                format!(
                    "OpenAI image download failed ({code}): {}",
                    truncate_text(&body, 512)
                ),
            ));
        }
        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("image/png")
            .to_string();
        let bytes = response.bytes().map_err(|err| {
            TransportFailure::from_message(format!("failed reading OpenAI image bytes: {err}"))
        })?;
        Ok(EncodedImage::from_bytes(&mime, &bytes))
    }
}

impl RenderProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn render(&self, plan: &RenderPlan) -> Result<Option<EncodedImage>, TransportFailure> {
        let endpoint = format!("{}/images/edits", self.api_base);
        let form = self.form(plan)?;
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .map_err(|err| {
                TransportFailure::from_message(format!("OpenAI request failed: {err}"))
            })?;
        let response_payload = read_json_response("OpenAI", response)?;
        self.first_image(&response_payload)
    }

    fn set_credential(&mut self, credential: String) {
        self.api_key = credential;
    }
}

/// Offline provider for demos and tests: a solid-color artifact whose color
/// is a stable digest of the instruction text.
pub struct DryrunProvider {
    model: String,
}

impl DryrunProvider {
    pub fn new() -> Self {
        Self {
            model: DRYRUN_MODEL.to_string(),
        }
    }
}

impl Default for DryrunProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn render(&self, plan: &RenderPlan) -> Result<Option<EncodedImage>, TransportFailure> {
        let (r, g, b) = color_from_instructions(&plan.instruction_text());
        let mut canvas = RgbImage::new(DRYRUN_SIDE, DRYRUN_SIDE);
        for pixel in canvas.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(canvas)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|err| {
                TransportFailure::from_message(format!("dryrun encode failed: {err}"))
            })?;
        Ok(Some(EncodedImage::from_bytes("image/png", &bytes)))
    }

    fn set_credential(&mut self, _credential: String) {}
}

/// Host-provided interactive flow for switching the API credential. Invoked
/// after quota or misconfiguration failures; returning `None` keeps the
/// current credential.
pub trait CredentialReselector {
    fn reselect(&mut self) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct RenderOutcome {
    /// `None` is the explicit no-image-produced absence, a soft success.
    pub image: Option<EncodedImage>,
    pub canopy: CanopyResolution,
    pub warnings: Vec<String>,
}

/// Drives one render at a time: normalized inputs in, classified outcome
/// out, state transitions and events along the way.
pub struct RenderEngine {
    provider: Box<dyn RenderProvider>,
    events: EventWriter,
    reselector: Option<Box<dyn CredentialReselector>>,
    state: ProcessingState,
    quota_flagged: bool,
}

impl RenderEngine {
    pub fn new(provider: Box<dyn RenderProvider>, events: EventWriter) -> Self {
        Self {
            provider,
            events,
            reselector: None,
            state: ProcessingState::Idle,
            quota_flagged: false,
        }
    }

    pub fn with_reselector(mut self, reselector: Box<dyn CredentialReselector>) -> Self {
        self.reselector = Some(reselector);
        self
    }

    pub fn state(&self) -> ProcessingState {
        self.state
    }

    pub fn quota_flagged(&self) -> bool {
        self.quota_flagged
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn provider_model(&self) -> &str {
        self.provider.model()
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    /// Manual credential switch (the `/key` flow): apply the new key and
    /// clear the error state so the next render starts clean.
    pub fn apply_credential(&mut self, credential: String) {
        self.provider.set_credential(credential);
        let mut payload = EventPayload::new();
        payload.insert(
            "provider".to_string(),
            Value::String(self.provider.name().to_string()),
        );
        self.emit("credential_updated", payload);
        self.reset();
    }

    pub fn reset(&mut self) {
        self.quota_flagged = false;
        self.transition(ProcessingState::Idle);
    }

    pub fn render(
        &mut self,
        base: &EncodedImage,
        pattern: Option<&EncodedImage>,
        config: &DesignConfig,
    ) -> Result<RenderOutcome, RenderFailure> {
        if self.state == ProcessingState::Generating {
            return Err(RenderFailure::Generic {
                message: "a render request is already in flight".to_string(),
            });
        }

        self.quota_flagged = false;
        self.transition(ProcessingState::Generating);

        let plan = build_render_plan(base, pattern, config);
        let mut payload = EventPayload::new();
        payload.insert(
            "canopy".to_string(),
            Value::String(plan.canopy.label().to_string()),
        );
        payload.insert(
            "attachments".to_string(),
            Value::Number(plan.attached_images().len().into()),
        );
        payload.insert(
            "warnings".to_string(),
            Value::Array(plan.warnings.iter().cloned().map(Value::String).collect()),
        );
        payload.insert(
            "provider".to_string(),
            Value::String(self.provider.name().to_string()),
        );
        payload.insert(
            "model".to_string(),
            Value::String(self.provider.model().to_string()),
        );
        self.emit("plan_built", payload);

        match self.provider.render(&plan) {
            Ok(image) => {
                self.transition(ProcessingState::Success);
                let mut payload = EventPayload::new();
                payload.insert("image_produced".to_string(), Value::Bool(image.is_some()));
                self.emit("render_finished", payload);
                Ok(RenderOutcome {
                    image,
                    canopy: plan.canopy,
                    warnings: plan.warnings,
                })
            }
            Err(transport) => {
                let failure = classify_failure(&transport);
                self.quota_flagged = matches!(failure, RenderFailure::QuotaExceeded { .. });
                self.transition(ProcessingState::Error);
                let mut payload = EventPayload::new();
                payload.insert(
                    "kind".to_string(),
                    Value::String(failure.kind().to_string()),
                );
                payload.insert(
                    "message".to_string(),
                    Value::String(failure.message().to_string()),
                );
                payload.insert(
                    "status".to_string(),
                    transport
                        .status
                        .map(|code| Value::Number(code.into()))
                        .unwrap_or(Value::Null),
                );
                self.emit("render_failed", payload);

                if failure.needs_credential_reselection() {
                    self.run_reselection();
                }
                Err(failure)
            }
        }
    }

    fn run_reselection(&mut self) {
        let Some(reselector) = self.reselector.as_mut() else {
            return;
        };
        let selected = reselector.reselect();
        let mut payload = EventPayload::new();
        payload.insert(
            "provider".to_string(),
            Value::String(self.provider.name().to_string()),
        );
        payload.insert(
            "credential_changed".to_string(),
            Value::Bool(selected.is_some()),
        );
        self.emit("credential_reselect_prompted", payload);
        if let Some(credential) = selected {
            self.provider.set_credential(credential);
        }
    }

    fn transition(&mut self, next: ProcessingState) {
        if let Err(err) = self.events.emit_state_change(self.state, next) {
            eprintln!("event write failed: {err:#}");
        }
        self.state = next;
    }

    // Telemetry writes never abort a render; failures go to stderr.
    fn emit(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.events.emit(event_type, payload) {
            eprintln!("event write failed: {err:#}");
        }
    }
}

fn untimed_http_client() -> Result<HttpClient> {
    // The generation call waits on the provider; no client-side deadline.
    HttpClient::builder()
        .timeout(None::<Duration>)
        .build()
        .context("failed building HTTP client")
}

fn read_json_response(provider: &str, response: HttpResponse) -> Result<Value, TransportFailure> {
    let status = response.status();
    let code = status.as_u16();
    let body = response.text().map_err(|err| {
        TransportFailure::from_message(format!("{provider} response body read failed: {err}"))
    })?;
    if !status.is_success() {
        return Err(TransportFailure::with_status(
            code,
            format!(
                "{provider} request failed ({code}): {}",
                truncate_text(&body, 512)
            ),
        ));
    }
    serde_json::from_str(&body).map_err(|_| {
        TransportFailure::from_message(format!("{provider} returned an invalid JSON payload"))
    })
}

fn extension_for_mime(mime: &str) -> &'static str {
    let lowered = mime.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    "png"
}

fn color_from_instructions(text: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn push_unique_warning(warnings: &mut Vec<String>, message: String) {
    if message.trim().is_empty() {
        return;
    }
    if warnings.iter().any(|existing| existing == &message) {
        return;
    }
    warnings.push(message);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use parasol_contracts::design::{CanopyMode, DesignConfig};
    use parasol_contracts::encoded::EncodedImage;
    use parasol_contracts::events::EventWriter;
    use parasol_contracts::outcome::{ProcessingState, RenderFailure};
    use serde_json::Value;

    use crate::classify::TransportFailure;
    use crate::plan::{build_render_plan, RenderPlan, Segment};

    use super::{
        build_provider, color_from_instructions, CredentialReselector, DryrunProvider,
        GeminiProvider, ProviderKind, RenderEngine, RenderProvider,
    };

    struct FailingProvider {
        failure: TransportFailure,
        credentials_seen: Arc<Mutex<Vec<String>>>,
    }

    impl RenderProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        fn model(&self) -> &str {
            "failing-model"
        }

        fn render(&self, _plan: &RenderPlan) -> Result<Option<EncodedImage>, TransportFailure> {
            Err(self.failure.clone())
        }

        fn set_credential(&mut self, credential: String) {
            self.credentials_seen
                .lock()
                .expect("credential lock")
                .push(credential);
        }
    }

    struct AbsentProvider;

    impl RenderProvider for AbsentProvider {
        fn name(&self) -> &str {
            "absent"
        }

        fn model(&self) -> &str {
            "absent-model"
        }

        fn render(&self, _plan: &RenderPlan) -> Result<Option<EncodedImage>, TransportFailure> {
            Ok(None)
        }

        fn set_credential(&mut self, _credential: String) {}
    }

    struct CountingReselector {
        calls: Arc<AtomicUsize>,
        reply: Option<String>,
    }

    impl CredentialReselector for CountingReselector {
        fn reselect(&mut self) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }
    }

    fn base_image() -> EncodedImage {
        EncodedImage::from_bytes("image/jpeg", b"base")
    }

    fn event_types(path: &std::path::Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    #[test]
    fn dryrun_render_walks_idle_generating_success() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let mut engine = RenderEngine::new(
            Box::new(DryrunProvider::new()),
            EventWriter::new(&events_path, "run-test"),
        );
        let config = DesignConfig {
            canopy_mode: CanopyMode::Color,
            ..DesignConfig::default()
        };

        assert_eq!(engine.state(), ProcessingState::Idle);
        let outcome = engine
            .render(&base_image(), None, &config)
            .expect("dryrun render succeeds");

        assert_eq!(engine.state(), ProcessingState::Success);
        assert!(!engine.quota_flagged());
        let image = outcome.image.expect("dryrun always produces an image");
        assert_eq!(image.mime_type(), "image/png");

        let raw = std::fs::read_to_string(&events_path)?;
        let transitions: Vec<(String, String)> = raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter(|row| row["type"] == "state_changed")
            .map(|row| {
                (
                    row["from"].as_str().unwrap_or_default().to_string(),
                    row["to"].as_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        assert_eq!(
            transitions,
            vec![
                ("IDLE".to_string(), "GENERATING".to_string()),
                ("GENERATING".to_string(), "SUCCESS".to_string()),
            ]
        );
        let types = event_types(&events_path);
        assert!(types.contains(&"plan_built".to_string()));
        assert!(types.contains(&"render_finished".to_string()));
        Ok(())
    }

    #[test]
    fn quota_failure_sets_flag_and_reselects_exactly_once() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let calls = Arc::new(AtomicUsize::new(0));
        let credentials_seen = Arc::new(Mutex::new(Vec::new()));
        let mut engine = RenderEngine::new(
            Box::new(FailingProvider {
                failure: TransportFailure::from_message("Error 429: RESOURCE_EXHAUSTED"),
                credentials_seen: Arc::clone(&credentials_seen),
            }),
            EventWriter::new(&events_path, "run-test"),
        )
        .with_reselector(Box::new(CountingReselector {
            calls: Arc::clone(&calls),
            reply: Some("fresh-key".to_string()),
        }));

        let err = engine
            .render(&base_image(), None, &DesignConfig::default())
            .expect_err("quota failure expected");

        assert!(matches!(err, RenderFailure::QuotaExceeded { .. }));
        assert_eq!(engine.state(), ProcessingState::Error);
        assert!(engine.quota_flagged());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let seen = credentials_seen.lock().expect("credential lock");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], "fresh-key");
        let types = event_types(&events_path);
        assert!(types.contains(&"render_failed".to_string()));
        assert!(types.contains(&"credential_reselect_prompted".to_string()));
        Ok(())
    }

    #[test]
    fn generic_failure_does_not_prompt_reselection() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let calls = Arc::new(AtomicUsize::new(0));
        let mut engine = RenderEngine::new(
            Box::new(FailingProvider {
                failure: TransportFailure::from_message("network timeout"),
                credentials_seen: Arc::new(Mutex::new(Vec::new())),
            }),
            EventWriter::new(&events_path, "run-test"),
        )
        .with_reselector(Box::new(CountingReselector {
            calls: Arc::clone(&calls),
            reply: None,
        }));

        let err = engine
            .render(&base_image(), None, &DesignConfig::default())
            .expect_err("generic failure expected");

        assert_eq!(err.message(), "network timeout");
        assert!(!engine.quota_flagged());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn absent_image_is_a_soft_success() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let mut engine = RenderEngine::new(
            Box::new(AbsentProvider),
            EventWriter::new(&events_path, "run-test"),
        );

        let outcome = engine
            .render(&base_image(), None, &DesignConfig::default())
            .expect("absence is not an error");

        assert!(outcome.image.is_none());
        assert_eq!(engine.state(), ProcessingState::Success);

        let raw = std::fs::read_to_string(&events_path)?;
        let finished = raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .find(|row| row["type"] == "render_finished")
            .expect("render_finished event");
        assert_eq!(finished["image_produced"], Value::Bool(false));
        Ok(())
    }

    #[test]
    fn gemini_parts_mirror_segment_order() {
        let base = base_image();
        let pattern = EncodedImage::from_bytes("image/jpeg", b"pattern");
        let plan = build_render_plan(&base, Some(&pattern), &DesignConfig::default());
        let parts = GeminiProvider::parts(&plan);

        assert_eq!(parts.len(), plan.segments.len());
        for (part, segment) in parts.iter().zip(plan.segments.iter()) {
            match segment {
                Segment::Text(text) => {
                    assert_eq!(part["text"].as_str(), Some(text.as_str()));
                }
                Segment::Image(image) => {
                    assert_eq!(
                        part["inlineData"]["mimeType"].as_str(),
                        Some(image.mime_type())
                    );
                    assert_eq!(
                        part["inlineData"]["data"].as_str(),
                        Some(image.payload())
                    );
                }
            }
        }
    }

    #[test]
    fn gemini_first_image_picks_first_inline_part() {
        let payload = serde_json::json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "ignored" },
                        { "inlineData": { "mimeType": "image/png", "data": "QUJD" } },
                        { "inlineData": { "mimeType": "image/png", "data": "WFla" } }
                    ]
                }
            }]
        });
        let image = GeminiProvider::first_image(&payload).expect("image part present");
        assert_eq!(image.payload(), "QUJD");

        let empty = serde_json::json!({
            "candidates": [{ "content": { "parts": [ { "text": "only text" } ] } }]
        });
        assert!(GeminiProvider::first_image(&empty).is_none());
    }

    #[test]
    fn provider_construction_requires_a_credential() {
        assert!(build_provider(ProviderKind::Gemini, None, None).is_err());
        assert!(build_provider(ProviderKind::OpenAi, None, None).is_err());
        let dryrun =
            build_provider(ProviderKind::Dryrun, None, None).expect("dryrun needs no key");
        assert_eq!(dryrun.name(), "dryrun");
    }

    #[test]
    fn provider_keywords_resolve() {
        assert_eq!(ProviderKind::from_keyword("Gemini"), Some(ProviderKind::Gemini));
        assert_eq!(ProviderKind::from_keyword("OPENAI"), Some(ProviderKind::OpenAi));
        assert_eq!(ProviderKind::from_keyword("dryrun"), Some(ProviderKind::Dryrun));
        assert_eq!(ProviderKind::from_keyword("stability"), None);
        assert_eq!(
            ProviderKind::Gemini.credential_env_var(),
            Some("GEMINI_API_KEY")
        );
        assert_eq!(ProviderKind::Dryrun.credential_env_var(), None);
    }

    #[test]
    fn dryrun_color_is_stable_per_instruction_text() {
        let first = color_from_instructions("render a red umbrella");
        let second = color_from_instructions("render a red umbrella");
        let other = color_from_instructions("render a blue umbrella");
        assert_eq!(first, second);
        assert_ne!(first, other);
    }
}
