//! Per-capability payload construction.
//!
//! `build` is a closed dispatch over [`CapabilityId`]: each capability maps
//! to one pure function from the resolved inputs and parameters to a
//! provider request body. Nothing here touches the network, so a
//! [`BuildError`] always means no task was created.

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::capability::{CapabilityDefinition, CapabilityId};
use crate::comfy::{face_swap_workflow, resolve_seed, Txt2ImgWorkflow, SAMPLERS, SCHEDULERS};
use crate::error::BuildError;
use crate::types::{Backend, GenerationParams, MediaType, ResolvedInput};
use crate::validate::assign_roles;

const TRANSITION_STYLES: &[&str] = &["crossfade", "cut", "wipe", "zoom", "morph"];
const LIGHT_DIRECTIONS: &[&str] = &["front", "back", "left", "right", "top", "bottom"];
const GARMENT_TYPES: &[&str] = &["upper_body", "lower_body", "full_body", "dress"];
const MAX_DURATION_SECS: u32 = 30;

/// Target aspect ratio for each supported platform preset.
const PLATFORM_PRESETS: &[(&str, &str)] = &[
    ("tiktok", "9:16"),
    ("reels", "9:16"),
    ("shorts", "9:16"),
    ("youtube", "16:9"),
    ("instagram_feed", "4:5"),
    ("square", "1:1"),
];

/// Pixel size used for still-image generation at each aspect ratio.
const IMAGE_SIZES: &[(&str, (u32, u32))] = &[
    ("1:1", (1024, 1024)),
    ("16:9", (1344, 768)),
    ("9:16", (768, 1344)),
    ("4:3", (1152, 896)),
    ("3:4", (896, 1152)),
    ("4:5", (896, 1120)),
];

/// A provider request ready to submit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderPayload {
    pub capability: CapabilityId,
    pub backend: Backend,
    pub body: Value,
}

impl ProviderPayload {
    /// The exact JSON document sent to the submission endpoint. Stored
    /// verbatim as the task's provenance.
    pub fn snapshot(&self) -> Value {
        json!({
            "capability": self.capability.as_str(),
            "backend": self.backend.as_str(),
            "payload": self.body,
        })
    }
}

/// Everything a capability builder may read.
pub struct BuildContext<'a> {
    pub capability: &'a CapabilityDefinition,
    pub inputs: &'a [ResolvedInput],
    pub params: &'a GenerationParams,
    pub prompt: Option<&'a str>,
    pub negative_prompt: Option<&'a str>,
    pub backend: Backend,
}

type BuildFn = fn(&BuildContext<'_>) -> Result<Value, BuildError>;

fn builder_for(id: CapabilityId) -> BuildFn {
    match id {
        CapabilityId::TextToVideo => build_text_to_video,
        CapabilityId::ImageToVideo => build_image_to_video,
        CapabilityId::MultiImageToVideo => build_multi_image_to_video,
        CapabilityId::TextToImage => build_text_to_image,
        CapabilityId::ImageRestyle => build_image_restyle,
        CapabilityId::Relight => build_relight,
        CapabilityId::FaceSwap => build_face_swap,
        CapabilityId::VirtualTryOn => build_virtual_try_on,
        CapabilityId::VideoReframe => build_video_reframe,
        CapabilityId::LipSync => build_lip_sync,
        CapabilityId::MotionTransfer => build_motion_transfer,
        CapabilityId::VideoEnhance => build_video_enhance,
        CapabilityId::ImageUpscale => build_image_upscale,
    }
}

/// Build the provider payload for a capability.
pub fn build(
    capability: &CapabilityDefinition,
    inputs: &[ResolvedInput],
    params: &GenerationParams,
    prompt: Option<&str>,
    negative_prompt: Option<&str>,
    backend: Backend,
) -> Result<ProviderPayload, BuildError> {
    if !capability.supports_backend(backend) {
        return Err(BuildError::new(format!(
            "{} cannot run on the {} backend",
            capability.id,
            backend.as_str()
        )));
    }
    if inputs.len() < capability.min_inputs || inputs.len() > capability.max_inputs {
        return Err(BuildError::new(format!(
            "{} takes {}..={} inputs, got {}",
            capability.id,
            capability.min_inputs,
            capability.max_inputs,
            inputs.len()
        )));
    }

    let ctx = BuildContext {
        capability,
        inputs,
        params,
        prompt: non_blank(prompt),
        negative_prompt: non_blank(negative_prompt),
        backend,
    };
    let body = builder_for(capability.id)(&ctx)?;

    Ok(ProviderPayload {
        capability: capability.id,
        backend,
        body,
    })
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

// ── Shared helpers ──────────────────────────────────────────────────

fn require_prompt<'a>(ctx: &BuildContext<'a>) -> Result<&'a str, BuildError> {
    ctx.prompt
        .ok_or_else(|| BuildError::new(format!("{} needs a prompt", ctx.capability.id)))
}

fn duration(ctx: &BuildContext<'_>) -> Result<u32, BuildError> {
    let secs = ctx.params.duration_secs;
    if secs == 0 || secs > MAX_DURATION_SECS {
        return Err(BuildError::new(format!(
            "duration must be between 1 and {} seconds, got {}",
            MAX_DURATION_SECS, secs
        )));
    }
    Ok(secs)
}

fn first_of(ctx: &BuildContext<'_>, media: MediaType) -> Result<String, BuildError> {
    ctx.inputs
        .iter()
        .find(|i| i.media_type == media)
        .map(|i| i.url.clone())
        .ok_or_else(|| BuildError::new(format!("{} needs a {} input", ctx.capability.id, media)))
}

fn single_url(ctx: &BuildContext<'_>) -> Result<String, BuildError> {
    ctx.inputs
        .first()
        .map(|i| i.url.clone())
        .ok_or_else(|| BuildError::new(format!("{} needs an input", ctx.capability.id)))
}

/// Inputs keyed by role name, in role declaration order.
fn role_urls(ctx: &BuildContext<'_>) -> Result<Vec<(String, ResolvedInput)>, BuildError> {
    let roles = &ctx.capability.roles;
    let slots = assign_roles(roles, ctx.inputs);
    roles
        .iter()
        .zip(slots)
        .map(|(role, slot)| {
            slot.cloned()
                .map(|input| (role.name.clone(), input))
                .ok_or_else(|| BuildError::new(format!("missing input for role '{}'", role.name)))
        })
        .collect()
}

fn number_in_range(
    params: &GenerationParams,
    key: &str,
    default: f64,
    min: f64,
    max: f64,
) -> Result<f64, BuildError> {
    let value = match params.extra(key) {
        None | Some(Value::Null) => return Ok(default),
        Some(v) => v
            .as_f64()
            .ok_or_else(|| BuildError::new(format!("{} must be a number", key)))?,
    };
    if !(min..=max).contains(&value) {
        return Err(BuildError::new(format!(
            "{} must be between {} and {}, got {}",
            key, min, max, value
        )));
    }
    Ok(value)
}

fn choice(
    params: &GenerationParams,
    key: &str,
    default: Option<&str>,
    allowed: &[&str],
) -> Result<Option<String>, BuildError> {
    let value = match params.extra(key) {
        None | Some(Value::Null) => return Ok(default.map(String::from)),
        Some(Value::String(s)) => s.trim().to_ascii_lowercase(),
        Some(_) => return Err(BuildError::new(format!("{} must be a string", key))),
    };
    if !allowed.contains(&value.as_str()) {
        return Err(BuildError::new(format!(
            "unsupported {} '{}' (expected one of: {})",
            key,
            value,
            allowed.join(", ")
        )));
    }
    Ok(Some(value))
}

fn string_list(params: &GenerationParams, key: &str) -> Result<Vec<String>, BuildError> {
    match params.extra(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| BuildError::new(format!("{} must contain only strings", key)))
            })
            .filter(|r| r.as_ref().map_or(true, |s| !s.is_empty()))
            .collect(),
        Some(_) => Err(BuildError::new(format!("{} must be a list", key))),
    }
}

fn image_size(aspect_ratio: &str) -> Result<(u32, u32), BuildError> {
    IMAGE_SIZES
        .iter()
        .find(|(ratio, _)| *ratio == aspect_ratio)
        .map(|(_, size)| *size)
        .ok_or_else(|| BuildError::new(format!("unsupported aspect ratio '{}'", aspect_ratio)))
}

fn insert_prompt(body: &mut Map<String, Value>, ctx: &BuildContext<'_>) {
    if let Some(prompt) = ctx.prompt {
        body.insert("prompt".into(), json!(prompt));
    }
    if let Some(negative) = ctx.negative_prompt {
        body.insert("negative_prompt".into(), json!(negative));
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

// ── Capability builders ─────────────────────────────────────────────

fn build_text_to_video(ctx: &BuildContext<'_>) -> Result<Value, BuildError> {
    let prompt = require_prompt(ctx)?;
    let mut body = object(json!({
        "prompt": prompt,
        "duration": duration(ctx)?,
        "aspect_ratio": ctx.params.aspect_ratio,
        "quality": ctx.params.quality,
    }));
    if let Some(negative) = ctx.negative_prompt {
        body.insert("negative_prompt".into(), json!(negative));
    }
    if ctx.params.seed >= 0 {
        body.insert("seed".into(), json!(ctx.params.seed));
    }
    Ok(Value::Object(body))
}

fn build_image_to_video(ctx: &BuildContext<'_>) -> Result<Value, BuildError> {
    let mut body = object(json!({
        "image_url": first_of(ctx, MediaType::Image)?,
        "duration": duration(ctx)?,
        "aspect_ratio": ctx.params.aspect_ratio,
        "motion_strength": number_in_range(ctx.params, "motionStrength", 0.5, 0.0, 1.0)?,
    }));
    insert_prompt(&mut body, ctx);
    Ok(Value::Object(body))
}

fn build_multi_image_to_video(ctx: &BuildContext<'_>) -> Result<Value, BuildError> {
    let transition = &ctx.params.transition;
    let style = transition.style.trim().to_ascii_lowercase();
    if !TRANSITION_STYLES.contains(&style.as_str()) {
        return Err(BuildError::new(format!("unsupported transition style '{}'", style)));
    }
    if ctx.inputs.iter().any(|i| i.media_type != MediaType::Image) {
        return Err(BuildError::new("keyframes must all be images"));
    }

    let keyframes: Vec<Value> = ctx
        .inputs
        .iter()
        .enumerate()
        .map(|(index, input)| json!({ "index": index, "image_url": input.url }))
        .collect();

    let mut body = object(json!({
        "keyframes": keyframes,
        "transition": {
            "style": style,
            "duration_ms": transition.duration_ms,
        },
        "duration": duration(ctx)?,
        "aspect_ratio": ctx.params.aspect_ratio,
    }));
    insert_prompt(&mut body, ctx);
    Ok(Value::Object(body))
}

fn build_text_to_image(ctx: &BuildContext<'_>) -> Result<Value, BuildError> {
    let prompt = require_prompt(ctx)?;
    let (width, height) = image_size(&ctx.params.aspect_ratio)?;
    let count = number_in_range(ctx.params, "count", 1.0, 1.0, 4.0)? as u32;
    let seed = resolve_seed(ctx.params.seed);

    match ctx.backend {
        Backend::Managed => {
            let mut body = object(json!({
                "prompt": prompt,
                "width": width,
                "height": height,
                "num_images": count,
                "seed": seed,
                "quality": ctx.params.quality,
            }));
            if let Some(negative) = ctx.negative_prompt {
                body.insert("negative_prompt".into(), json!(negative));
            }
            Ok(Value::Object(body))
        }
        Backend::Comfy => {
            let checkpoint = match ctx.params.extra("checkpoint") {
                Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
                _ => "sd_xl_base_1.0.safetensors".to_string(),
            };
            let steps = number_in_range(ctx.params, "steps", 25.0, 1.0, 150.0)? as u32;
            let cfg = number_in_range(ctx.params, "cfgScale", 7.0, 1.0, 30.0)?;
            let sampler = choice(ctx.params, "sampler", Some("dpmpp_2m"), SAMPLERS)?;
            let scheduler = choice(ctx.params, "scheduler", Some("karras"), SCHEDULERS)?;
            let workflow = Txt2ImgWorkflow::new(prompt, checkpoint)
                .negative(ctx.negative_prompt.unwrap_or_default())
                .size(width, height)
                .steps(steps)
                .cfg_scale(cfg)
                .sampler(sampler.unwrap_or_default())
                .scheduler(scheduler.unwrap_or_default())
                .batch_size(count)
                .filename_prefix(ctx.capability.id.as_str())
                .build(seed);
            Ok(json!({ "workflow": workflow, "seed": seed }))
        }
    }
}

fn build_image_restyle(ctx: &BuildContext<'_>) -> Result<Value, BuildError> {
    let style_tags = string_list(ctx.params, "styleTags")?;
    if style_tags.is_empty() && ctx.prompt.is_none() {
        return Err(BuildError::new("restyle needs style tags or a prompt"));
    }
    let mut body = object(json!({
        "image_url": single_url(ctx)?,
        "style_tags": style_tags,
        "strength": number_in_range(ctx.params, "strength", 0.6, 0.0, 1.0)?,
    }));
    insert_prompt(&mut body, ctx);
    Ok(Value::Object(body))
}

fn build_relight(ctx: &BuildContext<'_>) -> Result<Value, BuildError> {
    let mut body = object(json!({
        "image_url": single_url(ctx)?,
        "light_direction": choice(ctx.params, "lightDirection", Some("front"), LIGHT_DIRECTIONS)?,
        "intensity": number_in_range(ctx.params, "intensity", 0.5, 0.0, 1.0)?,
    }));
    insert_prompt(&mut body, ctx);
    Ok(Value::Object(body))
}

fn build_face_swap(ctx: &BuildContext<'_>) -> Result<Value, BuildError> {
    let roles = role_urls(ctx)?;
    let (_, scene) = &roles[0];
    let (_, face) = &roles[1];
    let scene_is_video = scene.media_type == MediaType::Video;
    let restore_face = match ctx.params.extra("restoreFace") {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => *b,
        Some(_) => return Err(BuildError::new("restoreFace must be a boolean")),
    };

    match ctx.backend {
        Backend::Managed => Ok(json!({
            "target_url": scene.url,
            "target_type": if scene_is_video { "video" } else { "image" },
            "source_face_url": face.url,
            "restore_face": restore_face,
        })),
        Backend::Comfy => Ok(json!({
            "workflow": face_swap_workflow(&scene.url, scene_is_video, &face.url, restore_face),
        })),
    }
}

fn build_virtual_try_on(ctx: &BuildContext<'_>) -> Result<Value, BuildError> {
    let roles = role_urls(ctx)?;
    Ok(json!({
        "person_url": roles[0].1.url,
        "garment_url": roles[1].1.url,
        "garment_type": choice(ctx.params, "garmentType", Some("upper_body"), GARMENT_TYPES)?,
    }))
}

fn build_video_reframe(ctx: &BuildContext<'_>) -> Result<Value, BuildError> {
    let names: Vec<&str> = PLATFORM_PRESETS.iter().map(|(name, _)| *name).collect();
    let platform = choice(ctx.params, "platformPreset", None, &names)?
        .ok_or_else(|| BuildError::new("reframe needs a platform preset"))?;
    let target_ratio = PLATFORM_PRESETS
        .iter()
        .find(|(name, _)| *name == platform)
        .map(|(_, ratio)| *ratio)
        .unwrap_or("16:9");
    Ok(json!({
        "video_url": first_of(ctx, MediaType::Video)?,
        "platform": platform,
        "target_aspect_ratio": target_ratio,
    }))
}

fn build_lip_sync(ctx: &BuildContext<'_>) -> Result<Value, BuildError> {
    let script = require_prompt(ctx)?;
    let voice = match ctx.params.extra("voice") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => "neutral".to_string(),
    };
    Ok(json!({
        "video_url": first_of(ctx, MediaType::Video)?,
        "script": script,
        "voice": voice,
    }))
}

fn build_motion_transfer(ctx: &BuildContext<'_>) -> Result<Value, BuildError> {
    let roles = role_urls(ctx)?;
    let mut body = object(json!({
        "subject_url": roles[0].1.url,
        "motion_video_url": first_of(ctx, MediaType::Video)?,
        "duration": duration(ctx)?,
    }));
    insert_prompt(&mut body, ctx);
    Ok(Value::Object(body))
}

fn build_video_enhance(ctx: &BuildContext<'_>) -> Result<Value, BuildError> {
    let mut body = object(json!({
        "video_url": first_of(ctx, MediaType::Video)?,
        "intensity": number_in_range(ctx.params, "intensity", 0.5, 0.0, 1.0)?,
    }));
    match ctx.params.extra("targetFps") {
        None | Some(Value::Null) => {}
        Some(v) => match v.as_u64() {
            Some(fps @ (24 | 30 | 60)) => {
                body.insert("target_fps".into(), json!(fps));
            }
            _ => return Err(BuildError::new("targetFps must be 24, 30 or 60")),
        },
    }
    Ok(Value::Object(body))
}

fn build_image_upscale(ctx: &BuildContext<'_>) -> Result<Value, BuildError> {
    let scale = match ctx.params.extra("scale") {
        None | Some(Value::Null) => 2,
        Some(v) => match v.as_u64() {
            Some(s @ (2 | 4)) => s,
            _ => return Err(BuildError::new("scale must be 2 or 4")),
        },
    };
    Ok(json!({
        "image_url": first_of(ctx, MediaType::Image)?,
        "scale": scale,
    }))
}
