//! Capability catalog.
//!
//! The registry is the single source of truth for cardinality, media-type
//! and role constraints. Validation and payload construction both consult
//! it instead of re-encoding limits.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};
use crate::types::{Backend, CapabilityCategory, MediaType, OutputType};

/// Every capability the engine knows how to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityId {
    TextToVideo,
    ImageToVideo,
    MultiImageToVideo,
    TextToImage,
    ImageRestyle,
    Relight,
    FaceSwap,
    VirtualTryOn,
    VideoReframe,
    LipSync,
    MotionTransfer,
    VideoEnhance,
    ImageUpscale,
}

impl CapabilityId {
    pub const ALL: [CapabilityId; 13] = [
        CapabilityId::TextToVideo,
        CapabilityId::ImageToVideo,
        CapabilityId::MultiImageToVideo,
        CapabilityId::TextToImage,
        CapabilityId::ImageRestyle,
        CapabilityId::Relight,
        CapabilityId::FaceSwap,
        CapabilityId::VirtualTryOn,
        CapabilityId::VideoReframe,
        CapabilityId::LipSync,
        CapabilityId::MotionTransfer,
        CapabilityId::VideoEnhance,
        CapabilityId::ImageUpscale,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityId::TextToVideo => "text_to_video",
            CapabilityId::ImageToVideo => "image_to_video",
            CapabilityId::MultiImageToVideo => "multi_image_to_video",
            CapabilityId::TextToImage => "text_to_image",
            CapabilityId::ImageRestyle => "image_restyle",
            CapabilityId::Relight => "relight",
            CapabilityId::FaceSwap => "face_swap",
            CapabilityId::VirtualTryOn => "virtual_try_on",
            CapabilityId::VideoReframe => "video_reframe",
            CapabilityId::LipSync => "lip_sync",
            CapabilityId::MotionTransfer => "motion_transfer",
            CapabilityId::VideoEnhance => "video_enhance",
            CapabilityId::ImageUpscale => "image_upscale",
        }
    }

    /// Resolve a string id. Unknown ids are `NotFound`.
    pub fn parse(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| DispatchError::NotFound(s.to_string()))
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A distinct, named input slot of a role-based capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputRole {
    pub name: String,
    pub media_types: Vec<MediaType>,
}

impl InputRole {
    pub fn new(name: &str, media_types: &[MediaType]) -> Self {
        Self {
            name: name.to_string(),
            media_types: media_types.to_vec(),
        }
    }
}

/// Immutable catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDefinition {
    pub id: CapabilityId,
    pub label: String,
    pub category: CapabilityCategory,
    pub min_inputs: usize,
    pub max_inputs: usize,
    pub allowed_media_types: Vec<MediaType>,
    pub output_type: OutputType,
    pub prompt_required: bool,
    pub available: bool,
    pub roles: Vec<InputRole>,
    pub requires_motion_reference: bool,
    pub backends: Vec<Backend>,
    /// Processing-equivalent labels the service may report. Display only.
    pub sub_statuses: Vec<String>,
}

impl CapabilityDefinition {
    fn new(
        id: CapabilityId,
        label: &str,
        category: CapabilityCategory,
        inputs: (usize, usize),
        media: &[MediaType],
        output_type: OutputType,
    ) -> Self {
        Self {
            id,
            label: label.to_string(),
            category,
            min_inputs: inputs.0,
            max_inputs: inputs.1,
            allowed_media_types: media.to_vec(),
            output_type,
            prompt_required: false,
            available: true,
            roles: Vec::new(),
            requires_motion_reference: false,
            backends: vec![Backend::Managed],
            sub_statuses: Vec::new(),
        }
    }

    fn prompt_required(mut self) -> Self {
        self.prompt_required = true;
        self
    }

    fn roles(mut self, roles: Vec<InputRole>) -> Self {
        self.roles = roles;
        self
    }

    fn motion_reference(mut self) -> Self {
        self.requires_motion_reference = true;
        self
    }

    fn backends(mut self, backends: &[Backend]) -> Self {
        self.backends = backends.to_vec();
        self
    }

    fn sub_statuses(mut self, labels: &[&str]) -> Self {
        self.sub_statuses = labels.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn accepts(&self, media_type: MediaType) -> bool {
        self.allowed_media_types.contains(&media_type)
    }

    pub fn supports_backend(&self, backend: Backend) -> bool {
        self.backends.contains(&backend)
    }

    pub fn is_text_only(&self) -> bool {
        self.max_inputs == 0
    }

    /// Check the catalog invariants for this entry.
    pub fn check(&self) -> std::result::Result<(), String> {
        if self.min_inputs > self.max_inputs {
            return Err(format!(
                "{}: min_inputs {} exceeds max_inputs {}",
                self.id, self.min_inputs, self.max_inputs
            ));
        }
        if self.max_inputs == 0
            && (self.allowed_media_types != [MediaType::Text] || !self.prompt_required)
        {
            return Err(format!(
                "{}: text-only capabilities must allow only text and require a prompt",
                self.id
            ));
        }
        if !self.roles.is_empty() && self.roles.len() > self.max_inputs {
            return Err(format!(
                "{}: {} roles cannot fit in {} inputs",
                self.id,
                self.roles.len(),
                self.max_inputs
            ));
        }
        if self.backends.is_empty() {
            return Err(format!("{}: no backend services this capability", self.id));
        }
        Ok(())
    }
}

/// Filter for [`CapabilityRegistry::list`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityFilter {
    pub media_type: Option<MediaType>,
    pub output_type: Option<OutputType>,
}

impl CapabilityFilter {
    pub fn media_type(mut self, media_type: MediaType) -> Self {
        self.media_type = Some(media_type);
        self
    }

    pub fn output_type(mut self, output_type: OutputType) -> Self {
        self.output_type = Some(output_type);
        self
    }

    fn matches(&self, def: &CapabilityDefinition) -> bool {
        self.media_type.map_or(true, |m| def.accepts(m))
            && self.output_type.map_or(true, |o| def.output_type == o)
    }
}

/// Static catalog of capability definitions. Pure lookups only.
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    definitions: BTreeMap<CapabilityId, CapabilityDefinition>,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CapabilityRegistry {
    /// Build a registry from explicit definitions, rejecting duplicates and
    /// entries that break the catalog invariants.
    pub fn from_definitions(defs: Vec<CapabilityDefinition>) -> Result<Self> {
        let mut definitions = BTreeMap::new();
        for def in defs {
            def.check().map_err(DispatchError::InvalidCatalog)?;
            let id = def.id;
            if definitions.insert(id, def).is_some() {
                return Err(DispatchError::InvalidCatalog(format!(
                    "duplicate definition for {}",
                    id
                )));
            }
        }
        Ok(Self { definitions })
    }

    /// The built-in 13-capability catalog.
    pub fn builtin() -> Self {
        use CapabilityCategory::*;
        use MediaType::{Image, Text, Video};

        let defs = vec![
            CapabilityDefinition::new(
                CapabilityId::TextToVideo,
                "Text to Video",
                Dynamic,
                (0, 0),
                &[Text],
                OutputType::Video,
            )
            .prompt_required(),
            CapabilityDefinition::new(
                CapabilityId::ImageToVideo,
                "Image to Video",
                Dynamic,
                (1, 1),
                &[Image],
                OutputType::Video,
            ),
            CapabilityDefinition::new(
                CapabilityId::MultiImageToVideo,
                "Multi-Image to Video",
                Dynamic,
                (2, 8),
                &[Image],
                OutputType::Video,
            ),
            CapabilityDefinition::new(
                CapabilityId::TextToImage,
                "Text to Image",
                Style,
                (0, 0),
                &[Text],
                OutputType::Image,
            )
            .prompt_required()
            .backends(&[Backend::Managed, Backend::Comfy]),
            CapabilityDefinition::new(
                CapabilityId::ImageRestyle,
                "Restyle",
                Style,
                (1, 1),
                &[Image],
                OutputType::Image,
            ),
            CapabilityDefinition::new(
                CapabilityId::Relight,
                "Relight",
                Style,
                (1, 1),
                &[Image],
                OutputType::Image,
            ),
            CapabilityDefinition::new(
                CapabilityId::FaceSwap,
                "Face Swap",
                Structure,
                (2, 2),
                &[Image, Video],
                OutputType::Video,
            )
            .roles(vec![
                InputRole::new("scene", &[Image, Video]),
                InputRole::new("face", &[Image]),
            ])
            .backends(&[Backend::Managed, Backend::Comfy])
            .sub_statuses(&["swapping"]),
            CapabilityDefinition::new(
                CapabilityId::VirtualTryOn,
                "Virtual Try-On",
                Structure,
                (2, 2),
                &[Image],
                OutputType::Image,
            )
            .roles(vec![
                InputRole::new("person", &[Image]),
                InputRole::new("garment", &[Image]),
            ]),
            CapabilityDefinition::new(
                CapabilityId::VideoReframe,
                "Reframe for Platform",
                Structure,
                (1, 1),
                &[Video],
                OutputType::Video,
            ),
            CapabilityDefinition::new(
                CapabilityId::LipSync,
                "Lip Sync",
                Dynamic,
                (1, 1),
                &[Video],
                OutputType::Video,
            )
            .prompt_required()
            .sub_statuses(&["synthesizing", "broadcasting"]),
            CapabilityDefinition::new(
                CapabilityId::MotionTransfer,
                "Motion Transfer",
                Dynamic,
                (2, 2),
                &[Image, Video],
                OutputType::Video,
            )
            .roles(vec![InputRole::new("subject", &[Image])])
            .motion_reference(),
            CapabilityDefinition::new(
                CapabilityId::VideoEnhance,
                "Enhance Video",
                Repair,
                (1, 1),
                &[Video],
                OutputType::Video,
            ),
            CapabilityDefinition::new(
                CapabilityId::ImageUpscale,
                "Upscale",
                Repair,
                (1, 1),
                &[Image],
                OutputType::Image,
            ),
        ];

        let definitions = defs.into_iter().map(|d| (d.id, d)).collect();
        Self { definitions }
    }

    /// Mark a capability unavailable (feature flag, provider outage).
    pub fn with_unavailable(mut self, id: CapabilityId) -> Self {
        if let Some(def) = self.definitions.get_mut(&id) {
            def.available = false;
        }
        self
    }

    pub fn get(&self, id: CapabilityId) -> Result<&CapabilityDefinition> {
        self.definitions
            .get(&id)
            .ok_or_else(|| DispatchError::NotFound(id.to_string()))
    }

    /// Look up by string id, as received from a UI.
    pub fn get_by_name(&self, id: &str) -> Result<&CapabilityDefinition> {
        self.get(CapabilityId::parse(id)?)
    }

    pub fn list(&self, filter: CapabilityFilter) -> Vec<&CapabilityDefinition> {
        self.definitions
            .values()
            .filter(|d| filter.matches(d))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
