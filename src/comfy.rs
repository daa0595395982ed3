//! ComfyUI API-format workflow graphs for capabilities that can run on the
//! self-hosted backend.

use rand::Rng;
use serde_json::{json, Value};

/// Replace a negative seed with a random one.
pub fn resolve_seed(seed: i64) -> i64 {
    if seed < 0 {
        rand::rng().random_range(0..i64::MAX)
    } else {
        seed
    }
}

/// Samplers the self-hosted backend is known to ship.
pub const SAMPLERS: &[&str] = &["euler", "euler_ancestral", "dpmpp_2m", "dpmpp_sde", "ddim"];

/// Noise schedulers accepted alongside [`SAMPLERS`].
pub const SCHEDULERS: &[&str] = &["normal", "karras", "exponential", "sgm_uniform"];

/// Builder for a txt2img workflow.
///
/// Constructs the standard 7-node pipeline: CheckpointLoader → CLIP encoders
/// → KSampler → VAEDecode → SaveImage. The seed is supplied at build time so
/// the caller can record the exact value sent.
#[derive(Debug, Clone)]
pub struct Txt2ImgWorkflow {
    positive_prompt: String,
    negative_prompt: String,
    checkpoint: String,
    width: u32,
    height: u32,
    steps: u32,
    cfg_scale: f64,
    sampler: String,
    scheduler: String,
    batch_size: u32,
    filename_prefix: String,
}

impl Txt2ImgWorkflow {
    /// Square 1024px, 25 steps, cfg 7, dpmpp_2m with the karras schedule.
    pub fn new(prompt: impl Into<String>, checkpoint: impl Into<String>) -> Self {
        Self {
            positive_prompt: prompt.into(),
            negative_prompt: String::new(),
            checkpoint: checkpoint.into(),
            width: 1024,
            height: 1024,
            steps: 25,
            cfg_scale: 7.0,
            sampler: "dpmpp_2m".to_string(),
            scheduler: "karras".to_string(),
            batch_size: 1,
            filename_prefix: "generation".to_string(),
        }
    }

    pub fn negative(mut self, prompt: impl Into<String>) -> Self {
        self.negative_prompt = prompt.into();
        self
    }

    /// Latent size in pixels.
    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    /// Classifier-free guidance strength.
    pub fn cfg_scale(mut self, cfg: f64) -> Self {
        self.cfg_scale = cfg;
        self
    }

    /// KSampler algorithm, one of [`SAMPLERS`].
    pub fn sampler(mut self, sampler: impl Into<String>) -> Self {
        self.sampler = sampler.into();
        self
    }

    /// Noise schedule, one of [`SCHEDULERS`].
    pub fn scheduler(mut self, scheduler: impl Into<String>) -> Self {
        self.scheduler = scheduler.into();
        self
    }

    /// Images rendered per run.
    pub fn batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }

    /// Prefix for files written by the SaveImage node.
    pub fn filename_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.filename_prefix = prefix.into();
        self
    }

    /// Build the workflow graph with an already resolved seed.
    pub fn build(&self, seed: i64) -> Value {
        json!({
            "1": {
                "class_type": "CheckpointLoaderSimple",
                "inputs": { "ckpt_name": self.checkpoint }
            },
            "2": {
                "class_type": "EmptyLatentImage",
                "inputs": {
                    "width": self.width,
                    "height": self.height,
                    "batch_size": self.batch_size
                }
            },
            "3": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": self.positive_prompt, "clip": ["1", 1] }
            },
            "4": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": self.negative_prompt, "clip": ["1", 1] }
            },
            "5": {
                "class_type": "KSampler",
                "inputs": {
                    "seed": seed,
                    "steps": self.steps,
                    "cfg": self.cfg_scale,
                    "sampler_name": self.sampler,
                    "scheduler": self.scheduler,
                    "denoise": 1.0,
                    "model": ["1", 0],
                    "positive": ["3", 0],
                    "negative": ["4", 0],
                    "latent_image": ["2", 0]
                }
            },
            "6": {
                "class_type": "VAEDecode",
                "inputs": { "samples": ["5", 0], "vae": ["1", 2] }
            },
            "7": {
                "class_type": "SaveImage",
                "inputs": {
                    "filename_prefix": self.filename_prefix,
                    "images": ["6", 0]
                }
            }
        })
    }
}

/// Face swap graph: load the face and the scene, run ReActor, save the
/// result as a video (or an image when the scene is a still).
pub fn face_swap_workflow(scene_url: &str, scene_is_video: bool, face_url: &str, restore_face: bool) -> Value {
    let (load_scene, save) = if scene_is_video {
        (
            json!({
                "class_type": "VHS_LoadVideoPath",
                "inputs": { "video": scene_url, "force_rate": 0, "frame_load_cap": 0 }
            }),
            json!({
                "class_type": "VHS_VideoCombine",
                "inputs": {
                    "images": ["3", 0],
                    "frame_rate": 24,
                    "format": "video/h264-mp4",
                    "filename_prefix": "face_swap"
                }
            }),
        )
    } else {
        (
            json!({
                "class_type": "LoadImageFromUrl",
                "inputs": { "url": scene_url }
            }),
            json!({
                "class_type": "SaveImage",
                "inputs": { "images": ["3", 0], "filename_prefix": "face_swap" }
            }),
        )
    };

    json!({
        "1": {
            "class_type": "LoadImageFromUrl",
            "inputs": { "url": face_url }
        },
        "2": load_scene,
        "3": {
            "class_type": "ReActorFaceSwap",
            "inputs": {
                "enabled": true,
                "input_image": ["2", 0],
                "source_image": ["1", 0],
                "swap_model": "inswapper_128.onnx",
                "face_restore_model": if restore_face { "codeformer-v0.1.0.pth" } else { "none" },
                "input_faces_index": "0",
                "source_faces_index": "0"
            }
        },
        "4": save
    })
}
