//! Generation parameters parsed from a job's input mapping.
//!
//! Every field except `image_url` is optional and falls back to the
//! defaults used by the Stable Video Diffusion img2vid-xt checkpoint.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{ValidationError, ValidationResult};

pub const DEFAULT_HEIGHT: u32 = 576;
pub const DEFAULT_WIDTH: u32 = 1024;
pub const DEFAULT_NUM_FRAMES: u32 = 25;
pub const DEFAULT_FPS: u32 = 7;
pub const DEFAULT_MOTION_BUCKET_ID: u32 = 127;
pub const DEFAULT_NOISE_AUG_STRENGTH: f64 = 0.02;
pub const DEFAULT_DECODE_CHUNK_SIZE: u32 = 8;
pub const DEFAULT_STEPS: u32 = 20;
pub const DEFAULT_CFG: f64 = 2.5;
pub const DEFAULT_SAMPLER: &str = "euler";
pub const DEFAULT_SCHEDULER: &str = "karras";

/// Largest motion bucket the conditioning embedding accepts.
pub const MAX_MOTION_BUCKET_ID: u32 = 255;

/// Validated parameters for one image-to-video generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub image_url: String,
    pub height: u32,
    pub width: u32,
    pub num_frames: u32,
    pub fps: u32,
    pub motion_bucket_id: u32,
    pub noise_aug_strength: f64,
    pub seed: u64,
    pub decode_chunk_size: u32,
    /// Sampling steps (node-graph pipeline only)
    pub steps: u32,
    /// Classifier-free guidance scale (node-graph pipeline only)
    pub cfg: f64,
    pub sampler_name: String,
    pub scheduler: String,
}

impl GenerationParams {
    /// Parse and validate a job input, seeding from the current time when
    /// no seed is given.
    pub fn from_input(input: &Value) -> ValidationResult<Self> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self::from_input_with_default_seed(input, now)
    }

    /// Parse and validate a job input with an explicit fallback seed.
    pub fn from_input_with_default_seed(
        input: &Value,
        default_seed: u64,
    ) -> ValidationResult<Self> {
        let obj = match input {
            Value::Object(map) => map,
            // An absent input has no image URL either
            Value::Null => return Err(ValidationError::MissingField("image_url")),
            _ => {
                return Err(ValidationError::invalid_input(
                    "job input must be a JSON object",
                ))
            }
        };

        let image_url = match obj.get("image_url") {
            None | Some(Value::Null) => return Err(ValidationError::MissingField("image_url")),
            Some(Value::String(s)) if s.trim().is_empty() => {
                return Err(ValidationError::MissingField("image_url"))
            }
            Some(Value::String(s)) => s.trim().to_string(),
            Some(_) => {
                return Err(ValidationError::invalid_field(
                    "image_url",
                    "expected a string",
                ))
            }
        };

        let params = Self {
            image_url,
            height: get_u32(obj, "height", DEFAULT_HEIGHT)?,
            width: get_u32(obj, "width", DEFAULT_WIDTH)?,
            num_frames: get_u32(obj, "num_frames", DEFAULT_NUM_FRAMES)?,
            fps: get_u32(obj, "fps", DEFAULT_FPS)?,
            motion_bucket_id: get_u32(obj, "motion_bucket_id", DEFAULT_MOTION_BUCKET_ID)?,
            noise_aug_strength: get_f64(obj, "noise_aug_strength", DEFAULT_NOISE_AUG_STRENGTH)?,
            seed: get_u64(obj, "seed", default_seed)?,
            decode_chunk_size: get_u32(obj, "decode_chunk_size", DEFAULT_DECODE_CHUNK_SIZE)?,
            steps: get_u32(obj, "steps", DEFAULT_STEPS)?,
            cfg: get_f64(obj, "cfg", DEFAULT_CFG)?,
            sampler_name: get_string(obj, "sampler_name", DEFAULT_SAMPLER)?,
            scheduler: get_string(obj, "scheduler", DEFAULT_SCHEDULER)?,
        };

        params.validate()?;
        Ok(params)
    }

    /// Check value ranges.
    pub fn validate(&self) -> ValidationResult<()> {
        check_dimension("height", self.height)?;
        check_dimension("width", self.width)?;

        if self.num_frames == 0 {
            return Err(ValidationError::invalid_field("num_frames", "must be at least 1"));
        }
        if self.fps == 0 {
            return Err(ValidationError::invalid_field("fps", "must be at least 1"));
        }
        if self.motion_bucket_id > MAX_MOTION_BUCKET_ID {
            return Err(ValidationError::invalid_field(
                "motion_bucket_id",
                format!("must be at most {}", MAX_MOTION_BUCKET_ID),
            ));
        }
        if !self.noise_aug_strength.is_finite() || self.noise_aug_strength < 0.0 {
            return Err(ValidationError::invalid_field(
                "noise_aug_strength",
                "must be a non-negative number",
            ));
        }
        if self.decode_chunk_size == 0 {
            return Err(ValidationError::invalid_field(
                "decode_chunk_size",
                "must be at least 1",
            ));
        }
        if self.steps == 0 {
            return Err(ValidationError::invalid_field("steps", "must be at least 1"));
        }
        if !self.cfg.is_finite() || self.cfg <= 0.0 {
            return Err(ValidationError::invalid_field("cfg", "must be a positive number"));
        }
        if self.sampler_name.is_empty() {
            return Err(ValidationError::invalid_field("sampler_name", "must not be empty"));
        }
        if self.scheduler.is_empty() {
            return Err(ValidationError::invalid_field("scheduler", "must not be empty"));
        }

        Ok(())
    }

    /// Video duration in seconds at the requested frame rate.
    pub fn duration_secs(&self) -> f64 {
        self.num_frames as f64 / self.fps as f64
    }
}

fn check_dimension(field: &'static str, value: u32) -> ValidationResult<()> {
    if value == 0 || value % 8 != 0 {
        return Err(ValidationError::invalid_field(
            field,
            format!("{} must be a positive multiple of 8", value),
        ));
    }
    Ok(())
}

/// Read an unsigned integer, accepting whole-valued floats such as `576.0`.
fn get_u64(obj: &Map<String, Value>, field: &'static str, default: u64) -> ValidationResult<u64> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_u64()
            .or_else(|| {
                value
                    .as_f64()
                    .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
                    .map(|f| f as u64)
            })
            .ok_or_else(|| {
                ValidationError::invalid_field(field, "expected a non-negative integer")
            }),
    }
}

fn get_u32(obj: &Map<String, Value>, field: &'static str, default: u32) -> ValidationResult<u32> {
    let value = get_u64(obj, field, default as u64)?;
    u32::try_from(value).map_err(|_| ValidationError::invalid_field(field, "value is too large"))
}

fn get_f64(obj: &Map<String, Value>, field: &'static str, default: f64) -> ValidationResult<f64> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| ValidationError::invalid_field(field, "expected a number")),
    }
}

fn get_string(
    obj: &Map<String, Value>,
    field: &'static str,
    default: &str,
) -> ValidationResult<String> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(default.to_string()),
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(_) => Err(ValidationError::invalid_field(field, "expected a string")),
    }
}
