//! Job descriptions handed from collaborators to the render engine.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

use crate::error::JobError;

/// Seed value asking the backend to pick a random seed.
pub const RANDOM_SEED: i64 = -1;

/// Default sampling steps for jobs built without explicit parameters.
pub const DEFAULT_STEPS: u32 = 20;

/// Default classifier-free guidance scale.
pub const DEFAULT_CFG_SCALE: f32 = 7.0;

/// Default output edge length in pixels.
pub const DEFAULT_SIZE: u32 = 512;

/// Default denoising strength for img2img / inpaint jobs.
pub const DEFAULT_DENOISING_STRENGTH: f32 = 0.75;

/// Default mask blur radius in pixels.
pub const DEFAULT_MASK_BLUR: u32 = 4;

/// Outbound request body, serialized as-is into the backend's JSON wire
/// format. Image and mask payloads are already base64 encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
pub struct RenderRequest {
    pub prompt: String,
    pub negative_prompt: String,
    #[validate(range(min = 1, max = 150))]
    pub steps: u32,
    pub seed: i64,
    #[validate(range(min = 1.0, max = 30.0))]
    pub cfg_scale: f32,
    #[validate(range(min = 64, max = 4096))]
    pub width: u32,
    #[validate(range(min = 64, max = 4096))]
    pub height: u32,
    #[validate(range(min = 0.0, max = 1.0))]
    pub denoising_strength: f32,
    #[validate(range(max = 64))]
    pub mask_blur: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub init_images: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
}

impl RenderRequest {
    /// A text-only request with default generation parameters.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: String::new(),
            steps: DEFAULT_STEPS,
            seed: RANDOM_SEED,
            cfg_scale: DEFAULT_CFG_SCALE,
            width: DEFAULT_SIZE,
            height: DEFAULT_SIZE,
            denoising_strength: DEFAULT_DENOISING_STRENGTH,
            mask_blur: DEFAULT_MASK_BLUR,
            init_images: Vec::new(),
            mask: None,
        }
    }

    pub fn negative_prompt(mut self, negative: impl Into<String>) -> Self {
        self.negative_prompt = negative.into();
        self
    }

    pub fn seed(mut self, seed: i64) -> Self {
        self.seed = seed;
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Attach the source image (encoded PNG/JPEG bytes) for img2img.
    pub fn init_image(mut self, encoded: &[u8]) -> Self {
        self.init_images = vec![BASE64.encode(encoded)];
        self
    }

    /// Attach an inpainting mask (encoded PNG bytes, white = repaint).
    pub fn mask(mut self, encoded: &[u8]) -> Self {
        self.mask = Some(BASE64.encode(encoded));
        self
    }

    /// Whether this is an img2img / inpaint request rather than txt2img.
    pub fn has_init_image(&self) -> bool {
        !self.init_images.is_empty()
    }
}

/// One render job: payload plus the token that correlates its result
/// back to the caller. Immutable once built; consumed when submitted to
/// the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescription {
    payload: RenderRequest,
    correlation_token: Uuid,
    wire: serde_json::Value,
}

impl JobDescription {
    /// Wrap a payload with a fresh time-ordered correlation token,
    /// rejecting out-of-range or non-finite generation parameters.
    pub fn new(payload: RenderRequest) -> Result<Self, JobError> {
        // Range checks pass NaN through.
        if !payload.cfg_scale.is_finite() {
            return Err(JobError::NonFinite("cfg_scale"));
        }
        if !payload.denoising_strength.is_finite() {
            return Err(JobError::NonFinite("denoising_strength"));
        }
        payload.validate()?;
        let wire = serde_json::to_value(&payload)?;
        Ok(Self {
            payload,
            correlation_token: Uuid::now_v7(),
            wire,
        })
    }

    pub fn payload(&self) -> &RenderRequest {
        &self.payload
    }

    pub fn correlation_token(&self) -> Uuid {
        self.correlation_token
    }

    /// The JSON wire body, encoded once at construction.
    pub fn wire_body(&self) -> &serde_json::Value {
        &self.wire
    }
}
