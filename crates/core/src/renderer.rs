//! Renderer type tags and the matching rules callers use to request them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;

/// Capability / API dialect of a backend slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RendererType {
    /// Stable Diffusion web UI style server (`/sdapi/v1/*`).
    Automatic1111,
    /// ComfyUI server fronted by an img2img-compatible bridge.
    ComfyUI,
    /// Hosted endpoint with no local GPU behind it.
    Remote,
}

impl RendererType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic1111 => "automatic1111",
            Self::ComfyUI => "comfyui",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for RendererType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RendererType {
    type Err = PoolError;

    /// Parse a configuration tag. Accepts a few common aliases,
    /// case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "automatic1111" | "a1111" | "sdwebui" => Ok(Self::Automatic1111),
            "comfyui" | "comfy" => Ok(Self::ComfyUI),
            "remote" | "cloud" => Ok(Self::Remote),
            other => Err(PoolError::Configuration(format!(
                "Unknown renderer type tag: \"{other}\""
            ))),
        }
    }
}

/// What kind of slot a caller is willing to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererTypeRequest {
    /// Any slot flagged as local, regardless of renderer type.
    AnyLocal,
    /// Exactly this renderer type, local or remote.
    SpecificType(RendererType),
    /// Either of two renderer types; both rank equally, lowest slot ID wins.
    TypeOrFallback(RendererType, RendererType),
}

impl RendererTypeRequest {
    /// Whether a slot with the given tag and locality satisfies this request.
    ///
    /// Busy and active state are the allocator's concern, not checked here.
    pub fn accepts(&self, renderer_type: RendererType, is_local: bool) -> bool {
        match *self {
            Self::AnyLocal => is_local,
            Self::SpecificType(t) => renderer_type == t,
            Self::TypeOrFallback(a, b) => renderer_type == a || renderer_type == b,
        }
    }
}

impl fmt::Display for RendererTypeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnyLocal => f.write_str("any-local"),
            Self::SpecificType(t) => write!(f, "{t}"),
            Self::TypeOrFallback(a, b) => write!(f, "{a}|{b}"),
        }
    }
}
