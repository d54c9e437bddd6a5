//! # Configuration
//!
//! Sizing knobs for pools and staging heaps, loaded once at startup from
//! TOML. Either field may be omitted; defaults match what the renderer
//! ships with.

use serde::{Deserialize, Serialize};

use crate::error::{DescriptorError, DescriptorResult};

/// Default slots per allocator page.
pub const DEFAULT_PAGE_SIZE: u32 = 256;

/// Default slots per shader-visible staging heap.
pub const DEFAULT_STAGING_SIZE: u32 = 1024;

/// Sizing configuration for descriptor allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorConfig {
    /// Slots per allocator page. Pages grow past this for oversized
    /// requests.
    pub page_size: u32,
    /// Slots per shader-visible staging heap. Bounds the total demand of
    /// any single root table layout.
    pub staging_size: u32,
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            staging_size: DEFAULT_STAGING_SIZE,
        }
    }
}

impl DescriptorConfig {
    /// Parses a TOML document, filling omitted fields with defaults.
    pub fn from_toml_str(text: &str) -> DescriptorResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| DescriptorError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects zero sizes.
    pub fn validate(&self) -> DescriptorResult<()> {
        if self.page_size == 0 {
            return Err(DescriptorError::InvalidConfig(
                "page_size must be non-zero".into(),
            ));
        }
        if self.staging_size == 0 {
            return Err(DescriptorError::InvalidConfig(
                "staging_size must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
