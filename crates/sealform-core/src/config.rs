use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{SealformError, SealformResult};

/// Top-level configuration (loaded from sealform.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SealformConfig {
    pub log: LogConfig,
    pub envelope: EnvelopeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

/// Envelope cost and framing parameters.
///
/// The credential-derivation fields must match across every client that
/// signs a given user in, otherwise the synthetic credential diverges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    /// Argon2id memory cost for credential derivation in KiB (default: 512)
    pub argon2_mem_cost_kib: u32,
    /// Lowest password-dependent iteration count (default: 1100)
    pub iteration_floor: u32,
    /// Number of distinct iteration counts above the floor (default: 301)
    pub iteration_span: u32,
    /// Divisor applied to the iteration count for secondary wraps (default: 9)
    pub secondary_wrap_divisor: u32,
    /// Argon2id memory cost for cascade sub-key stretching in KiB (default: 512)
    pub stretch_mem_cost_kib: u32,
    /// Work factor for cascade encryption under a KEM session key (default: 1)
    pub response_iterations: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            argon2_mem_cost_kib: 512,
            iteration_floor: 1100,
            iteration_span: 301,
            secondary_wrap_divisor: 9,
            stretch_mem_cost_kib: 512,
            response_iterations: 1,
        }
    }
}

impl EnvelopeConfig {
    /// Reject values the primitives cannot work with.
    pub fn validate(&self) -> SealformResult<()> {
        if self.iteration_span == 0 {
            return Err(SealformError::Config("iteration_span must be at least 1".into()));
        }
        if self.iteration_floor == 0 {
            return Err(SealformError::Config("iteration_floor must be at least 1".into()));
        }
        if self.iteration_floor.checked_add(self.iteration_span - 1).is_none() {
            return Err(SealformError::Config(format!(
                "iteration_floor + iteration_span - 1 must fit in u32 (floor {}, span {})",
                self.iteration_floor, self.iteration_span
            )));
        }
        if self.secondary_wrap_divisor == 0 || self.secondary_wrap_divisor > self.iteration_floor {
            return Err(SealformError::Config(format!(
                "secondary_wrap_divisor must be in 1..={}",
                self.iteration_floor
            )));
        }
        if self.response_iterations == 0 {
            return Err(SealformError::Config(
                "response_iterations must be at least 1".into(),
            ));
        }
        // Argon2 needs at least 8 KiB per lane; both runs use a single lane.
        if self.argon2_mem_cost_kib < 8 || self.stretch_mem_cost_kib < 8 {
            return Err(SealformError::Config(
                "Argon2id memory costs must be at least 8 KiB".into(),
            ));
        }
        Ok(())
    }
}

impl SealformConfig {
    /// Load and validate a TOML config file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &Path) -> SealformResult<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<Self>(&content)
                .map_err(|e| SealformError::Config(format!("parsing {}: {e}", path.display())))?
        } else {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            Self::default()
        };
        config.envelope.validate()?;
        Ok(config)
    }
}
