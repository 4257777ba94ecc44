//! # Engine Configuration
//!
//! Tunables for the transfer engine. Every field has a working default;
//! hosts override what they need with the `with_*` builders.

use core::time::Duration;

use crate::error::{Error, Result};

// =============================================================================
// CHUNK FLOOR POLICY
// =============================================================================

/// How a cyclic chunk smaller than one hardware burst is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkFloor {
    /// Use the chunk as requested
    Exact,
    /// Round the chunk up to one full burst (capped at the buffer length)
    #[default]
    OneBurst,
}

impl ChunkFloor {
    /// Apply the policy
    ///
    /// All quantities are in words.
    pub const fn apply(self, chunk: usize, burst: usize, total: usize) -> usize {
        match self {
            ChunkFloor::Exact => chunk,
            ChunkFloor::OneBurst => {
                let floored = if chunk < burst { burst } else { chunk };
                if floored > total {
                    total
                } else {
                    floored
                }
            },
        }
    }
}

// =============================================================================
// ENGINE CONFIG
// =============================================================================

/// Default completion timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default completion timeout when a transform engine is present
pub const DEFAULT_TRANSFORM_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default number of pages requested per pinning call
pub const DEFAULT_PIN_BATCH: usize = 512;

/// Default locked-memory allowance in pages (256 MiB of 4 KiB pages)
pub const DEFAULT_LOCKED_PAGES: usize = 65536;

/// Transfer engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Completion timeout for plain streaming endpoints
    pub timeout: Duration,
    /// Completion timeout when a transform engine endpoint was discovered
    pub transform_timeout: Duration,
    /// Upper bound on pages per pinning call
    pub pin_batch_pages: usize,
    /// Locked-memory allowance shared by every bound buffer
    pub locked_page_limit: usize,
    /// Override the endpoint's burst size (bytes)
    pub max_burst_bytes: Option<usize>,
    /// Cyclic chunk floor policy
    pub chunk_floor: ChunkFloor,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            transform_timeout: DEFAULT_TRANSFORM_TIMEOUT,
            pin_batch_pages: DEFAULT_PIN_BATCH,
            locked_page_limit: DEFAULT_LOCKED_PAGES,
            max_burst_bytes: None,
            chunk_floor: ChunkFloor::default(),
        }
    }
}

impl EngineConfig {
    /// Set the plain completion timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the transform-engine completion timeout
    pub fn with_transform_timeout(mut self, timeout: Duration) -> Self {
        self.transform_timeout = timeout;
        self
    }

    /// Set the pinning batch size
    pub fn with_pin_batch(mut self, pages: usize) -> Self {
        self.pin_batch_pages = pages;
        self
    }

    /// Set the locked-memory allowance
    pub fn with_locked_page_limit(mut self, pages: usize) -> Self {
        self.locked_page_limit = pages;
        self
    }

    /// Override the burst size
    pub fn with_max_burst(mut self, bytes: usize) -> Self {
        self.max_burst_bytes = Some(bytes);
        self
    }

    /// Set the chunk floor policy
    pub fn with_chunk_floor(mut self, floor: ChunkFloor) -> Self {
        self.chunk_floor = floor;
        self
    }

    /// Default timeout given what the directory found
    pub fn default_timeout(&self, has_transform_engine: bool) -> Duration {
        if has_transform_engine {
            self.transform_timeout
        } else {
            self.timeout
        }
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.pin_batch_pages == 0 || self.timeout.is_zero() || self.transform_timeout.is_zero()
        {
            return Err(Error::Config);
        }
        if matches!(self.max_burst_bytes, Some(0)) {
            return Err(Error::Config);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_timeout(false), DEFAULT_TIMEOUT);
        assert_eq!(config.default_timeout(true), DEFAULT_TRANSFORM_TIMEOUT);
    }

    #[test]
    fn test_invalid_configs() {
        assert_eq!(
            EngineConfig::default().with_pin_batch(0).validate(),
            Err(Error::Config)
        );
        assert_eq!(
            EngineConfig::default().with_timeout(Duration::ZERO).validate(),
            Err(Error::Config)
        );
        assert_eq!(
            EngineConfig::default().with_max_burst(0).validate(),
            Err(Error::Config)
        );
    }

    #[test]
    fn test_chunk_floor() {
        assert_eq!(ChunkFloor::Exact.apply(16, 256, 4096), 16);
        assert_eq!(ChunkFloor::OneBurst.apply(16, 256, 4096), 256);
        assert_eq!(ChunkFloor::OneBurst.apply(512, 256, 4096), 512);
        assert_eq!(ChunkFloor::OneBurst.apply(16, 256, 128), 128);
    }
}
