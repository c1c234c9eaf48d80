//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Engine configuration
//!
//! # Example
//!
//! ```
//! use muxio::ManagerConfig;
//! use std::time::Duration;
//!
//! let config = ManagerConfig::new("backend")
//!     .with_io_threads(4)
//!     .with_buffer_sizes(4096, 1 << 20)
//!     .with_select_timeout(Duration::from_millis(250));
//! assert!(config.validate().is_ok());
//! ```

use crate::error::{MuxError, Result};
use std::time::Duration;

/// Configuration for a [`ConnectionManager`](crate::ConnectionManager)
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Manager name, used for thread names and log context
    pub name: String,

    /// Listening-socket backlog
    pub backlog: u32,

    /// Number of I/O threads (at least 1)
    pub io_threads: usize,

    /// Initial read-buffer capacity per connection
    pub minimum_buffer_size: usize,

    /// Read-buffer growth bound; caps per-pass intake
    pub maximum_buffer_size: usize,

    /// Selector loop tick period
    pub select_timeout: Duration,

    /// Deferred-write reservoir size at which backpressure is signalled
    pub write_high_water_mark: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            name: "muxio".to_string(),
            backlog: 128,
            io_threads: 2,
            minimum_buffer_size: 4096,
            maximum_buffer_size: 1 << 20,
            select_timeout: Duration::from_millis(100),
            write_high_water_mark: 8 << 20,
        }
    }
}

impl ManagerConfig {
    /// Create a configuration with the given manager name and defaults
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the listening-socket backlog
    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Set the I/O thread pool size
    pub fn with_io_threads(mut self, io_threads: usize) -> Self {
        self.io_threads = io_threads;
        self
    }

    /// Set the read-buffer bounds
    pub fn with_buffer_sizes(mut self, minimum: usize, maximum: usize) -> Self {
        self.minimum_buffer_size = minimum;
        self.maximum_buffer_size = maximum;
        self
    }

    /// Set the selector loop tick period
    pub fn with_select_timeout(mut self, timeout: Duration) -> Self {
        self.select_timeout = timeout;
        self
    }

    /// Set the deferred-write high-water mark
    pub fn with_write_high_water_mark(mut self, mark: usize) -> Self {
        self.write_high_water_mark = mark;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.io_threads == 0 {
            return Err(MuxError::InvalidConfig(
                "io_threads must be at least 1".to_string(),
            ));
        }
        if self.minimum_buffer_size == 0 {
            return Err(MuxError::InvalidConfig(
                "minimum_buffer_size must be nonzero".to_string(),
            ));
        }
        if self.minimum_buffer_size > self.maximum_buffer_size {
            return Err(MuxError::InvalidConfig(format!(
                "minimum_buffer_size {} exceeds maximum_buffer_size {}",
                self.minimum_buffer_size, self.maximum_buffer_size
            )));
        }
        if self.write_high_water_mark < self.maximum_buffer_size {
            return Err(MuxError::InvalidConfig(format!(
                "write_high_water_mark {} is below maximum_buffer_size {}",
                self.write_high_water_mark, self.maximum_buffer_size
            )));
        }
        if self.select_timeout.is_zero() {
            return Err(MuxError::InvalidConfig(
                "select_timeout must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ManagerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = ManagerConfig::new("test")
            .with_backlog(64)
            .with_io_threads(3)
            .with_buffer_sizes(512, 8192)
            .with_write_high_water_mark(1 << 16)
            .with_select_timeout(Duration::from_millis(10));

        assert_eq!(config.name, "test");
        assert_eq!(config.backlog, 64);
        assert_eq!(config.io_threads, 3);
        assert_eq!(config.minimum_buffer_size, 512);
        assert_eq!(config.maximum_buffer_size, 8192);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_io_threads() {
        let config = ManagerConfig::default().with_io_threads(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_buffer_bounds() {
        let config = ManagerConfig::default().with_buffer_sizes(8192, 4096);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_low_high_water_mark() {
        let config = ManagerConfig::default()
            .with_buffer_sizes(4096, 1 << 20)
            .with_write_high_water_mark(1024);
        assert!(config.validate().is_err());
    }
}
