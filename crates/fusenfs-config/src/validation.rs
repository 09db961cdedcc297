use crate::target::RemoteTarget;
use crate::types::{MountConfig, MAX_POLL_TIMEOUT};
use crate::ConfigError;

impl MountConfig {
    /// Validate the configuration and return a list of errors.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        match self.target.as_deref() {
            None => errors.push(ConfigError::MissingTarget),
            Some(url) => {
                if let Err(e) = RemoteTarget::parse(url) {
                    errors.push(e);
                }
            }
        }

        match self.mountpoint.as_deref() {
            None => errors.push(ConfigError::MissingMountpoint),
            Some(path) if path.as_os_str().is_empty() => errors.push(ConfigError::MissingMountpoint),
            Some(_) => {}
        }

        if self.fuse.max_write == 0 {
            errors.push(ConfigError::InvalidConfig(
                "fuse.max_write must be greater than zero".to_string(),
            ));
        }

        if self.fuse.multithread && self.fuse.worker_threads == 0 {
            errors.push(ConfigError::InvalidConfig(
                "fuse.worker_threads must be greater than zero".to_string(),
            ));
        }

        let poll_timeout = self.drive.poll_timeout.as_duration();
        if poll_timeout.is_zero() || poll_timeout > MAX_POLL_TIMEOUT {
            errors.push(ConfigError::InvalidConfig(format!(
                "drive.poll_timeout must be between 1ms and {}s, got {}",
                MAX_POLL_TIMEOUT.as_secs(),
                self.drive.poll_timeout
            )));
        }

        if self.logging.level.trim().is_empty() {
            errors.push(ConfigError::InvalidConfig(
                "logging.level must not be empty".to_string(),
            ));
        }

        errors
    }

    /// Validate and return Ok(()) if valid, or Err with the first error.
    pub fn validate_or_err(&self) -> Result<(), ConfigError> {
        match self.validate().into_iter().next() {
            Some(first) => Err(first),
            None => Ok(()),
        }
    }
}
