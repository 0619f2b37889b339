//! Configuration for the client runtime.

use std::time::Duration;

use stackless_protocol::frame::DEFAULT_MAX_FRAME_LEN;

/// Client-wide settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Emit detailed merge diagnostics, such as why a delta was rejected.
    pub verbose_logging: bool,
    /// Trace every request sent and response received.
    pub message_tracing: bool,
    /// Prefix for server console output re-emitted locally.
    pub debug_log_header: String,
    /// Give up on a pending request after this long.
    pub request_timeout: Option<Duration>,
    /// Largest inbound payload accepted before the connection is faulted.
    pub max_frame_len: u32,
}

impl ClientConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            verbose_logging: true,
            message_tracing: true,
            debug_log_header: "[stackless]".to_string(),
            request_timeout: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Enables or disables verbose merge diagnostics.
    pub fn with_verbose_logging(mut self, enabled: bool) -> Self {
        self.verbose_logging = enabled;
        self
    }

    /// Enables or disables request tracing.
    pub fn with_message_tracing(mut self, enabled: bool) -> Self {
        self.message_tracing = enabled;
        self
    }

    /// Sets the console output prefix.
    pub fn with_debug_log_header(mut self, header: impl Into<String>) -> Self {
        self.debug_log_header = header.into();
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the inbound frame size limit.
    pub fn with_max_frame_len(mut self, max: u32) -> Self {
        self.max_frame_len = max;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert!(config.verbose_logging);
        assert!(config.message_tracing);
        assert_eq!(config.debug_log_header, "[stackless]");
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.max_frame_len, DEFAULT_MAX_FRAME_LEN);
    }

    #[test]
    fn builder() {
        let config = ClientConfig::new()
            .with_verbose_logging(false)
            .with_message_tracing(false)
            .with_debug_log_header("[app]")
            .with_request_timeout(Duration::from_secs(5))
            .with_max_frame_len(1024);

        assert!(!config.verbose_logging);
        assert!(!config.message_tracing);
        assert_eq!(config.debug_log_header, "[app]");
        assert_eq!(config.request_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.max_frame_len, 1024);
    }
}
