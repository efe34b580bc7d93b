// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use crate::config::{ConfigError, HalConfig};
use crate::imp::Backend;
use std::sync::Arc;

/// The device plus the configuration everything is sized from.
///
/// Created once and passed by reference into every component constructor.  Cloning is cheap and
/// shares the same device.
#[derive(Debug)]
pub struct Context<B: Backend> {
    backend: Arc<B>,
    config: HalConfig,
}

impl<B: Backend> Clone for Context<B> {
    fn clone(&self) -> Self {
        Context {
            backend: self.backend.clone(),
            config: self.config.clone(),
        }
    }
}

impl<B: Backend> Context<B> {
    pub fn new(backend: B, config: HalConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        logwise::info_sync!(
            "Context on {backend} backend, {frames} frames in flight",
            backend = B::NAME,
            frames = config.frames_in_flight
        );
        Ok(Context {
            backend: Arc::new(backend),
            config,
        })
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn config(&self) -> &HalConfig {
        &self.config
    }

    pub fn frames_in_flight(&self) -> u32 {
        self.config.frames_in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imp::SoftBackend;

    #[test]
    fn rejects_invalid_config() {
        let config = HalConfig {
            frames_in_flight: 0,
            ..HalConfig::default()
        };
        assert_eq!(
            Context::new(SoftBackend::new(), config).unwrap_err(),
            ConfigError::NoFramesInFlight
        );
        let context = Context::new(SoftBackend::new(), HalConfig::default()).unwrap();
        let clone = context.clone();
        assert!(Arc::ptr_eq(context.backend(), clone.backend()));
        assert_eq!(clone.frames_in_flight(), 3);
    }
}
