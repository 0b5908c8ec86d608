//! Configuration for the standard layer arrangement.

use serlink_frame::FrameConfig;
use serlink_transport::ByteStream;

use crate::arq::{ArqConfig, ArqLayer};
use crate::detection::ErrorDetectionLayer;
use crate::framing::FramingLayer;
use crate::layer::StackBuilder;

/// Settings for every layer below the application.
#[derive(Debug, Clone, Default)]
pub struct StackConfig {
    pub frame: FrameConfig,
    pub arq: ArqConfig,
}

impl StackBuilder {
    /// Add ARQ, error detection and framing over `stream`, in that order.
    pub fn reliable<S>(self, stream: S, config: &StackConfig) -> Self
    where
        S: ByteStream + 'static,
    {
        self.layer(ArqLayer::new(config.arq.clone()))
            .checked(stream, &config.frame)
    }

    /// Add error detection and framing over `stream`, without ARQ.
    pub fn checked<S>(self, stream: S, config: &FrameConfig) -> Self
    where
        S: ByteStream + 'static,
    {
        self.layer(ErrorDetectionLayer::new())
            .layer(FramingLayer::with_config(stream, config.clone()))
    }
}
