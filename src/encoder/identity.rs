//! The identity encoder: a software backend whose bitstream is the frame.
//!
//! Useful for diagnostics, pass-through pipelines, and environments without
//! a hardware codec. Each output frame is a small self-describing header
//! followed by the raw BGRA pixels, and every frame is a keyframe.

use tracing::debug;

use super::{
    EncodeBackendError, EncodedPayload, EncoderBackend, ParamKey, ParameterSet, ReconfigureError,
};
use crate::frame::PixelFrame;

/// Magic bytes opening every identity-encoded frame.
pub const IDENTITY_MAGIC: [u8; 4] = *b"FCI0";

/// Header length in bytes: magic, width, height, frame index.
pub const IDENTITY_HEADER_LEN: usize = 4 + 4 + 4 + 8;

const SUPPORTED: &[ParamKey] = &[ParamKey::MaxFps, ParamKey::SkipFrame, ParamKey::ForceIdr];

/// Software passthrough backend.
pub struct IdentityEncoder {
    width: u32,
    height: u32,
    frames_encoded: u64,
}

impl IdentityEncoder {
    /// Create a backend for the given output resolution.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frames_encoded: 0,
        }
    }
}

impl EncoderBackend for IdentityEncoder {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn supported_parameters(&self) -> &[ParamKey] {
        SUPPORTED
    }

    fn encode(
        &mut self,
        frame: &PixelFrame,
        _params: &ParameterSet,
    ) -> Result<EncodedPayload, EncodeBackendError> {
        if (frame.width(), frame.height()) != (self.width, self.height) {
            return Err(EncodeBackendError::Failed(format!(
                "frame is {}x{} but the encoder is configured for {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }

        let mut bitstream = Vec::with_capacity(IDENTITY_HEADER_LEN + frame.data().len());
        bitstream.extend_from_slice(&IDENTITY_MAGIC);
        bitstream.extend_from_slice(&self.width.to_le_bytes());
        bitstream.extend_from_slice(&self.height.to_le_bytes());
        bitstream.extend_from_slice(&self.frames_encoded.to_le_bytes());
        bitstream.extend_from_slice(frame.data());

        self.frames_encoded += 1;

        Ok(EncodedPayload {
            bitstream,
            keyframe: true,
        })
    }

    fn reconfigure(&mut self, width: u32, height: u32) -> Result<(), ReconfigureError> {
        debug!(
            from_width = self.width,
            from_height = self.height,
            to_width = width,
            to_height = height,
            "identity encoder reconfigured"
        );
        self.width = width;
        self.height = height;
        Ok(())
    }
}
