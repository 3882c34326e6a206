//! Encoder parameters, presets, and the backend capability trait.
//!
//! The codec itself is a black box behind [`EncoderBackend`]: it receives a
//! converted frame plus the current parameter set and returns a bitstream.
//! Rate control, motion estimation, and similar internals are the backend's
//! business; this module only models the knobs and the submission surface.

pub mod identity;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::PixelFrame;

/// A tunable encoder parameter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ParamKey {
    /// Target bitrate in kbps.
    BitrateKbps,
    /// Maximum output frame rate.
    MaxFps,
    /// Distance between forced keyframes, in frames.
    IdrPeriod,
    /// Minimum quantization parameter (0-51, lower = better quality).
    QpMin,
    /// Maximum quantization parameter (0-51).
    QpMax,
    /// Allow the backend to skip frames for rate control.
    SkipFrame,
    /// Force keyframes until cleared.
    ForceIdr,
}

/// A typed parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamValue {
    /// An unsigned integer knob.
    UInt(u64),
    /// A boolean toggle.
    Bool(bool),
}

impl ParamValue {
    /// The integer payload, if this is a `UInt`.
    pub fn as_uint(self) -> Option<u64> {
        match self {
            ParamValue::UInt(v) => Some(v),
            ParamValue::Bool(_) => None,
        }
    }

    /// The boolean payload, if this is a `Bool`.
    pub fn as_bool(self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(v),
            ParamValue::UInt(_) => None,
        }
    }
}

/// Validate a value against its parameter's domain.
///
/// Returns a human-readable reason on rejection.
pub(crate) fn validate_parameter(key: ParamKey, value: ParamValue) -> Result<(), String> {
    match key {
        ParamKey::BitrateKbps => match value.as_uint() {
            Some(v) if v > 0 => Ok(()),
            Some(_) => Err("bitrate must be at least 1 kbps".into()),
            None => Err("expected an unsigned integer".into()),
        },
        ParamKey::MaxFps => match value.as_uint() {
            Some(v) if (1..=240).contains(&v) => Ok(()),
            Some(_) => Err("frame rate must be between 1 and 240".into()),
            None => Err("expected an unsigned integer".into()),
        },
        ParamKey::IdrPeriod => match value.as_uint() {
            Some(v) if v > 0 => Ok(()),
            Some(_) => Err("IDR period must be at least 1 frame".into()),
            None => Err("expected an unsigned integer".into()),
        },
        ParamKey::QpMin | ParamKey::QpMax => match value.as_uint() {
            Some(v) if v <= 51 => Ok(()),
            Some(_) => Err("QP must be between 0 and 51".into()),
            None => Err("expected an unsigned integer".into()),
        },
        ParamKey::SkipFrame | ParamKey::ForceIdr => match value {
            ParamValue::Bool(_) => Ok(()),
            ParamValue::UInt(_) => Err("expected a boolean".into()),
        },
    }
}

fn default_value(key: ParamKey) -> ParamValue {
    match key {
        ParamKey::BitrateKbps => ParamValue::UInt(10_000),
        ParamKey::MaxFps => ParamValue::UInt(30),
        ParamKey::IdrPeriod => ParamValue::UInt(60),
        ParamKey::QpMin => ParamValue::UInt(22),
        ParamKey::QpMax => ParamValue::UInt(46),
        ParamKey::SkipFrame => ParamValue::Bool(true),
        ParamKey::ForceIdr => ParamValue::Bool(false),
    }
}

/// An ordered set of encoder parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSet {
    values: BTreeMap<ParamKey, ParamValue>,
}

impl ParameterSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// A set carrying the default value for every key in `supported`.
    pub fn defaults_for(supported: &[ParamKey]) -> Self {
        let mut set = Self::new();
        for &key in supported {
            set.values.insert(key, default_value(key));
        }
        set
    }

    /// Insert or replace a value.
    pub fn set(&mut self, key: ParamKey, value: ParamValue) -> &mut Self {
        self.values.insert(key, value);
        self
    }

    /// Look up a value.
    pub fn get(&self, key: ParamKey) -> Option<ParamValue> {
        self.values.get(&key).copied()
    }

    /// Iterate over the entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (ParamKey, ParamValue)> + '_ {
        self.values.iter().map(|(&k, &v)| (k, v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no entry is present.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overlay `other` onto `self`, keeping only keys listed in `supported`.
    ///
    /// Presets are advisory bundles; keys the backend cannot honor are
    /// silently dropped here, while explicitly supplied parameters go
    /// through the strict validation path instead.
    pub(crate) fn merge_supported(&mut self, other: &ParameterSet, supported: &[ParamKey]) {
        for (key, value) in other.iter() {
            if supported.contains(&key) {
                self.values.insert(key, value);
            }
        }
    }
}

/// A named bundle of parameters balancing latency, quality, and bitrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Preset {
    /// Lowest latency: aggressive rate control, frequent skipping allowed.
    Fast,
    /// Reasonable quality at interactive latency.
    Balanced,
    /// Highest quality; latency is secondary.
    Quality,
}

impl Preset {
    /// The parameter bundle for this preset.
    pub fn parameters(self) -> ParameterSet {
        let mut set = ParameterSet::new();
        match self {
            Preset::Fast => {
                set.set(ParamKey::BitrateKbps, ParamValue::UInt(6_000))
                    .set(ParamKey::MaxFps, ParamValue::UInt(60))
                    .set(ParamKey::IdrPeriod, ParamValue::UInt(120))
                    .set(ParamKey::QpMin, ParamValue::UInt(24))
                    .set(ParamKey::QpMax, ParamValue::UInt(48))
                    .set(ParamKey::SkipFrame, ParamValue::Bool(true));
            }
            Preset::Balanced => {
                set.set(ParamKey::BitrateKbps, ParamValue::UInt(10_000))
                    .set(ParamKey::MaxFps, ParamValue::UInt(30))
                    .set(ParamKey::IdrPeriod, ParamValue::UInt(60))
                    .set(ParamKey::QpMin, ParamValue::UInt(20))
                    .set(ParamKey::QpMax, ParamValue::UInt(44))
                    .set(ParamKey::SkipFrame, ParamValue::Bool(true));
            }
            Preset::Quality => {
                set.set(ParamKey::BitrateKbps, ParamValue::UInt(20_000))
                    .set(ParamKey::MaxFps, ParamValue::UInt(30))
                    .set(ParamKey::IdrPeriod, ParamValue::UInt(30))
                    .set(ParamKey::QpMin, ParamValue::UInt(16))
                    .set(ParamKey::QpMax, ParamValue::UInt(38))
                    .set(ParamKey::SkipFrame, ParamValue::Bool(false));
            }
        }
        set
    }
}

/// How [`Session::create_encoder`](crate::session::Session::create_encoder)
/// is configured: a preset bundle or an explicit parameter set.
#[derive(Debug, Clone)]
pub enum EncoderSetup {
    /// Apply a preset bundle (unsupported keys are dropped).
    Preset(Preset),
    /// Apply explicit parameters (unsupported keys are an error).
    Parameters(ParameterSet),
}

/// Resolved encoder configuration handed to the pipeline.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Output width.
    pub width: u32,
    /// Output height.
    pub height: u32,
    /// Full parameter set (defaults overlaid with the setup's values).
    pub params: ParameterSet,
}

/// Output of one backend encode call.
#[derive(Debug)]
pub struct EncodedPayload {
    /// The compressed bytes.
    pub bitstream: Vec<u8>,
    /// Whether this frame is a keyframe.
    pub keyframe: bool,
}

/// Error from a backend encode call.
#[derive(Debug, Error)]
pub enum EncodeBackendError {
    /// The backend failed to produce a bitstream for this frame.
    #[error("encode failed: {0}")]
    Failed(String),
}

/// Error from an in-place backend reconfiguration.
#[derive(Debug, Error)]
pub enum ReconfigureError {
    /// The backend cannot change resolution without being recreated.
    #[error("in-place reconfiguration unsupported: {0}")]
    Unsupported(String),
    /// The backend accepted the request but failed to apply it.
    #[error("reconfiguration failed: {0}")]
    Failed(String),
}

/// A black-box codec.
///
/// Backends run on the pipeline's worker thread; `encode` may block for the
/// duration of one frame. Implementations report which parameters they can
/// honor; the session validates get/set calls against that list.
pub trait EncoderBackend: Send {
    /// Short backend name for logging.
    fn name(&self) -> &'static str;

    /// The parameters this backend honors.
    fn supported_parameters(&self) -> &[ParamKey];

    /// Compress one frame using the current parameter values.
    fn encode(
        &mut self,
        frame: &PixelFrame,
        params: &ParameterSet,
    ) -> Result<EncodedPayload, EncodeBackendError>;

    /// Change the output resolution without recreating the backend.
    fn reconfigure(&mut self, width: u32, height: u32) -> Result<(), ReconfigureError>;
}
