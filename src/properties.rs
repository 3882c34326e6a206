//! Session property lists.
//!
//! Sessions are configured by an ordered list of typed key/value entries.
//! The list exists in two forms: a flat `i64` slice of `key, value` pairs
//! terminated by the `0` sentinel key (the wire-compatible form), and the
//! typed [`SessionProperties`] builder. Both are interpreted in order, so a
//! later duplicate key overrides an earlier one.

use serde::{Deserialize, Serialize};

use crate::error::PropertyError;

/// Sentinel key terminating a raw property list.
pub const PROPERTY_TERMINATOR: i64 = 0;

/// Raw keys accepted by [`SessionProperties::from_raw`].
pub mod keys {
    /// Encoder backend selection; value is an [`EncoderSelection`](super::EncoderSelection) discriminant.
    pub const ENCODER: i64 = 0x1001;
    /// Desktop capture toggle; value is 0 or 1.
    pub const DESKTOP: i64 = 0x1002;
    /// Desktop display id; value is a non-negative display index.
    pub const DESKTOP_DISPLAY: i64 = 0x1003;
    /// Mouse-data (cursor shape notification) toggle; value is 0 or 1.
    pub const MOUSE_DATA: i64 = 0x1004;
    /// Block desktop capture until the content changes; value is 0 or 1.
    pub const BLOCK_UNTIL_CHANGE: i64 = 0x1005;
    /// Flip captured frames vertically before encoding; value is 0 or 1.
    pub const FLIP_SOURCE: i64 = 0x1006;
}

/// Which encoder backend the session instantiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncoderSelection {
    /// The in-crate software backend: the converted frame is the bitstream.
    Identity,
    /// A hardware backend supplied by the execution context.
    Hardware,
}

/// Parsed, validated session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProperties {
    /// Encoder backend to instantiate on `create_encoder`.
    pub encoder: EncoderSelection,
    /// Capture the desktop (target index 0) instead of only client surfaces.
    pub desktop: bool,
    /// Which display to capture in desktop mode.
    pub desktop_display: u32,
    /// Enable the cursor shape notifier and its tracker thread.
    pub mouse_data: bool,
    /// Desktop captures wait (bounded) for the content to change.
    pub block_until_change: bool,
    /// Flip captured frames vertically before scaling and encoding.
    pub flip_source: bool,
}

impl Default for SessionProperties {
    fn default() -> Self {
        Self {
            encoder: EncoderSelection::Identity,
            desktop: false,
            desktop_display: 0,
            mouse_data: false,
            block_until_change: false,
            flip_source: false,
        }
    }
}

impl SessionProperties {
    /// Start building a property set from the defaults.
    pub fn builder() -> SessionPropertiesBuilder {
        SessionPropertiesBuilder {
            props: Self::default(),
        }
    }

    /// Parse a raw, sentinel-terminated `key, value` list.
    ///
    /// Entries are applied in order; a later duplicate key wins. The list
    /// must contain the [`PROPERTY_TERMINATOR`] key, and every key before it
    /// must be followed by a value.
    pub fn from_raw(list: &[i64]) -> Result<Self, PropertyError> {
        let mut props = Self::default();
        let mut i = 0;
        loop {
            let Some(&key) = list.get(i) else {
                return Err(PropertyError::MissingTerminator);
            };
            if key == PROPERTY_TERMINATOR {
                break;
            }
            let Some(&value) = list.get(i + 1) else {
                return Err(PropertyError::TruncatedPair);
            };
            props.apply(key, value)?;
            i += 2;
        }
        Ok(props)
    }

    fn apply(&mut self, key: i64, value: i64) -> Result<(), PropertyError> {
        match key {
            keys::ENCODER => {
                self.encoder = match value {
                    1 => EncoderSelection::Identity,
                    2 => EncoderSelection::Hardware,
                    _ => {
                        return Err(PropertyError::IllTyped {
                            key: "encoder",
                            expected: "1 (identity) or 2 (hardware)",
                        })
                    }
                };
            }
            keys::DESKTOP => self.desktop = parse_bool(value, "desktop")?,
            keys::DESKTOP_DISPLAY => {
                self.desktop_display = u32::try_from(value).map_err(|_| PropertyError::IllTyped {
                    key: "desktop_display",
                    expected: "a non-negative display index",
                })?;
            }
            keys::MOUSE_DATA => self.mouse_data = parse_bool(value, "mouse_data")?,
            keys::BLOCK_UNTIL_CHANGE => {
                self.block_until_change = parse_bool(value, "block_until_change")?;
            }
            keys::FLIP_SOURCE => self.flip_source = parse_bool(value, "flip_source")?,
            other => return Err(PropertyError::UnknownKey(other)),
        }
        Ok(())
    }
}

fn parse_bool(value: i64, key: &'static str) -> Result<bool, PropertyError> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(PropertyError::IllTyped {
            key,
            expected: "0 or 1",
        }),
    }
}

/// Builder for [`SessionProperties`].
#[derive(Debug, Clone)]
pub struct SessionPropertiesBuilder {
    props: SessionProperties,
}

impl SessionPropertiesBuilder {
    /// Select the encoder backend.
    pub fn encoder(mut self, encoder: EncoderSelection) -> Self {
        self.props.encoder = encoder;
        self
    }

    /// Enable or disable desktop capture.
    pub fn desktop(mut self, desktop: bool) -> Self {
        self.props.desktop = desktop;
        self
    }

    /// Pick the desktop display to capture.
    pub fn desktop_display(mut self, display: u32) -> Self {
        self.props.desktop_display = display;
        self
    }

    /// Enable the cursor shape notifier.
    pub fn mouse_data(mut self, enabled: bool) -> Self {
        self.props.mouse_data = enabled;
        self
    }

    /// Make desktop captures wait (bounded) for a content change.
    pub fn block_until_change(mut self, enabled: bool) -> Self {
        self.props.block_until_change = enabled;
        self
    }

    /// Flip captured frames vertically before encoding.
    pub fn flip_source(mut self, enabled: bool) -> Self {
        self.props.flip_source = enabled;
        self
    }

    /// Finish building.
    pub fn build(self) -> SessionProperties {
        self.props
    }
}
