//! # framecast
//!
//! Session-based render-target capture and low-latency video encoding.
//!
//! A [`Session`] owns one GPU execution context, a registry of render
//! targets, an encode pipeline, and a cursor-shape notifier:
//!
//! ```text
//! Session
//!   ├─> ExecutionContext (desktop capture, scaling, cursor, HW codecs)
//!   ├─> TargetRegistry   (stable indices over client surfaces)
//!   ├─> EncodePipeline   (bounded submission queue → encode worker)
//!   └─> MouseNotifier    (blocking shape-change waits, cancellable)
//! ```
//!
//! The typical flow: create a session from a property list, create an
//! encoder, register render targets (desktop sessions expose the desktop
//! as target 0), call [`Session::encode_frame`] per frame, and poll
//! [`Session::encoded_frame`] for the bitstream. Threads interested in
//! cursor overlays block in [`MouseWatcher::mouse_data`] and are released
//! on teardown.
//!
//! ```no_run
//! use framecast::{EncoderSetup, FramePoll, Preset, Session, SessionProperties};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let props = SessionProperties::builder().desktop(true).build();
//! let session = Session::create(props)?;
//! session.create_encoder(1920, 1080, EncoderSetup::Preset(Preset::Balanced))?;
//!
//! session.encode_frame(0)?;
//! if let FramePoll::Ready(frame) = session.encoded_frame()? {
//!     // hand frame.bitstream to the consumer
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod context;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod mouse;
pub mod pipeline;
pub mod properties;
pub mod registry;
pub mod session;

pub use context::{CursorShape, CursorSnapshot, ExecutionContext, RenderSurface};
pub use encoder::{
    EncoderBackend, EncoderSetup, ParamKey, ParamValue, ParameterSet, Preset,
};
pub use frame::{EncodedFrame, FramePoll, PixelFrame, SourceFrame};
pub use mouse::{MouseData, MouseWatcher, Notification};
pub use pipeline::{PipelineStage, PIPELINE_DEPTH};
pub use properties::{EncoderSelection, SessionProperties, PROPERTY_TERMINATOR};
pub use registry::{RenderTargetState, MAX_RENDER_TARGETS};
pub use session::Session;
