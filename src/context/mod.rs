//! Execution-context and surface capability traits.
//!
//! The GPU driver stack is a collaborator, not part of this crate: sessions
//! talk to it through [`ExecutionContext`] (desktop capture, scaling,
//! cursor state, hardware-encoder acquisition) and [`RenderSurface`] (a
//! client-owned surface the registry references without owning).
//!
//! Two implementations ship in-crate: [`software::SoftwareContext`], a
//! CPU reference context usable everywhere, and (on Windows)
//! [`windows::GdiContext`], which captures the real desktop and cursor
//! through GDI.

pub mod software;

#[cfg(windows)]
pub mod windows;

use std::sync::Arc;

use crate::encoder::EncoderBackend;
use crate::error::{CaptureError, ContextError};
use crate::frame::{PixelFrame, BYTES_PER_PIXEL};

/// A cursor shape bitmap with its hotspot.
#[derive(Debug, Clone)]
pub struct CursorShape {
    /// Shape width in pixels.
    pub width: u32,
    /// Shape height in pixels.
    pub height: u32,
    /// Hotspot X offset within the shape.
    pub hotspot_x: i32,
    /// Hotspot Y offset within the shape.
    pub hotspot_y: i32,
    /// BGRA shape pixels; shared so snapshots stay cheap.
    pub bgra: Arc<Vec<u8>>,
}

/// One observation of the cursor.
#[derive(Debug, Clone)]
pub struct CursorSnapshot {
    /// Screen X position.
    pub x: i32,
    /// Screen Y position.
    pub y: i32,
    /// Whether the cursor is currently shown.
    pub visible: bool,
    /// Identity of the current shape; a new value means the shape changed.
    pub shape_id: u64,
    /// The shape bitmap, when the context can provide one.
    pub shape: Option<CursorShape>,
}

/// A client-owned GPU surface eligible for capture.
///
/// The session only ever holds a `Weak` reference to a surface; when the
/// owner drops it, the corresponding render target turns invalid at the
/// next encode call.
pub trait RenderSurface: Send + Sync {
    /// Current surface dimensions.
    fn dimensions(&self) -> (u32, u32);

    /// Read the surface contents into a BGRA frame.
    fn snapshot(&self) -> Result<PixelFrame, CaptureError>;
}

/// The GPU execution context a session owns exclusively.
pub trait ExecutionContext: Send + Sync {
    /// Short context name for logging.
    fn name(&self) -> &'static str;

    /// Whether `display` names an attached desktop display.
    fn has_display(&self, display: u32) -> bool;

    /// Dimensions of the given display.
    fn display_dimensions(&self, display: u32) -> (u32, u32);

    /// Capture the desktop of `display`.
    ///
    /// With `block_until_change` the context may wait — bounded, never
    /// indefinitely — for the content to change before returning.
    fn capture_desktop(
        &self,
        display: u32,
        block_until_change: bool,
    ) -> Result<PixelFrame, CaptureError>;

    /// Scale a frame to exactly fill `width` x `height`.
    ///
    /// The default is CPU bilinear resampling; GPU contexts override this
    /// with their own conversion kernels.
    fn scale_convert(
        &self,
        frame: PixelFrame,
        width: u32,
        height: u32,
    ) -> Result<PixelFrame, CaptureError> {
        scale_bilinear(frame, width, height)
    }

    /// The current cursor state, if this context tracks one.
    fn cursor_state(&self) -> Option<CursorSnapshot>;

    /// Instantiate a hardware encoder bound to this context.
    fn create_hardware_encoder(
        &self,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn EncoderBackend>, ContextError>;
}

/// Bilinear scale to exactly fill the target size; no letterboxing.
///
/// Resampling is per-channel, so BGRA data passes through the RGBA-typed
/// image buffer unchanged.
pub(crate) fn scale_bilinear(
    frame: PixelFrame,
    width: u32,
    height: u32,
) -> Result<PixelFrame, CaptureError> {
    if (frame.width(), frame.height()) == (width, height) {
        return Ok(frame);
    }

    let (src_w, src_h) = (frame.width(), frame.height());
    let image: image::RgbaImage = image::ImageBuffer::from_raw(src_w, src_h, frame.into_data())
        .ok_or_else(|| CaptureError::Backend("pixel buffer does not match dimensions".into()))?;

    let resized = image::imageops::resize(&image, width, height, image::imageops::FilterType::Triangle);
    debug_assert_eq!(
        resized.as_raw().len(),
        width as usize * height as usize * BYTES_PER_PIXEL
    );

    Ok(PixelFrame::new(width, height, resized.into_raw()))
}

/// The platform's default execution context.
///
/// Windows builds get the GDI desktop context; other platforms have no
/// default and callers must inject one through
/// [`Session::create_with_context`](crate::session::Session::create_with_context).
pub fn default_context() -> Result<Arc<dyn ExecutionContext>, ContextError> {
    #[cfg(windows)]
    {
        Ok(Arc::new(windows::GdiContext::new()?))
    }
    #[cfg(not(windows))]
    {
        Err(ContextError::Unavailable)
    }
}
