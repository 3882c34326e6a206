//! CPU reference implementation of the execution context.
//!
//! The software context models one virtual display: embedders present
//! frames into it, and desktop captures read the latest one back out. The
//! cursor is injectable the same way. It carries no hardware codec of its
//! own, but a factory can be attached for stacks that bring one.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use super::{CursorSnapshot, ExecutionContext};
use crate::encoder::EncoderBackend;
use crate::error::{CaptureError, ContextError};
use crate::frame::PixelFrame;

/// Upper bound on a block-until-change desktop capture.
///
/// Desktop capture must stay a bounded operation; when nothing is
/// presented within this budget the current frame is returned as-is.
pub const PRESENT_WAIT_BUDGET: Duration = Duration::from_millis(100);

type HardwareFactory =
    Box<dyn Fn(u32, u32) -> Result<Box<dyn EncoderBackend>, String> + Send + Sync>;

struct VirtualDisplay {
    frame: PixelFrame,
    generation: u64,
}

/// A software execution context with one virtual display.
pub struct SoftwareContext {
    display: Mutex<VirtualDisplay>,
    present_cond: Condvar,
    cursor: Mutex<Option<CursorSnapshot>>,
    hardware: Option<HardwareFactory>,
}

impl SoftwareContext {
    /// Create a context whose virtual display has the given size.
    ///
    /// The display starts out as a dark solid frame until something is
    /// presented.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            display: Mutex::new(VirtualDisplay {
                frame: PixelFrame::solid(width, height, [16, 16, 16, 255]),
                generation: 0,
            }),
            present_cond: Condvar::new(),
            cursor: Mutex::new(None),
            hardware: None,
        }
    }

    /// Attach a hardware-encoder factory.
    pub fn with_hardware_encoder<F>(mut self, factory: F) -> Self
    where
        F: Fn(u32, u32) -> Result<Box<dyn EncoderBackend>, String> + Send + Sync + 'static,
    {
        self.hardware = Some(Box::new(factory));
        self
    }

    /// Present a new frame to the virtual display, waking any
    /// block-until-change capture.
    pub fn present(&self, frame: PixelFrame) {
        let mut display = self.display.lock();
        display.frame = frame;
        display.generation += 1;
        self.present_cond.notify_all();
    }

    /// Publish a new cursor observation.
    pub fn set_cursor(&self, snapshot: CursorSnapshot) {
        *self.cursor.lock() = Some(snapshot);
    }

    /// Number of frames presented so far.
    pub fn present_count(&self) -> u64 {
        self.display.lock().generation
    }
}

impl ExecutionContext for SoftwareContext {
    fn name(&self) -> &'static str {
        "software"
    }

    fn has_display(&self, display: u32) -> bool {
        display == 0
    }

    fn display_dimensions(&self, _display: u32) -> (u32, u32) {
        let display = self.display.lock();
        (display.frame.width(), display.frame.height())
    }

    fn capture_desktop(
        &self,
        display: u32,
        block_until_change: bool,
    ) -> Result<PixelFrame, CaptureError> {
        if display != 0 {
            return Err(CaptureError::Backend(format!("unknown display {display}")));
        }

        let mut guard = self.display.lock();
        if block_until_change {
            let seen = guard.generation;
            let deadline = Instant::now() + PRESENT_WAIT_BUDGET;
            while guard.generation == seen {
                if self
                    .present_cond
                    .wait_until(&mut guard, deadline)
                    .timed_out()
                {
                    debug!("no present within the wait budget, returning current frame");
                    break;
                }
            }
        }
        Ok(guard.frame.clone())
    }

    fn cursor_state(&self) -> Option<CursorSnapshot> {
        self.cursor.lock().clone()
    }

    fn create_hardware_encoder(
        &self,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn EncoderBackend>, ContextError> {
        match &self.hardware {
            Some(factory) => factory(width, height).map_err(ContextError::HardwareEncoder),
            None => Err(ContextError::HardwareEncoder(
                "no hardware codec is bound to the software context".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn capture_returns_latest_present() {
        let ctx = SoftwareContext::new(4, 4);
        ctx.present(PixelFrame::solid(4, 4, [9, 9, 9, 255]));
        let frame = ctx.capture_desktop(0, false).unwrap();
        assert_eq!(frame.data()[0], 9);
    }

    #[test]
    fn unknown_display_is_rejected() {
        let ctx = SoftwareContext::new(4, 4);
        assert!(ctx.capture_desktop(3, false).is_err());
        assert!(!ctx.has_display(3));
    }

    #[test]
    fn block_until_change_wakes_on_present() {
        let ctx = Arc::new(SoftwareContext::new(4, 4));

        let presenter = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                ctx.present(PixelFrame::solid(4, 4, [42, 42, 42, 255]));
            })
        };

        let frame = ctx.capture_desktop(0, true).unwrap();
        presenter.join().unwrap();
        assert_eq!(frame.data()[0], 42);
    }

    #[test]
    fn block_until_change_is_bounded() {
        let ctx = SoftwareContext::new(2, 2);
        let start = Instant::now();
        // Nothing presents; the capture must come back within the budget.
        let frame = ctx.capture_desktop(0, true).unwrap();
        assert!(start.elapsed() < PRESENT_WAIT_BUDGET + Duration::from_millis(500));
        assert_eq!(frame.width(), 2);
    }

    #[test]
    fn hardware_encoder_requires_factory() {
        let ctx = SoftwareContext::new(2, 2);
        assert!(ctx.create_hardware_encoder(2, 2).is_err());

        let ctx = SoftwareContext::new(2, 2).with_hardware_encoder(|w, h| {
            Ok(Box::new(crate::encoder::identity::IdentityEncoder::new(w, h))
                as Box<dyn EncoderBackend>)
        });
        assert!(ctx.create_hardware_encoder(2, 2).is_ok());
    }
}
