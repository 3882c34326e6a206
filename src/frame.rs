//! Frame types shared by the capture and encode paths.
//!
//! All pixel data is 32-bit BGRA, matching what capture backends deliver
//! and what encoders consume. Readiness of pipeline output is expressed
//! through [`FramePoll`]; the legacy "zero size means not ready" convention
//! only exists at the [`FramePoll::raw_parts`] compatibility helper.

/// Bytes per pixel for BGRA8 data.
pub const BYTES_PER_PIXEL: usize = 4;

/// A BGRA8 pixel buffer with its dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelFrame {
    /// Wrap an existing BGRA buffer.
    ///
    /// # Panics
    ///
    /// Panics if `data.len()` does not match `width * height * 4`; the
    /// mismatch is always a caller bug, never runtime input.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        assert_eq!(
            data.len(),
            width as usize * height as usize * BYTES_PER_PIXEL,
            "pixel buffer size does not match dimensions"
        );
        Self {
            width,
            height,
            data,
        }
    }

    /// A frame filled with a single BGRA color.
    pub fn solid(width: u32, height: u32, bgra: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * BYTES_PER_PIXEL);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&bgra);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Frame width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Borrow the BGRA bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the frame, returning the BGRA bytes.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Flip the frame vertically in place.
    ///
    /// Capture sources that deliver bottom-up rows are normalized with this
    /// before scaling and encoding.
    pub fn flip_vertical(&mut self) {
        let row = self.width as usize * BYTES_PER_PIXEL;
        let height = self.height as usize;
        for y in 0..height / 2 {
            let top = y * row;
            let bottom = (height - 1 - y) * row;
            let (a, b) = self.data.split_at_mut(bottom);
            a[top..top + row].swap_with_slice(&mut b[..row]);
        }
    }
}

/// The pre-encode captured frame for one submission.
#[derive(Debug, Clone)]
pub struct SourceFrame {
    /// Monotonic index of the submission that produced this frame.
    pub frame_index: u64,
    /// The captured (and converted) pixels.
    pub frame: PixelFrame,
}

/// One completed bitstream frame.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Monotonic index of the submission that produced this frame.
    pub frame_index: u64,
    /// Encoder output width.
    pub width: u32,
    /// Encoder output height.
    pub height: u32,
    /// Whether the backend marked this frame as a keyframe.
    pub keyframe: bool,
    /// The compressed bitstream.
    pub bitstream: Vec<u8>,
}

impl AsRef<[u8]> for EncodedFrame {
    fn as_ref(&self) -> &[u8] {
        &self.bitstream
    }
}

impl AsRef<[u8]> for SourceFrame {
    fn as_ref(&self) -> &[u8] {
        self.frame.data()
    }
}

/// Non-blocking readiness of a pipeline output slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePoll<T> {
    /// The most recent submission has not completed yet; poll again.
    Pending,
    /// A completed frame, delivered in submission order.
    Ready(T),
}

impl<T> FramePoll<T> {
    /// True if a frame is available.
    pub fn is_ready(&self) -> bool {
        matches!(self, FramePoll::Ready(_))
    }

    /// Convert into `Option`, discarding the pending marker.
    pub fn ready(self) -> Option<T> {
        match self {
            FramePoll::Pending => None,
            FramePoll::Ready(frame) => Some(frame),
        }
    }
}

impl<T: AsRef<[u8]>> FramePoll<T> {
    /// Legacy view: `(size, bytes)` where a zero size means "not ready".
    ///
    /// Exists only for callers porting from status-code APIs; new code
    /// should match on the enum.
    pub fn raw_parts(&self) -> (usize, &[u8]) {
        match self {
            FramePoll::Pending => (0, &[]),
            FramePoll::Ready(frame) => {
                let bytes = frame.as_ref();
                (bytes.len(), bytes)
            }
        }
    }
}
