//! GDI execution context for Windows.
//!
//! Captures the primary desktop with BitBlt and extracts cursor shapes by
//! rendering them through DrawIconEx, which handles color, monochrome, and
//! animated cursors uniformly. Hardware encoders are not provided here;
//! they come from the codec stack the embedder binds to the session.

#![allow(clippy::missing_safety_doc)]

use std::collections::HashMap;
use std::mem;

use parking_lot::Mutex;
use tracing::{debug, warn};
use windows::Win32::Foundation::{COLORREF, POINT, RECT};
use windows::Win32::Graphics::Gdi::{
    BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, CreateSolidBrush, DeleteDC, DeleteObject,
    FillRect, GetDC, GetDIBits, GetObjectW, ReleaseDC, SelectObject, BITMAP, BITMAPINFO,
    BITMAPINFOHEADER, BI_RGB, DIB_RGB_COLORS, SRCCOPY,
};
use windows::Win32::UI::WindowsAndMessaging::{
    DrawIconEx, GetCursorInfo, GetIconInfo, GetSystemMetrics, CURSORINFO, CURSORINFO_FLAGS,
    CURSOR_SHOWING, DI_NORMAL, HCURSOR, ICONINFO, SM_CXSCREEN, SM_CYSCREEN,
};

use super::{CursorShape, CursorSnapshot, ExecutionContext};
use crate::encoder::EncoderBackend;
use crate::error::{CaptureError, ContextError};
use crate::frame::PixelFrame;

/// Execution context backed by GDI on the primary display.
pub struct GdiContext {
    /// Extracted shapes keyed by cursor handle; extraction is expensive,
    /// the same handle always yields the same bitmap.
    shape_cache: Mutex<HashMap<isize, CursorShape>>,
}

impl GdiContext {
    /// Create the context.
    pub fn new() -> Result<Self, ContextError> {
        let (width, height) = primary_display_size();
        if width == 0 || height == 0 {
            return Err(ContextError::Init("no primary display metrics".into()));
        }
        debug!(width, height, "GDI context created");
        Ok(Self {
            shape_cache: Mutex::new(HashMap::new()),
        })
    }
}

impl ExecutionContext for GdiContext {
    fn name(&self) -> &'static str {
        "gdi"
    }

    fn has_display(&self, display: u32) -> bool {
        display == 0
    }

    fn display_dimensions(&self, _display: u32) -> (u32, u32) {
        primary_display_size()
    }

    fn capture_desktop(
        &self,
        display: u32,
        _block_until_change: bool,
    ) -> Result<PixelFrame, CaptureError> {
        if display != 0 {
            return Err(CaptureError::Backend(format!("unknown display {display}")));
        }
        // GDI has no change notification; block-until-change degrades to an
        // immediate capture.
        unsafe { capture_primary_screen() }
    }

    fn cursor_state(&self) -> Option<CursorSnapshot> {
        unsafe { self.cursor_state_internal() }
    }

    fn create_hardware_encoder(
        &self,
        _width: u32,
        _height: u32,
    ) -> Result<Box<dyn EncoderBackend>, ContextError> {
        Err(ContextError::HardwareEncoder(
            "no hardware codec is bound to the GDI context".into(),
        ))
    }
}

impl GdiContext {
    unsafe fn cursor_state_internal(&self) -> Option<CursorSnapshot> {
        let mut cursor_info = CURSORINFO {
            cbSize: mem::size_of::<CURSORINFO>() as u32,
            flags: CURSORINFO_FLAGS(0),
            hCursor: HCURSOR::default(),
            ptScreenPos: POINT::default(),
        };

        if GetCursorInfo(&mut cursor_info).is_err() {
            return None;
        }

        if cursor_info.flags.0 & CURSOR_SHOWING.0 == 0 {
            return Some(CursorSnapshot {
                x: cursor_info.ptScreenPos.x,
                y: cursor_info.ptScreenPos.y,
                visible: false,
                shape_id: 0,
                shape: None,
            });
        }

        let handle = cursor_info.hCursor.0 as isize;
        let shape = {
            let mut cache = self.shape_cache.lock();
            match cache.get(&handle) {
                Some(shape) => Some(shape.clone()),
                None => match extract_cursor_shape(cursor_info.hCursor) {
                    Ok(shape) => {
                        cache.insert(handle, shape.clone());
                        Some(shape)
                    }
                    Err(err) => {
                        warn!(%err, "cursor shape extraction failed");
                        None
                    }
                },
            }
        };

        Some(CursorSnapshot {
            x: cursor_info.ptScreenPos.x,
            y: cursor_info.ptScreenPos.y,
            visible: true,
            shape_id: handle as u64,
            shape,
        })
    }
}

fn primary_display_size() -> (u32, u32) {
    unsafe {
        let width = GetSystemMetrics(SM_CXSCREEN).max(0) as u32;
        let height = GetSystemMetrics(SM_CYSCREEN).max(0) as u32;
        (width, height)
    }
}

/// BitBlt the primary screen into a top-down BGRA frame.
unsafe fn capture_primary_screen() -> Result<PixelFrame, CaptureError> {
    let (width, height) = primary_display_size();
    if width == 0 || height == 0 {
        return Err(CaptureError::Backend("no primary display metrics".into()));
    }

    let screen_dc = GetDC(None);
    if screen_dc.is_invalid() {
        return Err(CaptureError::Backend("GetDC failed".into()));
    }

    let mem_dc = CreateCompatibleDC(screen_dc);
    if mem_dc.is_invalid() {
        ReleaseDC(None, screen_dc);
        return Err(CaptureError::Backend("CreateCompatibleDC failed".into()));
    }

    let bitmap = CreateCompatibleBitmap(screen_dc, width as i32, height as i32);
    if bitmap.is_invalid() {
        let _ = DeleteDC(mem_dc);
        ReleaseDC(None, screen_dc);
        return Err(CaptureError::Backend("CreateCompatibleBitmap failed".into()));
    }

    let old_bitmap = SelectObject(mem_dc, bitmap);

    let blt = BitBlt(
        mem_dc,
        0,
        0,
        width as i32,
        height as i32,
        screen_dc,
        0,
        0,
        SRCCOPY,
    );

    let result = if blt.is_err() {
        Err(CaptureError::Backend("BitBlt failed".into()))
    } else {
        read_dib_pixels(mem_dc, bitmap, width, height)
    };

    SelectObject(mem_dc, old_bitmap);
    let _ = DeleteObject(bitmap);
    let _ = DeleteDC(mem_dc);
    ReleaseDC(None, screen_dc);

    result.map(|mut data| {
        // GDI leaves the alpha channel zeroed for BI_RGB captures.
        for pixel in data.chunks_exact_mut(4) {
            pixel[3] = 255;
        }
        PixelFrame::new(width, height, data)
    })
}

/// Read a GDI bitmap as top-down 32-bit BGRA bytes.
unsafe fn read_dib_pixels(
    dc: windows::Win32::Graphics::Gdi::HDC,
    bitmap: windows::Win32::Graphics::Gdi::HBITMAP,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, CaptureError> {
    let mut info = BITMAPINFO {
        bmiHeader: BITMAPINFOHEADER {
            biSize: mem::size_of::<BITMAPINFOHEADER>() as u32,
            biWidth: width as i32,
            biHeight: -(height as i32), // top-down DIB
            biPlanes: 1,
            biBitCount: 32,
            biCompression: BI_RGB.0,
            biSizeImage: width * height * 4,
            biXPelsPerMeter: 0,
            biYPelsPerMeter: 0,
            biClrUsed: 0,
            biClrImportant: 0,
        },
        bmiColors: [Default::default()],
    };

    let mut data = vec![0u8; (width * height * 4) as usize];
    let lines = GetDIBits(
        dc,
        bitmap,
        0,
        height,
        Some(data.as_mut_ptr() as *mut _),
        &mut info,
        DIB_RGB_COLORS,
    );

    if lines == 0 {
        return Err(CaptureError::Backend("GetDIBits failed".into()));
    }
    Ok(data)
}

/// Render a cursor through DrawIconEx and pull out its BGRA pixels.
unsafe fn extract_cursor_shape(hcursor: HCURSOR) -> Result<CursorShape, CaptureError> {
    let mut icon_info = ICONINFO::default();
    if GetIconInfo(hcursor, &mut icon_info).is_err() {
        return Err(CaptureError::Backend("GetIconInfo failed".into()));
    }

    let hotspot_x = icon_info.xHotspot as i32;
    let hotspot_y = icon_info.yHotspot as i32;

    let (width, height) = if !icon_info.hbmColor.is_invalid() {
        let mut bm = BITMAP::default();
        GetObjectW(
            icon_info.hbmColor,
            mem::size_of::<BITMAP>() as i32,
            Some(&mut bm as *mut _ as *mut _),
        );
        (bm.bmWidth as u32, bm.bmHeight as u32)
    } else if !icon_info.hbmMask.is_invalid() {
        let mut bm = BITMAP::default();
        GetObjectW(
            icon_info.hbmMask,
            mem::size_of::<BITMAP>() as i32,
            Some(&mut bm as *mut _ as *mut _),
        );
        // Monochrome cursors stack the AND and XOR masks vertically.
        (bm.bmWidth as u32, (bm.bmHeight / 2) as u32)
    } else {
        (32, 32)
    };

    if !icon_info.hbmColor.is_invalid() {
        let _ = DeleteObject(icon_info.hbmColor);
    }
    if !icon_info.hbmMask.is_invalid() {
        let _ = DeleteObject(icon_info.hbmMask);
    }

    if width == 0 || height == 0 {
        return Err(CaptureError::Backend("invalid cursor dimensions".into()));
    }

    let screen_dc = GetDC(None);
    if screen_dc.is_invalid() {
        return Err(CaptureError::Backend("GetDC failed".into()));
    }

    let mem_dc = CreateCompatibleDC(screen_dc);
    if mem_dc.is_invalid() {
        ReleaseDC(None, screen_dc);
        return Err(CaptureError::Backend("CreateCompatibleDC failed".into()));
    }

    let bitmap = CreateCompatibleBitmap(screen_dc, width as i32, height as i32);
    if bitmap.is_invalid() {
        let _ = DeleteDC(mem_dc);
        ReleaseDC(None, screen_dc);
        return Err(CaptureError::Backend("CreateCompatibleBitmap failed".into()));
    }

    let old_bitmap = SelectObject(mem_dc, bitmap);

    let brush = CreateSolidBrush(COLORREF(0));
    let rect = RECT {
        left: 0,
        top: 0,
        right: width as i32,
        bottom: height as i32,
    };
    FillRect(mem_dc, &rect, brush);
    let _ = DeleteObject(brush);

    let draw = DrawIconEx(
        mem_dc,
        0,
        0,
        hcursor,
        width as i32,
        height as i32,
        0,
        None,
        DI_NORMAL,
    );

    let pixels = if draw.is_err() {
        Err(CaptureError::Backend("DrawIconEx failed".into()))
    } else {
        read_dib_pixels(mem_dc, bitmap, width, height)
    };

    SelectObject(mem_dc, old_bitmap);
    let _ = DeleteObject(bitmap);
    let _ = DeleteDC(mem_dc);
    ReleaseDC(None, screen_dc);

    let mut bgra = pixels?;

    // DrawIconEx does not reliably preserve alpha; when none survived,
    // treat pure black as transparent.
    let has_alpha = bgra.chunks(4).any(|p| p[3] != 0);
    if !has_alpha {
        for pixel in bgra.chunks_exact_mut(4) {
            pixel[3] = if pixel[..3] == [0, 0, 0] { 0 } else { 255 };
        }
    }

    Ok(CursorShape {
        width,
        height,
        hotspot_x,
        hotspot_y,
        bgra: std::sync::Arc::new(bgra),
    })
}
