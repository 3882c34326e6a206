//! Desktop encoding demo.
//!
//! Creates a desktop-capture session, an encoder sized for a 1080p stream,
//! and dumps the encoded frames to `desktop.fcs`. On Windows the default
//! GDI context grabs the real desktop; elsewhere a software context with a
//! synthetic presenter stands in. With the identity backend the output is
//! raw frames behind small headers, so keep the frame count modest.

use std::fs::File;
use std::io::Write;
use std::time::Duration;

#[cfg(not(windows))]
use std::sync::Arc;

#[cfg(not(windows))]
use framecast::context::software::SoftwareContext;
#[cfg(not(windows))]
use framecast::{ExecutionContext, PixelFrame};

use framecast::{EncoderSetup, FramePoll, Preset, Session, SessionProperties};

const NUM_FRAMES: u32 = 60;
const STREAM_WIDTH: u32 = 1920;
const STREAM_HEIGHT: u32 = 1080;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let props = SessionProperties::builder().desktop(true).build();

    #[cfg(windows)]
    let session = Session::create(props)?;

    #[cfg(not(windows))]
    let session = {
        let ctx = Arc::new(SoftwareContext::new(STREAM_WIDTH, STREAM_HEIGHT));
        spawn_presenter(Arc::clone(&ctx));
        Session::create_with_context(props, ctx as Arc<dyn ExecutionContext>)?
    };

    println!("created desktop session");

    // The session scales the desktop to fill the stream size.
    session.create_encoder(
        STREAM_WIDTH,
        STREAM_HEIGHT,
        EncoderSetup::Preset(Preset::Balanced),
    )?;
    println!("created encoder ({STREAM_WIDTH}x{STREAM_HEIGHT})");

    let mut out = File::create("desktop.fcs")?;
    let mut written = 0u32;

    println!("encoding {NUM_FRAMES} frames");
    for _ in 0..NUM_FRAMES {
        if session.encode_frame(0).is_ok() {
            if let FramePoll::Ready(frame) =
                session.wait_encoded_frame(Duration::from_millis(100))?
            {
                out.write_all(&frame.bitstream)?;
                written += 1;
            }
        }
    }

    session.close();
    println!("dumped {written} frames to desktop.fcs");
    Ok(())
}

/// Keep the virtual display moving so there is something to capture.
#[cfg(not(windows))]
fn spawn_presenter(ctx: Arc<SoftwareContext>) {
    std::thread::spawn(move || {
        for tick in 0u32.. {
            let shade = (tick % 256) as u8;
            ctx.present(PixelFrame::solid(
                STREAM_WIDTH,
                STREAM_HEIGHT,
                [shade, 64, 128, 255],
            ));
            std::thread::sleep(Duration::from_millis(16));
        }
    });
}
