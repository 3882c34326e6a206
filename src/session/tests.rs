//! End-to-end tests for the session surface.
//!
//! Tests are organized by area:
//! - Lifecycle (creation, property handling, teardown)
//! - Render targets
//! - Encode pipeline
//! - Mouse data

use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::context::software::SoftwareContext;
use crate::context::{CursorShape, CursorSnapshot, ExecutionContext, RenderSurface};
use crate::encoder::identity::{IdentityEncoder, IDENTITY_HEADER_LEN};
use crate::encoder::{EncoderSetup, ParamKey, ParamValue, ParameterSet, Preset};
use crate::error::{
    CaptureError, ContextError, CreateSessionError, EncodeError, EncoderSetupError, MouseError,
    ParameterError, PropertyError, RegisterError, TargetError,
};
use crate::frame::{EncodedFrame, FramePoll, PixelFrame};
use crate::mouse::Notification;
use crate::properties::{keys, EncoderSelection, SessionProperties, PROPERTY_TERMINATOR};
use crate::registry::RenderTargetState;
use crate::session::Session;

// ============================================================================
// Helpers
// ============================================================================

struct TestSurface {
    width: u32,
    height: u32,
    pixels: Mutex<Vec<u8>>,
}

impl TestSurface {
    fn new(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            width,
            height,
            pixels: Mutex::new(vec![0u8; (width * height * 4) as usize]),
        })
    }

    fn fill(&self, value: u8) {
        self.pixels.lock().fill(value);
    }
}

impl RenderSurface for TestSurface {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn snapshot(&self) -> Result<PixelFrame, CaptureError> {
        Ok(PixelFrame::new(
            self.width,
            self.height,
            self.pixels.lock().clone(),
        ))
    }
}

fn desktop_session(width: u32, height: u32) -> (Arc<SoftwareContext>, Session) {
    let ctx = Arc::new(SoftwareContext::new(width, height));
    let props = SessionProperties::builder().desktop(true).build();
    let session =
        Session::create_with_context(props, ctx.clone() as Arc<dyn ExecutionContext>).unwrap();
    (ctx, session)
}

fn texture_session() -> Session {
    let ctx = Arc::new(SoftwareContext::new(64, 64));
    Session::create_with_context(
        SessionProperties::default(),
        ctx as Arc<dyn ExecutionContext>,
    )
    .unwrap()
}

fn poll_until_ready(session: &Session, tries: usize) -> EncodedFrame {
    for _ in 0..tries {
        if let FramePoll::Ready(frame) = session.encoded_frame().unwrap() {
            return frame;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("frame was not ready within the bounded retries");
}

// ============================================================================
// Lifecycle
// ============================================================================

mod lifecycle_tests {
    use super::*;

    #[test]
    fn desktop_session_encodes_the_desktop() {
        // Desktop capture on, identity encoder, 1080p stream: the canonical
        // desktop-encoding setup.
        let (_ctx, session) = desktop_session(1920, 1080);
        session
            .create_encoder(1920, 1080, EncoderSetup::Preset(Preset::Balanced))
            .unwrap();

        session.encode_frame(0).unwrap();
        let frame = poll_until_ready(&session, 200);
        assert!(frame.bitstream.len() > 0);
        assert_eq!((frame.width, frame.height), (1920, 1080));
    }

    #[test]
    fn invalid_display_fails_creation() {
        let ctx = Arc::new(SoftwareContext::new(8, 8));
        let props = SessionProperties::builder()
            .desktop(true)
            .desktop_display(3)
            .build();
        let result = Session::create_with_context(props, ctx as Arc<dyn ExecutionContext>);
        assert!(matches!(
            result,
            Err(CreateSessionError::Context(ContextError::InvalidDisplay(3)))
        ));
    }

    #[test]
    fn malformed_raw_properties_fail_before_context_creation() {
        let result = Session::create_from_raw(&[keys::DESKTOP, 1]);
        assert!(matches!(
            result,
            Err(CreateSessionError::Property(PropertyError::MissingTerminator))
        ));
    }

    #[test]
    fn raw_properties_round_trip_through_the_builder() {
        let raw = SessionProperties::from_raw(&[
            keys::ENCODER,
            1,
            keys::DESKTOP,
            1,
            PROPERTY_TERMINATOR,
        ])
        .unwrap();
        let built = SessionProperties::builder()
            .encoder(EncoderSelection::Identity)
            .desktop(true)
            .build();
        assert_eq!(raw, built);
    }

    #[test]
    fn closed_session_rejects_every_operation() {
        let (_ctx, session) = desktop_session(8, 8);
        session.close();

        assert!(matches!(
            session.create_encoder(8, 8, EncoderSetup::Preset(Preset::Fast)),
            Err(EncoderSetupError::Closed)
        ));
        assert!(matches!(session.encode_frame(0), Err(EncodeError::Closed)));
        assert!(matches!(session.encoded_frame(), Err(EncodeError::Closed)));
        assert!(matches!(
            session.set_parameter(ParamKey::MaxFps, ParamValue::UInt(30)),
            Err(ParameterError::Closed)
        ));
        assert!(matches!(
            session.render_target_state(0),
            Err(TargetError::Closed)
        ));
        assert!(matches!(
            session.remove_render_target(0),
            Err(TargetError::Closed)
        ));
        assert!(matches!(session.mouse_data(false), Err(MouseError::Closed)));
        assert!(matches!(
            session.release_event(Notification::MouseShape),
            Err(MouseError::Closed)
        ));
        assert!(matches!(session.resize(4, 4), Err(crate::error::ResizeError::Closed)));

        // Closing again is a harmless no-op.
        session.close();
    }

    #[test]
    fn hardware_selection_needs_a_context_backend() {
        let ctx = Arc::new(SoftwareContext::new(8, 8));
        let props = SessionProperties::builder()
            .encoder(EncoderSelection::Hardware)
            .desktop(true)
            .build();
        let session =
            Session::create_with_context(props, ctx as Arc<dyn ExecutionContext>).unwrap();

        assert!(matches!(
            session.create_encoder(8, 8, EncoderSetup::Preset(Preset::Fast)),
            Err(EncoderSetupError::CreationFailed(_))
        ));
    }

    #[test]
    fn hardware_selection_uses_the_bound_backend() {
        let ctx = Arc::new(SoftwareContext::new(8, 8).with_hardware_encoder(|w, h| {
            Ok(Box::new(IdentityEncoder::new(w, h)) as Box<dyn crate::encoder::EncoderBackend>)
        }));
        let props = SessionProperties::builder()
            .encoder(EncoderSelection::Hardware)
            .desktop(true)
            .build();
        let session =
            Session::create_with_context(props, ctx as Arc<dyn ExecutionContext>).unwrap();

        session
            .create_encoder(8, 8, EncoderSetup::Preset(Preset::Fast))
            .unwrap();
        session.encode_frame(0).unwrap();
        assert!(poll_until_ready(&session, 200).bitstream.len() > IDENTITY_HEADER_LEN);
    }
}

// ============================================================================
// Render targets
// ============================================================================

mod render_target_tests {
    use super::*;

    #[test]
    fn fresh_matching_target_reads_registered() {
        let session = texture_session();
        session
            .create_encoder(16, 16, EncoderSetup::Preset(Preset::Fast))
            .unwrap();

        let surface = TestSurface::new(16, 16);
        let dyn_surface: Arc<dyn RenderSurface> = surface;
        let index = session.register_render_target(&dyn_surface, 16, 16).unwrap();

        assert_eq!(
            session.render_target_state(index).unwrap(),
            RenderTargetState::Registered
        );
    }

    #[test]
    fn freed_index_is_reissued_smallest_first() {
        let session = texture_session();
        let surface: Arc<dyn RenderSurface> = TestSurface::new(8, 8);

        let a = session.register_render_target(&surface, 8, 8).unwrap();
        let b = session.register_render_target(&surface, 8, 8).unwrap();
        assert_eq!((a, b), (0, 1));

        session.remove_render_target(a).unwrap();
        let c = session.register_render_target(&surface, 8, 8).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn remove_is_ok_then_invalid_index() {
        let session = texture_session();
        let surface: Arc<dyn RenderSurface> = TestSurface::new(8, 8);
        let index = session.register_render_target(&surface, 8, 8).unwrap();

        assert!(session.remove_render_target(index).is_ok());
        assert!(matches!(
            session.remove_render_target(index),
            Err(TargetError::InvalidIndex(_))
        ));
    }

    #[test]
    fn zero_width_registration_changes_nothing() {
        let session = texture_session();
        let surface: Arc<dyn RenderSurface> = TestSurface::new(8, 8);

        assert!(matches!(
            session.register_render_target(&surface, 0, 8),
            Err(RegisterError::InvalidDimensions { width: 0, .. })
        ));
        // No index was consumed by the failed call.
        assert_eq!(session.register_render_target(&surface, 8, 8).unwrap(), 0);
    }

    #[test]
    fn dropped_surface_turns_invalid_at_encode_time() {
        let session = texture_session();
        session
            .create_encoder(8, 8, EncoderSetup::Preset(Preset::Fast))
            .unwrap();

        let surface: Arc<dyn RenderSurface> = TestSurface::new(8, 8);
        let index = session.register_render_target(&surface, 8, 8).unwrap();
        drop(surface);

        assert!(matches!(
            session.encode_frame(index),
            Err(EncodeError::TargetInvalid(_))
        ));
        assert_eq!(
            session.render_target_state(index).unwrap(),
            RenderTargetState::Invalid
        );
    }

    #[test]
    fn successful_encode_marks_the_target_active() {
        let session = texture_session();
        session
            .create_encoder(8, 8, EncoderSetup::Preset(Preset::Fast))
            .unwrap();

        let surface: Arc<dyn RenderSurface> = TestSurface::new(8, 8);
        let index = session.register_render_target(&surface, 8, 8).unwrap();

        session.encode_frame(index).unwrap();
        assert_eq!(
            session.render_target_state(index).unwrap(),
            RenderTargetState::Active
        );
    }
}

// ============================================================================
// Encode pipeline
// ============================================================================

mod pipeline_tests {
    use super::*;

    #[test]
    fn encode_without_encoder_fails() {
        let (_ctx, session) = desktop_session(8, 8);
        assert!(matches!(session.encode_frame(0), Err(EncodeError::NoEncoder)));
        assert!(matches!(session.encoded_frame(), Err(EncodeError::NoEncoder)));
    }

    #[test]
    fn unknown_index_fails_submission() {
        let (_ctx, session) = desktop_session(8, 8);
        session
            .create_encoder(8, 8, EncoderSetup::Preset(Preset::Fast))
            .unwrap();
        assert!(matches!(
            session.encode_frame(42),
            Err(EncodeError::InvalidIndex(42))
        ));
    }

    #[test]
    fn zero_dimension_encoder_is_rejected() {
        let (_ctx, session) = desktop_session(8, 8);
        assert!(matches!(
            session.create_encoder(0, 8, EncoderSetup::Preset(Preset::Fast)),
            Err(EncoderSetupError::InvalidDimensions { width: 0, .. })
        ));
    }

    #[test]
    fn submission_order_is_delivery_order() {
        let session = texture_session();
        session
            .create_encoder(4, 4, EncoderSetup::Preset(Preset::Fast))
            .unwrap();

        let surface = TestSurface::new(4, 4);
        let dyn_surface: Arc<dyn RenderSurface> = surface.clone();
        let index = session.register_render_target(&dyn_surface, 4, 4).unwrap();

        surface.fill(0x11);
        session.encode_frame(index).unwrap();
        surface.fill(0x22);
        session.encode_frame(index).unwrap();

        let first = session
            .wait_encoded_frame(Duration::from_secs(2))
            .unwrap()
            .ready()
            .expect("first frame missing");
        let second = session
            .wait_encoded_frame(Duration::from_secs(2))
            .unwrap()
            .ready()
            .expect("second frame missing");

        assert_eq!(first.frame_index, 0);
        assert_eq!(second.frame_index, 1);
        assert_eq!(*first.bitstream.last().unwrap(), 0x11);
        assert_eq!(*second.bitstream.last().unwrap(), 0x22);
    }

    #[test]
    fn capture_is_scaled_to_fill_the_encoder_resolution() {
        let session = texture_session();
        session
            .create_encoder(32, 32, EncoderSetup::Preset(Preset::Fast))
            .unwrap();

        let surface = TestSurface::new(64, 64);
        surface.fill(0x11);
        let dyn_surface: Arc<dyn RenderSurface> = surface;
        let index = session.register_render_target(&dyn_surface, 64, 64).unwrap();

        session.encode_frame(index).unwrap();
        let frame = poll_until_ready(&session, 200);

        assert_eq!((frame.width, frame.height), (32, 32));
        assert_eq!(frame.bitstream.len(), IDENTITY_HEADER_LEN + 32 * 32 * 4);
        // A solid source stays solid through bilinear scaling.
        assert_eq!(*frame.bitstream.last().unwrap(), 0x11);
    }

    #[test]
    fn wait_encoded_frame_times_out_to_pending() {
        let (_ctx, session) = desktop_session(8, 8);
        session
            .create_encoder(8, 8, EncoderSetup::Preset(Preset::Fast))
            .unwrap();

        let poll = session
            .wait_encoded_frame(Duration::from_millis(50))
            .unwrap();
        assert!(!poll.is_ready());
    }

    #[test]
    fn source_frame_carries_the_converted_capture() {
        let session = texture_session();
        session
            .create_encoder(4, 4, EncoderSetup::Preset(Preset::Fast))
            .unwrap();

        let surface = TestSurface::new(4, 4);
        surface.fill(0x33);
        let dyn_surface: Arc<dyn RenderSurface> = surface;
        let index = session.register_render_target(&dyn_surface, 4, 4).unwrap();

        session.encode_frame(index).unwrap();
        let source = session
            .source_frame()
            .unwrap()
            .ready()
            .expect("source frame is available at submission");
        assert_eq!(source.frame.data()[0], 0x33);
    }

    #[test]
    fn resize_preserves_render_target_indices() {
        let session = texture_session();
        session
            .create_encoder(8, 8, EncoderSetup::Preset(Preset::Fast))
            .unwrap();

        let surface: Arc<dyn RenderSurface> = TestSurface::new(8, 8);
        let index = session.register_render_target(&surface, 8, 8).unwrap();
        session.encode_frame(index).unwrap();
        // Drain so nothing is in flight.
        session
            .wait_encoded_frame(Duration::from_secs(2))
            .unwrap()
            .ready()
            .unwrap();

        session.resize(4, 4).unwrap();
        assert_eq!(session.encoder_dimensions(), Some((4, 4)));
        assert_eq!(
            session.render_target_state(index).unwrap(),
            RenderTargetState::Active
        );

        // The pipeline keeps working at the new resolution.
        session.encode_frame(index).unwrap();
        let frame = poll_until_ready(&session, 200);
        assert_eq!((frame.width, frame.height), (4, 4));
    }

    #[test]
    fn explicit_parameters_are_validated_strictly() {
        let (_ctx, session) = desktop_session(8, 8);

        let mut params = ParameterSet::new();
        params.set(ParamKey::QpMin, ParamValue::UInt(10));
        // Identity does not honor QP bounds: strict setup rejects them.
        assert!(matches!(
            session.create_encoder(8, 8, EncoderSetup::Parameters(params)),
            Err(EncoderSetupError::UnsupportedParameter(ParamKey::QpMin))
        ));

        let mut params = ParameterSet::new();
        params.set(ParamKey::MaxFps, ParamValue::UInt(0));
        assert!(matches!(
            session.create_encoder(8, 8, EncoderSetup::Parameters(params)),
            Err(EncoderSetupError::InvalidParameter {
                key: ParamKey::MaxFps,
                ..
            })
        ));

        let mut params = ParameterSet::new();
        params.set(ParamKey::MaxFps, ParamValue::UInt(90));
        session
            .create_encoder(8, 8, EncoderSetup::Parameters(params))
            .unwrap();
        assert_eq!(
            session.parameter(ParamKey::MaxFps).unwrap(),
            ParamValue::UInt(90)
        );
    }

    #[test]
    fn parameters_round_trip_for_every_supported_key() {
        let (_ctx, session) = desktop_session(8, 8);
        session
            .create_encoder(8, 8, EncoderSetup::Preset(Preset::Balanced))
            .unwrap();

        // Identity's capability set, with a fresh value per key.
        let updates = [
            (ParamKey::MaxFps, ParamValue::UInt(144)),
            (ParamKey::SkipFrame, ParamValue::Bool(false)),
            (ParamKey::ForceIdr, ParamValue::Bool(true)),
        ];
        for (key, value) in updates {
            session.set_parameter(key, value).unwrap();
            assert_eq!(session.parameter(key).unwrap(), value);
        }
    }

    #[test]
    fn parameter_calls_without_encoder_fail() {
        let (_ctx, session) = desktop_session(8, 8);
        assert!(matches!(
            session.set_parameter(ParamKey::MaxFps, ParamValue::UInt(30)),
            Err(ParameterError::NoEncoder)
        ));
        assert!(matches!(
            session.parameter(ParamKey::MaxFps),
            Err(ParameterError::NoEncoder)
        ));
    }

    #[test]
    fn replacing_the_encoder_resets_its_parameters() {
        let (_ctx, session) = desktop_session(8, 8);
        session
            .create_encoder(8, 8, EncoderSetup::Preset(Preset::Fast))
            .unwrap();
        session
            .set_parameter(ParamKey::MaxFps, ParamValue::UInt(144))
            .unwrap();

        session
            .create_encoder(8, 8, EncoderSetup::Preset(Preset::Balanced))
            .unwrap();
        assert_eq!(
            session.parameter(ParamKey::MaxFps).unwrap(),
            ParamValue::UInt(30)
        );
    }

    #[test]
    fn flip_source_inverts_the_capture() {
        let ctx = Arc::new(SoftwareContext::new(2, 2));
        // Top row 0xAA, bottom row 0xBB.
        let mut data = vec![0xAA; 8];
        data.extend_from_slice(&[0xBB; 8]);
        ctx.present(PixelFrame::new(2, 2, data));

        let props = SessionProperties::builder()
            .desktop(true)
            .flip_source(true)
            .build();
        let session =
            Session::create_with_context(props, ctx as Arc<dyn ExecutionContext>).unwrap();
        session
            .create_encoder(2, 2, EncoderSetup::Preset(Preset::Fast))
            .unwrap();

        session.encode_frame(0).unwrap();
        let frame = poll_until_ready(&session, 200);
        // The flipped capture leads with the bottom row.
        assert_eq!(frame.bitstream[IDENTITY_HEADER_LEN], 0xBB);
    }
}

// ============================================================================
// Mouse data
// ============================================================================

mod mouse_tests {
    use super::*;

    fn cursor(x: i32, shape_id: u64) -> CursorSnapshot {
        CursorSnapshot {
            x,
            y: 0,
            visible: true,
            shape_id,
            shape: Some(CursorShape {
                width: 4,
                height: 4,
                hotspot_x: 1,
                hotspot_y: 1,
                bgra: Arc::new(vec![255; 64]),
            }),
        }
    }

    fn mouse_session() -> (Arc<SoftwareContext>, Session) {
        let ctx = Arc::new(SoftwareContext::new(8, 8));
        let props = SessionProperties::builder()
            .desktop(true)
            .mouse_data(true)
            .build();
        let session =
            Session::create_with_context(props, ctx.clone() as Arc<dyn ExecutionContext>).unwrap();
        (ctx, session)
    }

    #[test]
    fn mouse_data_is_gated_by_the_property() {
        let (_ctx, session) = desktop_session(8, 8);
        assert!(matches!(session.mouse_data(false), Err(MouseError::Disabled)));
        assert!(matches!(
            session.mouse_watcher().mouse_data(false),
            Err(MouseError::Disabled)
        ));
    }

    #[test]
    fn tracker_publishes_cursor_updates() {
        let (ctx, session) = mouse_session();
        ctx.set_cursor(cursor(12, 1));

        // The tracker samples every ~16ms; give it a few cycles.
        let mut data = None;
        for _ in 0..100 {
            let snapshot = session.mouse_data(false).unwrap();
            if snapshot.visible {
                data = Some(snapshot);
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        let data = data.expect("tracker never published the cursor");
        assert_eq!(data.x, 12);
        assert!(data.shape.is_some());
    }

    #[test]
    fn blocking_wait_observes_a_shape_change() {
        let (ctx, session) = mouse_session();
        ctx.set_cursor(cursor(0, 1));
        thread::sleep(Duration::from_millis(50));
        // Consume the initial shape.
        let _ = session.mouse_data(false).unwrap();

        let watcher = session.mouse_watcher();
        let (tx, rx) = mpsc::channel();
        let waiter = thread::spawn(move || {
            tx.send(watcher.mouse_data(true)).unwrap();
        });

        thread::sleep(Duration::from_millis(30));
        ctx.set_cursor(cursor(5, 2));

        let result = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("waiter did not wake");
        let data = result.unwrap();
        assert!(data.shape_changed);
        waiter.join().unwrap();
    }

    #[test]
    fn release_event_unblocks_a_waiter_without_a_change() {
        let (ctx, session) = mouse_session();
        ctx.set_cursor(cursor(0, 1));
        thread::sleep(Duration::from_millis(50));
        let _ = session.mouse_data(false).unwrap();

        let watcher = session.mouse_watcher();
        let (tx, rx) = mpsc::channel();
        let waiter = thread::spawn(move || {
            tx.send(watcher.mouse_data(true)).unwrap();
        });

        thread::sleep(Duration::from_millis(30));
        session.release_event(Notification::MouseShape).unwrap();

        let result = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("waiter did not wake");
        assert!(matches!(result, Err(MouseError::Cancelled)));
        waiter.join().unwrap();
    }

    #[test]
    fn destroying_the_session_cancels_blocked_waiters() {
        let (ctx, session) = mouse_session();
        ctx.set_cursor(cursor(0, 1));
        thread::sleep(Duration::from_millis(50));
        let _ = session.mouse_data(false).unwrap();

        let watcher = session.mouse_watcher();
        let (tx, rx) = mpsc::channel();
        let waiter = thread::spawn(move || {
            tx.send(watcher.mouse_data(true)).unwrap();
        });

        thread::sleep(Duration::from_millis(30));
        session.close();

        // Bounded: the waiter must come back cancelled, never hang.
        let result = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("waiter hung across session destruction");
        assert!(matches!(result, Err(MouseError::Cancelled)));
        waiter.join().unwrap();
    }

    #[test]
    fn release_event_is_idempotent_with_zero_waiters() {
        let (_ctx, session) = mouse_session();
        session.release_event(Notification::MouseShape).unwrap();
        session.release_event(Notification::MouseShape).unwrap();
    }
}
