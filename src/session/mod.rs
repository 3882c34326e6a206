//! Sessions: the unit of ownership for context, encoder, registry, and
//! cursor notifier.
//!
//! A session is created from a property list, owns one execution context
//! exclusively, and composes the render-target registry, the encode
//! pipeline, and the mouse notifier behind a single handle. Every method
//! takes `&self`; internal state lives behind mutexes and atomics so that
//! the client's (serialized) mutating thread can run concurrently with
//! polling threads and blocked mouse waiters, and `Session` is
//! `Send + Sync`.
//!
//! Destruction is explicit through [`Session::close`] (also run on drop):
//! mouse waiters are released first so nothing stays parked, then the
//! worker threads are joined and all tracking state is dropped. Operations
//! on a closed session fail with their family's `Closed` variant.

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::context::{self, ExecutionContext, RenderSurface};
use crate::encoder::identity::IdentityEncoder;
use crate::encoder::{
    validate_parameter, EncoderBackend, EncoderConfig, EncoderSetup, ParamKey, ParamValue,
    ParameterSet,
};
use crate::error::{
    ContextError, CreateSessionError, EncodeError, EncoderSetupError, MouseError, ParameterError,
    RegisterError, ResizeError, TargetError,
};
use crate::frame::{EncodedFrame, FramePoll, PixelFrame, SourceFrame};
use crate::mouse::{MouseData, MouseNotifier, MouseTrackerThread, MouseWatcher, Notification};
use crate::pipeline::{EncodePipeline, PipelineShared, PipelineStage};
use crate::properties::{EncoderSelection, SessionProperties};
use crate::registry::{RenderTargetState, ResolvedTarget, TargetRegistry};

/// A capture-and-encode session.
pub struct Session {
    context: Arc<dyn ExecutionContext>,
    properties: SessionProperties,
    registry: Mutex<TargetRegistry>,
    /// Mutating side of the pipeline (submission, parameters, resize).
    pipeline: Mutex<Option<EncodePipeline>>,
    /// Polling side; a separate slot so polls never contend with a capture.
    poll: Mutex<Option<Arc<PipelineShared>>>,
    notifier: Arc<MouseNotifier>,
    tracker: Mutex<Option<MouseTrackerThread>>,
    closed: AtomicBool,
}

impl Session {
    /// Create a session on the platform's default execution context.
    pub fn create(properties: SessionProperties) -> Result<Self, CreateSessionError> {
        let context = context::default_context()?;
        Self::create_with_context(properties, context)
    }

    /// Create a session from a raw, sentinel-terminated property list.
    pub fn create_from_raw(list: &[i64]) -> Result<Self, CreateSessionError> {
        let properties = SessionProperties::from_raw(list)?;
        Self::create(properties)
    }

    /// Create a session on a caller-supplied execution context.
    ///
    /// This is the injection point for real GPU stacks and for tests. On
    /// failure everything acquired so far is released before the error is
    /// returned; no partially constructed session escapes.
    pub fn create_with_context(
        properties: SessionProperties,
        context: Arc<dyn ExecutionContext>,
    ) -> Result<Self, CreateSessionError> {
        if properties.desktop && !context.has_display(properties.desktop_display) {
            return Err(CreateSessionError::Context(ContextError::InvalidDisplay(
                properties.desktop_display,
            )));
        }

        let notifier = Arc::new(MouseNotifier::new());

        let mut registry = TargetRegistry::new();
        if properties.desktop {
            let (width, height) = context.display_dimensions(properties.desktop_display);
            // Desktop sessions expose the desktop as target 0.
            registry.register_desktop(properties.desktop_display, width, height);
        }

        let tracker = if properties.mouse_data {
            let thread = MouseTrackerThread::spawn(Arc::clone(&context), Arc::clone(&notifier))
                .map_err(|e| CreateSessionError::Context(ContextError::Init(e.to_string())))?;
            Some(thread)
        } else {
            None
        };

        info!(
            context = context.name(),
            desktop = properties.desktop,
            mouse_data = properties.mouse_data,
            "session created"
        );

        Ok(Self {
            context,
            properties,
            registry: Mutex::new(registry),
            pipeline: Mutex::new(None),
            poll: Mutex::new(None),
            notifier,
            tracker: Mutex::new(tracker),
            closed: AtomicBool::new(false),
        })
    }

    /// The properties this session was created with.
    pub fn properties(&self) -> &SessionProperties {
        &self.properties
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Encoder lifecycle and parameters
    // ========================================================================

    /// Create (or replace) the session's encoder.
    pub fn create_encoder(
        &self,
        width: u32,
        height: u32,
        setup: EncoderSetup,
    ) -> Result<(), EncoderSetupError> {
        if self.is_closed() {
            return Err(EncoderSetupError::Closed);
        }
        if width == 0 || height == 0 {
            return Err(EncoderSetupError::InvalidDimensions { width, height });
        }

        let backend: Box<dyn EncoderBackend> = match self.properties.encoder {
            EncoderSelection::Identity => Box::new(IdentityEncoder::new(width, height)),
            EncoderSelection::Hardware => self
                .context
                .create_hardware_encoder(width, height)
                .map_err(|e| EncoderSetupError::CreationFailed(e.to_string()))?,
        };

        let supported = backend.supported_parameters().to_vec();
        let mut params = ParameterSet::defaults_for(&supported);
        match setup {
            EncoderSetup::Preset(preset) => {
                params.merge_supported(&preset.parameters(), &supported);
            }
            EncoderSetup::Parameters(explicit) => {
                for (key, value) in explicit.iter() {
                    if !supported.contains(&key) {
                        return Err(EncoderSetupError::UnsupportedParameter(key));
                    }
                    validate_parameter(key, value)
                        .map_err(|reason| EncoderSetupError::InvalidParameter { key, reason })?;
                    params.set(key, value);
                }
            }
        }

        let pipeline = EncodePipeline::new(
            backend,
            EncoderConfig {
                width,
                height,
                params,
            },
        )?;
        let shared = pipeline.shared();

        let mut slot = self.pipeline.lock();
        if let Some(mut old) = slot.take() {
            debug!("replacing existing encoder");
            old.shutdown();
        }
        *self.poll.lock() = Some(shared);
        *slot = Some(pipeline);
        Ok(())
    }

    /// Set one encoder parameter.
    pub fn set_parameter(&self, key: ParamKey, value: ParamValue) -> Result<(), ParameterError> {
        if self.is_closed() {
            return Err(ParameterError::Closed);
        }
        let mut guard = self.pipeline.lock();
        let pipeline = guard.as_mut().ok_or(ParameterError::NoEncoder)?;
        pipeline.set_parameter(key, value)
    }

    /// Read one encoder parameter.
    pub fn parameter(&self, key: ParamKey) -> Result<ParamValue, ParameterError> {
        if self.is_closed() {
            return Err(ParameterError::Closed);
        }
        let guard = self.pipeline.lock();
        let pipeline = guard.as_ref().ok_or(ParameterError::NoEncoder)?;
        pipeline.parameter(key)
    }

    /// Reconfigure the encoder and capture scaling for a new resolution.
    ///
    /// Registered render-target indices survive a resize. Fails while a
    /// submission is still in flight; drain first.
    pub fn resize(&self, width: u32, height: u32) -> Result<(), ResizeError> {
        if self.is_closed() {
            return Err(ResizeError::Closed);
        }
        if width == 0 || height == 0 {
            return Err(ResizeError::InvalidDimensions { width, height });
        }
        let mut guard = self.pipeline.lock();
        let pipeline = guard.as_mut().ok_or(ResizeError::NoEncoder)?;
        pipeline.resize(width, height)
    }

    /// Output dimensions of the active encoder, if one exists.
    pub fn encoder_dimensions(&self) -> Option<(u32, u32)> {
        self.pipeline.lock().as_ref().map(|p| p.dimensions())
    }

    // ========================================================================
    // Render targets
    // ========================================================================

    /// Register a client surface, returning its stable index.
    pub fn register_render_target(
        &self,
        surface: &Arc<dyn RenderSurface>,
        width: u32,
        height: u32,
    ) -> Result<usize, RegisterError> {
        if self.is_closed() {
            return Err(RegisterError::Closed);
        }
        self.registry.lock().register_surface(surface, width, height)
    }

    /// Remove a render target and free its index for reuse.
    pub fn remove_render_target(&self, index: usize) -> Result<(), TargetError> {
        if self.is_closed() {
            return Err(TargetError::Closed);
        }
        self.registry.lock().remove(index)
    }

    /// State of a registered render target.
    pub fn render_target_state(&self, index: usize) -> Result<RenderTargetState, TargetError> {
        if self.is_closed() {
            return Err(TargetError::Closed);
        }
        self.registry.lock().state(index)
    }

    // ========================================================================
    // Encode pipeline
    // ========================================================================

    /// Capture the given target and submit it to the encoder.
    ///
    /// Returns once the work is submitted, not once the bitstream is ready;
    /// poll with [`encoded_frame`](Self::encoded_frame). Successive calls
    /// are processed strictly in submission order.
    pub fn encode_frame(&self, index: usize) -> Result<(), EncodeError> {
        if self.is_closed() {
            return Err(EncodeError::Closed);
        }
        let mut guard = self.pipeline.lock();
        let pipeline = guard.as_mut().ok_or(EncodeError::NoEncoder)?;

        pipeline.begin_capture();
        let frame = match self.capture_for(index, pipeline) {
            Ok(frame) => frame,
            Err(err) => {
                pipeline.abort_capture();
                return Err(err);
            }
        };

        // A failed submit restores the stage itself.
        pipeline.submit(frame)?;
        self.registry.lock().mark_active(index);
        Ok(())
    }

    fn capture_for(
        &self,
        index: usize,
        pipeline: &EncodePipeline,
    ) -> Result<PixelFrame, EncodeError> {
        let resolved = self.registry.lock().resolve_for_encode(index)?;

        let mut raw = match resolved {
            ResolvedTarget::Desktop { display } => self
                .context
                .capture_desktop(display, self.properties.block_until_change)?,
            ResolvedTarget::Surface(surface) => surface.snapshot()?,
        };

        if self.properties.flip_source {
            raw.flip_vertical();
        }

        let (width, height) = pipeline.dimensions();
        Ok(self.context.scale_convert(raw, width, height)?)
    }

    /// Non-blocking poll for the oldest completed bitstream frame.
    pub fn encoded_frame(&self) -> Result<FramePoll<EncodedFrame>, EncodeError> {
        let shared = self.poll_shared()?;
        Ok(shared.poll_encoded())
    }

    /// Non-blocking poll for the oldest captured source frame.
    pub fn source_frame(&self) -> Result<FramePoll<SourceFrame>, EncodeError> {
        let shared = self.poll_shared()?;
        Ok(shared.poll_source())
    }

    /// Blocking variant of [`encoded_frame`](Self::encoded_frame) with a
    /// deadline; `Pending` on timeout.
    pub fn wait_encoded_frame(
        &self,
        timeout: Duration,
    ) -> Result<FramePoll<EncodedFrame>, EncodeError> {
        let shared = self.poll_shared()?;
        Ok(shared.wait_encoded(timeout))
    }

    /// Current pipeline stage; `Idle` when no encoder exists.
    pub fn pipeline_stage(&self) -> PipelineStage {
        match &*self.poll.lock() {
            Some(shared) => shared.stage(),
            None => PipelineStage::Idle,
        }
    }

    fn poll_shared(&self) -> Result<Arc<PipelineShared>, EncodeError> {
        if self.is_closed() {
            return Err(EncodeError::Closed);
        }
        self.poll.lock().clone().ok_or(EncodeError::NoEncoder)
    }

    // ========================================================================
    // Mouse data
    // ========================================================================

    /// Read the cursor state; with `wait` the call blocks until the shape
    /// changes or the wait is cancelled.
    pub fn mouse_data(&self, wait: bool) -> Result<MouseData, MouseError> {
        if self.is_closed() {
            return Err(MouseError::Closed);
        }
        if !self.properties.mouse_data {
            return Err(MouseError::Disabled);
        }
        self.notifier.get(wait)
    }

    /// A cloneable consumer handle, independent of the session's lifetime.
    pub fn mouse_watcher(&self) -> MouseWatcher {
        MouseWatcher::new(Arc::clone(&self.notifier), self.properties.mouse_data)
    }

    /// Wake threads blocked on the given notification kind without the
    /// underlying event having occurred. Safe with zero waiters and
    /// idempotent.
    pub fn release_event(&self, kind: Notification) -> Result<(), MouseError> {
        if self.is_closed() {
            return Err(MouseError::Closed);
        }
        match kind {
            Notification::MouseShape => self.notifier.release(),
        }
        Ok(())
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Destroy the session: release all blocked waiters, stop the tracker
    /// and encode worker, and drop all tracking state. Idempotent; every
    /// later operation fails with its family's `Closed` variant.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Waiters are released before anything else is torn down so no
        // thread can stay parked across destruction.
        self.notifier.close();

        if let Some(mut tracker) = self.tracker.lock().take() {
            tracker.stop();
        }
        *self.poll.lock() = None;
        if let Some(mut pipeline) = self.pipeline.lock().take() {
            pipeline.shutdown();
        }
        self.registry.lock().clear();

        info!("session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
