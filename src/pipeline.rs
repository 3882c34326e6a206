//! The per-session encode pipeline.
//!
//! A dedicated worker thread owns the encoder backend; submissions travel a
//! bounded channel so backpressure is fail-fast (an error at submit time)
//! rather than an unbounded queue. Completed frames land in small FIFO
//! queues the polling thread drains without ever blocking; when the client
//! does not drain, the oldest completed frame is overwritten.
//!
//! Parameter updates and in-place reconfigurations travel the same channel
//! as frames, so the worker observes everything in submission order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace, warn};

use crate::encoder::{
    validate_parameter, EncoderBackend, EncoderConfig, ParamKey, ParamValue, ParameterSet,
    ReconfigureError,
};
use crate::error::{EncodeError, EncoderSetupError, ParameterError, ResizeError};
use crate::frame::{EncodedFrame, FramePoll, PixelFrame, SourceFrame};

/// Maximum outstanding submissions, and the depth of the result queues.
pub const PIPELINE_DEPTH: usize = 3;

/// How long a resize waits for the worker to apply the reconfiguration.
const RECONFIGURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Observable pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Nothing captured, nothing outstanding.
    Idle,
    /// A capture is being taken for submission.
    Capturing,
    /// At least one submission is waiting on the backend.
    Encoding,
    /// A completed frame is waiting to be polled.
    Ready,
}

enum WorkerCommand {
    Encode { frame_index: u64, frame: PixelFrame },
    UpdateParams(ParameterSet),
    Reconfigure {
        width: u32,
        height: u32,
        reply: Sender<Result<(), ReconfigureError>>,
    },
}

/// State shared between the session, the polling threads, and the worker.
pub(crate) struct PipelineShared {
    encoded: Mutex<VecDeque<EncodedFrame>>,
    ready_cond: Condvar,
    source: Mutex<VecDeque<SourceFrame>>,
    stage: Mutex<PipelineStage>,
    in_flight: AtomicUsize,
}

impl PipelineShared {
    fn new() -> Self {
        Self {
            encoded: Mutex::new(VecDeque::with_capacity(PIPELINE_DEPTH)),
            ready_cond: Condvar::new(),
            source: Mutex::new(VecDeque::with_capacity(PIPELINE_DEPTH)),
            stage: Mutex::new(PipelineStage::Idle),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn stage(&self) -> PipelineStage {
        *self.stage.lock()
    }

    fn set_stage(&self, stage: PipelineStage) {
        *self.stage.lock() = stage;
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Recompute the stage from queue and counter state.
    fn restore_stage(&self) {
        let stage = if !self.encoded.lock().is_empty() {
            PipelineStage::Ready
        } else if self.in_flight() > 0 {
            PipelineStage::Encoding
        } else {
            PipelineStage::Idle
        };
        self.set_stage(stage);
    }

    fn push_encoded(&self, frame: EncodedFrame) {
        {
            let mut queue = self.encoded.lock();
            if queue.len() == PIPELINE_DEPTH {
                // The client is not draining; drop the oldest frame.
                let dropped = queue.pop_front();
                warn!(
                    frame_index = dropped.map(|f| f.frame_index),
                    "encoded frame overwritten before it was polled"
                );
            }
            queue.push_back(frame);
        }
        self.set_stage(PipelineStage::Ready);
        self.ready_cond.notify_all();
    }

    fn push_source(&self, frame: SourceFrame) {
        let mut queue = self.source.lock();
        if queue.len() == PIPELINE_DEPTH {
            queue.pop_front();
        }
        queue.push_back(frame);
    }

    /// Non-blocking poll of the oldest completed bitstream frame.
    pub fn poll_encoded(&self) -> FramePoll<EncodedFrame> {
        let popped = self.encoded.lock().pop_front();
        match popped {
            Some(frame) => {
                if self.encoded.lock().is_empty() && self.in_flight() == 0 {
                    self.set_stage(PipelineStage::Idle);
                }
                FramePoll::Ready(frame)
            }
            None => FramePoll::Pending,
        }
    }

    /// Non-blocking poll of the oldest captured source frame.
    pub fn poll_source(&self) -> FramePoll<SourceFrame> {
        match self.source.lock().pop_front() {
            Some(frame) => FramePoll::Ready(frame),
            None => FramePoll::Pending,
        }
    }

    /// Blocking variant of [`poll_encoded`](Self::poll_encoded) with a
    /// deadline.
    pub fn wait_encoded(&self, timeout: Duration) -> FramePoll<EncodedFrame> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.encoded.lock();
        loop {
            if let Some(frame) = queue.pop_front() {
                drop(queue);
                if self.encoded.lock().is_empty() && self.in_flight() == 0 {
                    self.set_stage(PipelineStage::Idle);
                }
                return FramePoll::Ready(frame);
            }
            if self.ready_cond.wait_until(&mut queue, deadline).timed_out() {
                return FramePoll::Pending;
            }
        }
    }
}

/// The session-side front of the pipeline: submission, parameters, resize,
/// and worker lifecycle. Polling goes through [`PipelineShared`] so it
/// never contends with a capture in progress.
pub(crate) struct EncodePipeline {
    tx: Option<Sender<WorkerCommand>>,
    shared: Arc<PipelineShared>,
    worker: Option<JoinHandle<()>>,
    width: u32,
    height: u32,
    params: ParameterSet,
    supported: Vec<ParamKey>,
    next_frame_index: u64,
}

impl EncodePipeline {
    pub fn new(
        backend: Box<dyn EncoderBackend>,
        config: EncoderConfig,
    ) -> Result<Self, EncoderSetupError> {
        let supported = backend.supported_parameters().to_vec();
        let backend_name = backend.name();
        let shared = Arc::new(PipelineShared::new());

        let (tx, rx) = bounded::<WorkerCommand>(PIPELINE_DEPTH);
        let worker_shared = Arc::clone(&shared);
        let initial_params = config.params.clone();
        let worker = thread::Builder::new()
            .name("encode-worker".to_string())
            .spawn(move || worker_loop(backend, rx, worker_shared, initial_params))
            .map_err(|e| EncoderSetupError::CreationFailed(e.to_string()))?;

        info!(
            backend = backend_name,
            width = config.width,
            height = config.height,
            "encoder created"
        );

        Ok(Self {
            tx: Some(tx),
            shared,
            worker: Some(worker),
            width: config.width,
            height: config.height,
            params: config.params,
            supported,
            next_frame_index: 0,
        })
    }

    pub fn shared(&self) -> Arc<PipelineShared> {
        Arc::clone(&self.shared)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn set_parameter(&mut self, key: ParamKey, value: ParamValue) -> Result<(), ParameterError> {
        if !self.supported.contains(&key) {
            return Err(ParameterError::Unsupported(key));
        }
        validate_parameter(key, value)
            .map_err(|reason| ParameterError::InvalidValue { key, reason })?;

        self.params.set(key, value);
        if let Some(tx) = &self.tx {
            // Same channel as frames: the update lands between submissions,
            // never in the middle of one.
            let _ = tx.send(WorkerCommand::UpdateParams(self.params.clone()));
        }
        trace!(?key, ?value, "encoder parameter updated");
        Ok(())
    }

    pub fn parameter(&self, key: ParamKey) -> Result<ParamValue, ParameterError> {
        if !self.supported.contains(&key) {
            return Err(ParameterError::Unsupported(key));
        }
        // Defaults are seeded for every supported key at creation.
        self.params.get(key).ok_or(ParameterError::Unsupported(key))
    }

    /// Mark the start of a capture for the next submission.
    pub fn begin_capture(&self) {
        self.shared.set_stage(PipelineStage::Capturing);
    }

    /// Roll the stage back after a failed capture or submission.
    pub fn abort_capture(&self) {
        self.shared.restore_stage();
    }

    /// Hand a converted frame to the worker. Returns the frame index.
    pub fn submit(&mut self, frame: PixelFrame) -> Result<u64, EncodeError> {
        let frame_index = self.next_frame_index;
        let source = SourceFrame {
            frame_index,
            frame: frame.clone(),
        };

        let tx = self.tx.as_ref().ok_or(EncodeError::Closed)?;
        match tx.try_send(WorkerCommand::Encode { frame_index, frame }) {
            Ok(()) => {
                self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
                // Capture is complete once submission succeeds; the source
                // frame becomes available ahead of the encoded one.
                self.shared.push_source(source);
                self.shared.set_stage(PipelineStage::Encoding);
                self.next_frame_index += 1;
                trace!(frame_index, "frame submitted");
                Ok(frame_index)
            }
            Err(TrySendError::Full(_)) => {
                self.shared.restore_stage();
                Err(EncodeError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.shared.restore_stage();
                Err(EncodeError::Closed)
            }
        }
    }

    /// Reconfigure the backend for a new output resolution.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), ResizeError> {
        if self.shared.in_flight() != 0 {
            return Err(ResizeError::EncodeInFlight);
        }

        let tx = self.tx.as_ref().ok_or(ResizeError::Closed)?;
        let (reply_tx, reply_rx) = bounded(1);
        tx.send(WorkerCommand::Reconfigure {
            width,
            height,
            reply: reply_tx,
        })
        .map_err(|_| ResizeError::Reconfigure("encoder worker is gone".into()))?;

        match reply_rx.recv_timeout(RECONFIGURE_TIMEOUT) {
            Ok(Ok(())) => {
                debug!(width, height, "encoder reconfigured");
                self.width = width;
                self.height = height;
                Ok(())
            }
            Ok(Err(err)) => Err(ResizeError::Reconfigure(err.to_string())),
            Err(_) => Err(ResizeError::Reconfigure(
                "reconfiguration timed out".into(),
            )),
        }
    }

    /// Disconnect the worker and wait for it to drain and exit.
    pub fn shutdown(&mut self) {
        self.tx = None;
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("encode worker panicked during shutdown");
            }
        }
    }
}

impl Drop for EncodePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    mut backend: Box<dyn EncoderBackend>,
    rx: Receiver<WorkerCommand>,
    shared: Arc<PipelineShared>,
    mut params: ParameterSet,
) {
    debug!(backend = backend.name(), "encode worker started");

    for command in rx.iter() {
        match command {
            WorkerCommand::UpdateParams(new_params) => params = new_params,
            WorkerCommand::Reconfigure {
                width,
                height,
                reply,
            } => {
                let _ = reply.send(backend.reconfigure(width, height));
            }
            WorkerCommand::Encode { frame_index, frame } => {
                match backend.encode(&frame, &params) {
                    Ok(payload) => {
                        shared.in_flight.fetch_sub(1, Ordering::SeqCst);
                        shared.push_encoded(EncodedFrame {
                            frame_index,
                            width: frame.width(),
                            height: frame.height(),
                            keyframe: payload.keyframe,
                            bitstream: payload.bitstream,
                        });
                    }
                    Err(err) => {
                        shared.in_flight.fetch_sub(1, Ordering::SeqCst);
                        warn!(frame_index, %err, "encode failed, frame dropped");
                        shared.restore_stage();
                    }
                }
            }
        }
    }

    debug!("encode worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::identity::IdentityEncoder;
    use crate::encoder::EncodedPayload;
    use crossbeam_channel::unbounded;

    fn identity_pipeline(width: u32, height: u32) -> EncodePipeline {
        let backend = Box::new(IdentityEncoder::new(width, height));
        let supported = backend.supported_parameters().to_vec();
        EncodePipeline::new(
            backend,
            EncoderConfig {
                width,
                height,
                params: ParameterSet::defaults_for(&supported),
            },
        )
        .unwrap()
    }

    /// Backend that blocks inside `encode` until released, reporting when
    /// each encode begins.
    struct GatedBackend {
        started: Sender<()>,
        release: Receiver<()>,
    }

    impl EncoderBackend for GatedBackend {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn supported_parameters(&self) -> &[ParamKey] {
            &[ParamKey::BitrateKbps]
        }

        fn encode(
            &mut self,
            frame: &PixelFrame,
            _params: &ParameterSet,
        ) -> Result<EncodedPayload, crate::encoder::EncodeBackendError> {
            let _ = self.started.send(());
            let _ = self.release.recv();
            Ok(EncodedPayload {
                bitstream: frame.data().to_vec(),
                keyframe: true,
            })
        }

        fn reconfigure(&mut self, _width: u32, _height: u32) -> Result<(), ReconfigureError> {
            Ok(())
        }
    }

    fn gated_pipeline(width: u32, height: u32) -> (EncodePipeline, Receiver<()>, Sender<()>) {
        let (started_tx, started_rx) = unbounded();
        let (release_tx, release_rx) = unbounded();
        let backend = Box::new(GatedBackend {
            started: started_tx,
            release: release_rx,
        });
        let pipeline = EncodePipeline::new(
            backend,
            EncoderConfig {
                width,
                height,
                params: ParameterSet::defaults_for(&[ParamKey::BitrateKbps]),
            },
        )
        .unwrap();
        (pipeline, started_rx, release_tx)
    }

    #[test]
    fn submit_and_wait_round_trip() {
        let mut pipeline = identity_pipeline(4, 4);
        pipeline.submit(PixelFrame::solid(4, 4, [5, 5, 5, 255])).unwrap();

        let frame = pipeline
            .shared()
            .wait_encoded(Duration::from_secs(2))
            .ready()
            .expect("frame did not complete");
        assert_eq!(frame.frame_index, 0);
        assert!(!frame.bitstream.is_empty());
    }

    #[test]
    fn delivery_is_fifo() {
        let mut pipeline = identity_pipeline(2, 2);
        let shared = pipeline.shared();

        pipeline.submit(PixelFrame::solid(2, 2, [0x11; 4])).unwrap();
        pipeline.submit(PixelFrame::solid(2, 2, [0x22; 4])).unwrap();

        let first = shared.wait_encoded(Duration::from_secs(2)).ready().unwrap();
        let second = shared.wait_encoded(Duration::from_secs(2)).ready().unwrap();

        assert_eq!(first.frame_index, 0);
        assert_eq!(second.frame_index, 1);
        // The identity payload carries the pixels after its header.
        assert_eq!(*first.bitstream.last().unwrap(), 0x11);
        assert_eq!(*second.bitstream.last().unwrap(), 0x22);
    }

    #[test]
    fn poll_reports_pending_until_backend_finishes() {
        let (mut pipeline, started, release) = gated_pipeline(2, 2);
        let shared = pipeline.shared();

        pipeline.submit(PixelFrame::solid(2, 2, [1; 4])).unwrap();
        started.recv_timeout(Duration::from_secs(2)).unwrap();

        assert!(!shared.poll_encoded().is_ready());
        assert_eq!(shared.stage(), PipelineStage::Encoding);

        release.send(()).unwrap();
        let frame = shared.wait_encoded(Duration::from_secs(2)).ready().unwrap();
        assert_eq!(frame.frame_index, 0);
        assert_eq!(shared.stage(), PipelineStage::Idle);
    }

    #[test]
    fn source_frame_is_ready_before_encode_completes() {
        let (mut pipeline, started, release) = gated_pipeline(2, 2);
        let shared = pipeline.shared();

        pipeline.submit(PixelFrame::solid(2, 2, [9; 4])).unwrap();
        started.recv_timeout(Duration::from_secs(2)).unwrap();

        // Capture finished at submission; encode is still gated.
        let source = shared.poll_source().ready().expect("source frame missing");
        assert_eq!(source.frame_index, 0);
        assert!(!shared.poll_encoded().is_ready());

        release.send(()).unwrap();
        assert!(shared.wait_encoded(Duration::from_secs(2)).is_ready());
    }

    #[test]
    fn backpressure_is_fail_fast_at_depth() {
        let (mut pipeline, started, release) = gated_pipeline(2, 2);
        let frame = || PixelFrame::solid(2, 2, [3; 4]);

        // First submission is dequeued by the worker and parks in encode.
        pipeline.submit(frame()).unwrap();
        started.recv_timeout(Duration::from_secs(2)).unwrap();

        // The next PIPELINE_DEPTH submissions fill the channel.
        for _ in 0..PIPELINE_DEPTH {
            pipeline.submit(frame()).unwrap();
        }

        assert!(matches!(pipeline.submit(frame()), Err(EncodeError::QueueFull)));

        // Drain everything; delivery order is submission order.
        let shared = pipeline.shared();
        for expected in 0..(PIPELINE_DEPTH as u64 + 1) {
            release.send(()).unwrap();
            let frame = shared
                .wait_encoded(Duration::from_secs(2))
                .ready()
                .expect("frame did not complete");
            assert_eq!(frame.frame_index, expected);
        }
    }

    #[test]
    fn resize_rejected_while_in_flight() {
        let (mut pipeline, started, release) = gated_pipeline(4, 4);

        pipeline.submit(PixelFrame::solid(4, 4, [1; 4])).unwrap();
        started.recv_timeout(Duration::from_secs(2)).unwrap();

        assert!(matches!(
            pipeline.resize(2, 2),
            Err(ResizeError::EncodeInFlight)
        ));

        release.send(()).unwrap();
        let shared = pipeline.shared();
        shared.wait_encoded(Duration::from_secs(2)).ready().unwrap();

        pipeline.resize(2, 2).unwrap();
        assert_eq!(pipeline.dimensions(), (2, 2));
    }

    #[test]
    fn unsupported_parameter_is_rejected() {
        let mut pipeline = identity_pipeline(2, 2);
        // Identity does not honor QP bounds.
        assert!(matches!(
            pipeline.set_parameter(ParamKey::QpMin, ParamValue::UInt(10)),
            Err(ParameterError::Unsupported(ParamKey::QpMin))
        ));
        assert!(matches!(
            pipeline.parameter(ParamKey::QpMin),
            Err(ParameterError::Unsupported(ParamKey::QpMin))
        ));
    }

    #[test]
    fn parameter_round_trips() {
        let mut pipeline = identity_pipeline(2, 2);
        pipeline
            .set_parameter(ParamKey::MaxFps, ParamValue::UInt(120))
            .unwrap();
        assert_eq!(
            pipeline.parameter(ParamKey::MaxFps).unwrap(),
            ParamValue::UInt(120)
        );
    }
}
