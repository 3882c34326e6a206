//! Error types, one enum per operation family.
//!
//! Every public operation validates its own preconditions and reports
//! failures through these enums; nothing unwinds across the API boundary.
//! The `Closed` variants cover calls made against a session that has been
//! torn down with [`Session::close`](crate::session::Session::close).

use thiserror::Error;

use crate::encoder::ParamKey;

/// Errors raised while parsing a session property list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropertyError {
    /// A key in the list is not a known session property.
    #[error("unknown property key {0}")]
    UnknownKey(i64),

    /// A known key carried a value outside its accepted domain.
    #[error("ill-typed value for property `{key}`: expected {expected}")]
    IllTyped {
        /// Name of the offending property.
        key: &'static str,
        /// Description of the accepted value domain.
        expected: &'static str,
    },

    /// The raw list ran out before the terminating sentinel key.
    #[error("property list is missing the terminating sentinel")]
    MissingTerminator,

    /// The raw list ends with a key that has no value.
    #[error("property list ends with a key and no value")]
    TruncatedPair,
}

/// Errors surfaced by execution-context implementations.
#[derive(Debug, Clone, Error)]
pub enum ContextError {
    /// No default execution context exists on this platform.
    #[error("no default execution context is available on this platform")]
    Unavailable,

    /// The requested desktop display does not exist.
    #[error("display {0} does not exist")]
    InvalidDisplay(u32),

    /// Context initialization failed (driver or OS resource unavailable).
    #[error("context initialization failed: {0}")]
    Init(String),

    /// The context cannot provide a hardware encoder.
    #[error("hardware encoder unavailable: {0}")]
    HardwareEncoder(String),
}

/// Errors raised by [`Session::create`](crate::session::Session::create).
#[derive(Debug, Error)]
pub enum CreateSessionError {
    /// The property list was malformed.
    #[error("invalid session property: {0}")]
    Property(#[from] PropertyError),

    /// The execution context could not be acquired.
    #[error("execution context creation failed: {0}")]
    Context(#[from] ContextError),
}

/// Errors raised while capturing or converting a frame.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    /// This context has no desktop capture path.
    #[error("desktop capture is not supported by this context")]
    DesktopUnsupported,

    /// The source surface is gone or no longer readable.
    #[error("the source surface is no longer usable")]
    SurfaceLost,

    /// The capture backend reported a failure.
    #[error("capture failed: {0}")]
    Backend(String),
}

/// Errors raised by [`Session::create_encoder`](crate::session::Session::create_encoder).
#[derive(Debug, Error)]
pub enum EncoderSetupError {
    /// The session has been destroyed.
    #[error("session has been destroyed")]
    Closed,

    /// Width or height was zero.
    #[error("invalid encoder dimensions: {width}x{height}")]
    InvalidDimensions {
        /// Requested output width.
        width: u32,
        /// Requested output height.
        height: u32,
    },

    /// An explicitly supplied parameter is outside the backend's capability set.
    #[error("parameter {0:?} is not supported by the selected backend")]
    UnsupportedParameter(ParamKey),

    /// An explicitly supplied parameter carried an invalid value.
    #[error("invalid value for parameter {key:?}: {reason}")]
    InvalidParameter {
        /// The offending parameter.
        key: ParamKey,
        /// Why the value was rejected.
        reason: String,
    },

    /// Backend initialization failed.
    #[error("encoder backend initialization failed: {0}")]
    CreationFailed(String),
}

/// Errors raised by the single-parameter get/set calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParameterError {
    /// The session has been destroyed.
    #[error("session has been destroyed")]
    Closed,

    /// No encoder has been created on this session yet.
    #[error("no encoder exists on this session")]
    NoEncoder,

    /// The key is outside the active backend's capability set.
    #[error("parameter {0:?} is not supported by the active encoder")]
    Unsupported(ParamKey),

    /// The value does not fit the parameter's domain.
    #[error("invalid value for parameter {key:?}: {reason}")]
    InvalidValue {
        /// The offending parameter.
        key: ParamKey,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Errors raised by render-target registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    /// The session has been destroyed.
    #[error("session has been destroyed")]
    Closed,

    /// Width or height was zero.
    #[error("invalid render-target dimensions: {width}x{height}")]
    InvalidDimensions {
        /// Supplied surface width.
        width: u32,
        /// Supplied surface height.
        height: u32,
    },

    /// The registry is at capacity.
    #[error("render-target limit reached ({max} targets)")]
    ResourceLimit {
        /// Maximum number of simultaneously registered targets.
        max: usize,
    },
}

/// Errors raised by render-target removal and state queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    /// The session has been destroyed.
    #[error("session has been destroyed")]
    Closed,

    /// The index does not name a currently registered target.
    #[error("index {0} does not name a registered render target")]
    InvalidIndex(usize),
}

/// Errors raised by frame submission and the frame poll calls.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The session has been destroyed.
    #[error("session has been destroyed")]
    Closed,

    /// No encoder has been created on this session yet.
    #[error("no encoder exists on this session")]
    NoEncoder,

    /// The index does not name a currently registered target.
    #[error("index {0} does not name a registered render target")]
    InvalidIndex(usize),

    /// The target's surface became unusable; the entry is now `Invalid`.
    #[error("render target {0} is invalid")]
    TargetInvalid(usize),

    /// Capturing the source surface failed.
    #[error("frame capture failed: {0}")]
    Capture(#[from] CaptureError),

    /// The submission queue is full; drain and retry.
    #[error("encode submission queue is full")]
    QueueFull,
}

/// Errors raised by [`Session::resize`](crate::session::Session::resize).
#[derive(Debug, Error)]
pub enum ResizeError {
    /// The session has been destroyed.
    #[error("session has been destroyed")]
    Closed,

    /// No encoder has been created on this session yet.
    #[error("no encoder exists on this session")]
    NoEncoder,

    /// Width or height was zero.
    #[error("invalid resize dimensions: {width}x{height}")]
    InvalidDimensions {
        /// Requested output width.
        width: u32,
        /// Requested output height.
        height: u32,
    },

    /// A submitted frame has not completed; drain before resizing.
    #[error("an encode submission is still in flight")]
    EncodeInFlight,

    /// The backend could not reconfigure in place; recreate the encoder.
    #[error("in-place reconfiguration failed: {0}")]
    Reconfigure(String),
}

/// Errors raised by the mouse-data calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MouseError {
    /// The call was made on a session that has been destroyed.
    #[error("session has been destroyed")]
    Closed,

    /// Mouse data was not enabled when the session was created.
    #[error("mouse data is not enabled on this session")]
    Disabled,

    /// The wait was released without a shape change (teardown or
    /// an explicit release of the notification).
    #[error("mouse-data wait was cancelled")]
    Cancelled,
}
