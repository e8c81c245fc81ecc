use drm::control::{connector, crtc, plane, RawResourceHandle};
use drm::ClientCapability;
use drm_fourcc::DrmFourcc;
use std::{io, path::PathBuf};

/// Errors thrown while setting up, flipping or tearing down a [`FlipSession`](super::FlipSession)
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The device does not support atomic mode-setting
    #[error("Device does not support atomic modesetting")]
    AtomicUnsupported,
    /// A required client capability could not be enabled
    #[error("Failed to enable client capability {cap:?} ({source})")]
    ClientCapability {
        /// The capability that was rejected
        cap: ClientCapability,
        /// Underlying device error
        #[source]
        source: io::Error,
    },
    /// The device was accessed and returned an error
    #[error(transparent)]
    Access(#[from] AccessError),
    /// The plane cannot scan out for the given crtc
    #[error("Plane `{plane:?}` is not compatible for use with crtc `{crtc:?}`")]
    PlaneNotCompatible {
        /// Crtc the plane was supposed to be used with
        crtc: crtc::Handle,
        /// The incompatible plane
        plane: plane::Handle,
    },
    /// The plane does not accept the pixel format of the frame surfaces
    #[error("Plane `{plane:?}` does not support format {format}")]
    FormatNotSupported {
        /// The plane in question
        plane: plane::Handle,
        /// The rejected format
        format: DrmFourcc,
    },
    /// The connector does not report any display mode
    #[error("No valid mode for connector `{0:?}`")]
    NoMode(connector::Handle),
    /// An object is missing a required property
    #[error("The DrmDevice is missing a required property '{name}' for handle ({handle:?})")]
    UnknownProperty {
        /// Handle of the object
        handle: RawResourceHandle,
        /// Property name
        name: &'static str,
    },
    /// A page flip was requested while the previous one is still in flight
    #[error("A page flip is already pending on crtc `{0:?}`")]
    FlipPending(crtc::Handle),
    /// The session is shutting down and does not accept new flips
    #[error("Session is shutting down, flip rejected")]
    ShuttingDown,
    /// Page flip commits kept being rejected by the device
    #[error("Giving up after {0} consecutive rejected page flips")]
    FlipRetriesExhausted(u32),
    /// Waiting on or registering with the event loop failed
    #[error("Event loop failure: {0}")]
    EventLoop(#[source] calloop::Error),
}

/// Error returned by a failed device operation
#[derive(thiserror::Error, Debug)]
#[error("DRM access error: {errmsg} on device `{dev:?}` ({source})")]
pub struct AccessError {
    /// Error message associated to the access error
    pub errmsg: &'static str,
    /// Device on which the error was generated
    pub dev: Option<PathBuf>,
    /// Underlying device error
    #[source]
    pub source: io::Error,
}

impl Error {
    /// Returns true if this error describes a missing hardware capability.
    ///
    /// Capability errors are fatal at startup and never worth retrying.
    pub fn is_capability_error(&self) -> bool {
        matches!(self, Error::AtomicUnsupported | Error::ClientCapability { .. })
    }

    /// Returns true if this error was raised by the plane compatibility check.
    pub fn is_plane_error(&self) -> bool {
        matches!(
            self,
            Error::PlaneNotCompatible { .. } | Error::FormatNotSupported { .. }
        )
    }
}
