//! Atomic mode-setting and page flipping on a single plane
//!
//! This module drives one connector, crtc and plane of a drm device through the
//! atomic api and keeps an image on screen by double buffering two dumb buffers.
//!
//! ## How to use it
//!
//! ### Initialization
//!
//! Open the device node and wrap it into a [`DrmDeviceFd`], which tries to become
//! drm master. [`enable_atomic`] negotiates the client capabilities, afterwards a
//! [`FlipSession`] can be created for the objects you want to drive. Creating the
//! session checks that the plane fits the crtc, resolves every property needed later
//! and allocates both [`FrameSurface`]s.
//!
//! ### Page flips
//!
//! [`FlipSession::modeset`] performs the one blocking commit of a session. A
//! [`FlipLoop`] then waits on the device and dispatches flip completions to the
//! session, which asks its [`FrameProducer`](crate::producer::FrameProducer) for
//! the next frame and flips to it. At most one flip is in flight at a time.
//!
//! ### Shutdown
//!
//! [`FlipSession::request_shutdown`] stops the cycle, [`teardown`] waits for the last
//! flip and releases everything in the right order.
//!
//! ```rust,no_run
//! use kmsflip::backend::drm::{
//!     enable_atomic, teardown, DrmDeviceFd, FlipLoop, FlipRetryPolicy, FlipSession, SessionConfig,
//! };
//! use kmsflip::producer::{FpsCounter, TestPattern};
//! use kmsflip::reexports::drm::control::from_u32;
//! use kmsflip::utils::DeviceFd;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let device = DrmDeviceFd::new(DeviceFd::open("/dev/dri/card0")?);
//! enable_atomic(&device)?;
//!
//! let config = SessionConfig {
//!     connector: from_u32(77).unwrap(),
//!     crtc: from_u32(57).unwrap(),
//!     plane: from_u32(43).unwrap(),
//!     size: (640, 512),
//!     offset: (0, 0),
//! };
//! let mut session = FlipSession::new(
//!     device,
//!     config,
//!     Box::new(TestPattern::new()),
//!     Box::new(FpsCounter::default()),
//!     FlipRetryPolicy::default(),
//! )?;
//! let mut flip_loop = FlipLoop::new(&session)?;
//!
//! session.modeset()?;
//! let result = flip_loop.run(&mut session);
//! let report = teardown(&mut session, Some(&mut flip_loop));
//! result?;
//! assert!(report.is_clean());
//! # Ok(())
//! # }
//! ```

pub(crate) mod atomic;
pub(crate) mod device;
pub(crate) mod dumb;
pub(crate) mod error;
mod event_loop;
pub(crate) mod properties;
mod session;
mod swapchain;
mod teardown;

#[cfg(test)]
pub(crate) mod test;

pub use self::atomic::{
    append_modeset, append_plane_config, append_plane_unbind, AtomicRequest, CommitMode, PlaneConfig,
};
pub use self::device::{
    check_plane, enable_atomic, DrmDeviceFd, DumbHandle, FlipEvent, KmsDevice, MemMap, ObjectHandle,
    ObjectKind, PlaneCapabilities, PropertyDescriptor, PropertyTriple,
};
pub use self::dumb::{FrameSurface, SURFACE_FORMAT};
pub use self::error::{AccessError, Error};
pub use self::event_loop::FlipLoop;
pub use self::properties::{DisplayObject, PropertyDirectory, PropertyKind};
pub use self::session::{FlipRetryPolicy, FlipSession, SessionConfig};
pub use self::swapchain::SwapChain;
pub use self::teardown::{teardown, TeardownReport};
