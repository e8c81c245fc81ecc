use std::fmt;
use std::io;
use std::os::unix::io::AsFd;
use std::time::Duration;

use drm::control::{connector, crtc, framebuffer, plane, property, AtomicCommitFlags, Mode, RawResourceHandle};
use drm::{ClientCapability, DriverCapability};
use drm_fourcc::DrmFourcc;
use tracing::{debug, info, warn};

pub(super) mod fd;
mod mmap;

pub use fd::DrmDeviceFd;
pub use mmap::MemMap;

use super::error::{AccessError, Error};
use crate::utils::DevPath;

/// Handle of one addressable mode-setting object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectHandle {
    /// A physical output
    Connector(connector::Handle),
    /// A timing / scanout engine
    Crtc(crtc::Handle),
    /// A compositable image layer
    Plane(plane::Handle),
}

impl ObjectHandle {
    /// Raw numeric id of the object
    pub fn raw(&self) -> RawResourceHandle {
        match *self {
            ObjectHandle::Connector(handle) => handle.into(),
            ObjectHandle::Crtc(handle) => handle.into(),
            ObjectHandle::Plane(handle) => handle.into(),
        }
    }

    /// Object type tag
    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectHandle::Connector(_) => ObjectKind::Connector,
            ObjectHandle::Crtc(_) => ObjectKind::Crtc,
            ObjectHandle::Plane(_) => ObjectKind::Plane,
        }
    }
}

/// Object type tag of an [`ObjectHandle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Connector
    Connector,
    /// Crtc
    Crtc,
    /// Plane
    Plane,
}

/// Name and handle of one property exposed by an object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    /// Property name as reported by the driver
    pub name: String,
    /// Handle used to address the property in atomic requests
    pub handle: property::Handle,
}

/// Scan-out capabilities of a plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneCapabilities {
    /// Crtcs this plane may be attached to
    pub crtcs: Vec<crtc::Handle>,
    /// Supported fourcc codes
    pub formats: Vec<u32>,
}

impl PlaneCapabilities {
    /// Returns true if the plane can scan out `format` on `crtc`
    pub fn supports(&self, crtc: crtc::Handle, format: DrmFourcc) -> bool {
        self.crtcs.contains(&crtc) && self.formats.contains(&(format as u32))
    }
}

/// Raw description of an allocated dumb buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumbHandle {
    /// GEM handle of the allocation
    pub handle: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Bytes per row
    pub pitch: u32,
    /// Total size in bytes
    pub size: u64,
}

/// A page flip completion reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlipEvent {
    /// Crtc the flip happened on
    pub crtc: crtc::Handle,
    /// Hardware frame sequence number
    pub frame: u32,
    /// Timestamp of the flip
    pub duration: Duration,
}

/// Atomic property triple: object, property and raw value
pub type PropertyTriple = (RawResourceHandle, property::Handle, property::RawValue);

/// Mode-setting operations used by a [`FlipSession`](super::FlipSession).
///
/// [`DrmDeviceFd`] implements this trait for an open drm node. Implementations are
/// expected to be cheap, ref-counted handles: resources like frame surfaces keep a
/// clone of the device to release themselves on drop.
///
/// The file descriptor returned by [`AsFd`] becomes readable whenever
/// [`read_flip_events`](KmsDevice::read_flip_events) has something to return.
pub trait KmsDevice: AsFd + Clone + fmt::Debug {
    /// Memory mapping of a dumb buffer, unmapped on drop
    type Mapping: AsRef<[u8]> + AsMut<[u8]> + fmt::Debug;

    /// Query a driver capability
    fn driver_capability(&self, cap: DriverCapability) -> io::Result<u64>;
    /// Enable a client capability
    fn enable_client_capability(&self, cap: ClientCapability) -> io::Result<()>;

    /// Enumerate all properties exposed by an object
    fn object_properties(&self, object: ObjectHandle) -> io::Result<Vec<PropertyDescriptor>>;
    /// Query the scan-out capabilities of a plane
    fn plane_capabilities(&self, plane: plane::Handle) -> io::Result<PlaneCapabilities>;
    /// Modes reported by a connector, preferred mode first
    fn connector_modes(&self, connector: connector::Handle) -> io::Result<Vec<Mode>>;

    /// Upload a mode as property blob, returning the blob id
    fn create_mode_blob(&self, mode: &Mode) -> io::Result<u64>;
    /// Destroy a property blob
    fn destroy_blob(&self, blob: u64) -> io::Result<()>;

    /// Allocate a dumb buffer
    fn create_dumb_buffer(&self, size: (u32, u32), bpp: u32) -> io::Result<DumbHandle>;
    /// Free a dumb buffer
    fn destroy_dumb_buffer(&self, buffer: &DumbHandle) -> io::Result<()>;
    /// Map a dumb buffer into memory
    fn map_dumb_buffer(&self, buffer: &DumbHandle) -> io::Result<Self::Mapping>;
    /// Create a framebuffer for a dumb buffer
    fn add_framebuffer(&self, buffer: &DumbHandle, format: DrmFourcc) -> io::Result<framebuffer::Handle>;
    /// Remove a framebuffer
    fn remove_framebuffer(&self, fb: framebuffer::Handle) -> io::Result<()>;

    /// Submit an atomic request
    fn atomic_commit(&self, flags: AtomicCommitFlags, properties: &[PropertyTriple]) -> io::Result<()>;
    /// Read all pending page flip completions without blocking
    fn read_flip_events(&self) -> io::Result<Vec<FlipEvent>>;
}

/// Negotiate the capabilities needed for atomic page flipping.
///
/// The device has to report vblank events per crtc, accept universal planes
/// (so the plane can be addressed directly) and accept the atomic api.
pub fn enable_atomic<D: KmsDevice>(device: &D) -> Result<(), Error> {
    match device.driver_capability(DriverCapability::CRTCInVBlankEvent) {
        Ok(value) if value != 0 => {}
        Ok(_) => {
            warn!("Device does not report crtc ids in vblank events");
            return Err(Error::AtomicUnsupported);
        }
        Err(err) => {
            warn!(?err, "Failed to query vblank event capability");
            return Err(Error::AtomicUnsupported);
        }
    }

    device
        .enable_client_capability(ClientCapability::UniversalPlanes)
        .map_err(|source| Error::ClientCapability {
            cap: ClientCapability::UniversalPlanes,
            source,
        })?;

    if let Err(err) = device.enable_client_capability(ClientCapability::Atomic) {
        warn!(?err, "Failed to enable atomic client capability");
        return Err(Error::AtomicUnsupported);
    }

    info!(dev = ?device.dev_path(), "Atomic modesetting enabled");
    Ok(())
}

/// Check that `plane` can scan out `format` on `crtc`.
pub fn check_plane<D: KmsDevice>(
    device: &D,
    crtc: crtc::Handle,
    plane: plane::Handle,
    format: DrmFourcc,
) -> Result<(), Error> {
    let caps = device.plane_capabilities(plane).map_err(|source| {
        Error::Access(AccessError {
            errmsg: "Failed to get plane info",
            dev: device.dev_path(),
            source,
        })
    })?;
    debug!(?plane, crtcs = ?caps.crtcs, formats = caps.formats.len(), "Plane info");

    if !caps.crtcs.contains(&crtc) {
        return Err(Error::PlaneNotCompatible { crtc, plane });
    }
    if !caps.supports(crtc, format) {
        return Err(Error::FormatNotSupported { plane, format });
    }
    Ok(())
}
