use std::io;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::sync::Arc;

use drm::buffer::{self, PlanarBuffer};
use drm::control::atomic::AtomicModeReq;
use drm::control::{
    connector, framebuffer, plane, property, AtomicCommitFlags, Device as ControlDevice, Event,
    FbCmd2Flags, Mode,
};
use drm::{ClientCapability, Device as BasicDevice, DriverCapability};
use drm_fourcc::{DrmFourcc, DrmModifier};
use tracing::{error, info, trace, warn};

use super::{
    DumbHandle, FlipEvent, KmsDevice, MemMap, ObjectHandle, PlaneCapabilities, PropertyDescriptor,
    PropertyTriple,
};
use crate::utils::{DevPath, DeviceFd};

#[derive(Debug)]
struct InternalDrmDeviceFd {
    fd: DeviceFd,
    privileged: bool,
}

impl Drop for InternalDrmDeviceFd {
    fn drop(&mut self) {
        info!("Dropping device: {:?}", self.fd.dev_path());
        if self.privileged {
            if let Err(err) = self.release_master_lock() {
                error!("Failed to drop drm master state. Error: {}", err);
            }
        }
    }
}

impl AsFd for InternalDrmDeviceFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
impl BasicDevice for InternalDrmDeviceFd {}
impl ControlDevice for InternalDrmDeviceFd {}

/// Ref-counted file descriptor of an open drm device
#[derive(Debug, Clone)]
pub struct DrmDeviceFd(Arc<InternalDrmDeviceFd>);

impl AsFd for DrmDeviceFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.fd.as_fd()
    }
}

impl AsRawFd for DrmDeviceFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.fd.as_raw_fd()
    }
}

impl DrmDeviceFd {
    /// Create a new `DrmDeviceFd`.
    ///
    /// This function will try to acquire the master lock for the underlying drm device
    /// and release the lock on drop again.
    /// For that reason you should never create multiple `DrmDeviceFd` out of the same
    /// `DeviceFd`, but instead clone the `DrmDeviceFd`.
    pub fn new(fd: DeviceFd) -> DrmDeviceFd {
        let mut dev = InternalDrmDeviceFd {
            fd,
            privileged: false,
        };

        // Newer kernels grant modesetting rights to the first opener anyway,
        // so failing here is not fatal.
        if dev.acquire_master_lock().is_err() {
            warn!("Unable to become drm master, assuming unprivileged mode");
        } else {
            dev.privileged = true;
        }

        DrmDeviceFd(Arc::new(dev))
    }

    /// Returns if the underlying file descriptor holds the master lock
    pub fn is_privileged(&self) -> bool {
        self.0.privileged
    }

    /// Returns the underlying `DeviceFd`
    pub fn device_fd(&self) -> DeviceFd {
        self.0.fd.clone()
    }
}

impl BasicDevice for DrmDeviceFd {}
impl ControlDevice for DrmDeviceFd {}

// Single-plane linear view of a dumb buffer, as needed by `ADDFB2`.
struct PlanarDumbBuffer<'a> {
    buffer: &'a DumbHandle,
    format: DrmFourcc,
}

impl<'a> PlanarBuffer for PlanarDumbBuffer<'a> {
    fn size(&self) -> (u32, u32) {
        (self.buffer.width, self.buffer.height)
    }

    fn format(&self) -> DrmFourcc {
        self.format
    }

    fn modifier(&self) -> Option<DrmModifier> {
        Some(DrmModifier::Linear)
    }

    fn pitches(&self) -> [u32; 4] {
        [self.buffer.pitch, 0, 0, 0]
    }

    fn handles(&self) -> [Option<buffer::Handle>; 4] {
        [drm::control::from_u32(self.buffer.handle), None, None, None]
    }

    fn offsets(&self) -> [u32; 4] {
        [0, 0, 0, 0]
    }
}

fn descriptors<D, H>(device: &D, handle: H) -> io::Result<Vec<PropertyDescriptor>>
where
    D: ControlDevice,
    H: drm::control::ResourceHandle,
{
    let props = device.get_properties(handle)?;
    let (prop_handles, _) = props.as_props_and_values();
    Ok(prop_handles
        .iter()
        .filter_map(|prop| match device.get_property(*prop) {
            Ok(info) => Some(PropertyDescriptor {
                name: info.name().to_string_lossy().into_owned(),
                handle: *prop,
            }),
            Err(err) => {
                trace!(?prop, ?err, "Skipping unreadable property");
                None
            }
        })
        .collect())
}

impl KmsDevice for DrmDeviceFd {
    type Mapping = MemMap;

    fn driver_capability(&self, cap: DriverCapability) -> io::Result<u64> {
        self.get_driver_capability(cap)
    }

    fn enable_client_capability(&self, cap: ClientCapability) -> io::Result<()> {
        self.set_client_capability(cap, true)
    }

    fn object_properties(&self, object: ObjectHandle) -> io::Result<Vec<PropertyDescriptor>> {
        match object {
            ObjectHandle::Connector(handle) => descriptors(self, handle),
            ObjectHandle::Crtc(handle) => descriptors(self, handle),
            ObjectHandle::Plane(handle) => descriptors(self, handle),
        }
    }

    fn plane_capabilities(&self, plane: plane::Handle) -> io::Result<PlaneCapabilities> {
        let info = self.get_plane(plane)?;
        let resources = self.resource_handles()?;
        Ok(PlaneCapabilities {
            crtcs: resources.filter_crtcs(info.possible_crtcs()),
            formats: info.formats().to_vec(),
        })
    }

    fn connector_modes(&self, connector: connector::Handle) -> io::Result<Vec<Mode>> {
        Ok(self.get_connector(connector, false)?.modes().to_vec())
    }

    fn create_mode_blob(&self, mode: &Mode) -> io::Result<u64> {
        match self.create_property_blob(mode)? {
            property::Value::Blob(id) => Ok(id),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected property blob value {:?}", other),
            )),
        }
    }

    fn destroy_blob(&self, blob: u64) -> io::Result<()> {
        self.destroy_property_blob(blob)
    }

    fn create_dumb_buffer(&self, (width, height): (u32, u32), bpp: u32) -> io::Result<DumbHandle> {
        let dumb = drm_ffi::mode::dumbbuffer::create(self.as_fd(), width, height, bpp, 0)?;
        Ok(DumbHandle {
            handle: dumb.handle,
            width,
            height,
            pitch: dumb.pitch,
            size: dumb.size,
        })
    }

    fn destroy_dumb_buffer(&self, buffer: &DumbHandle) -> io::Result<()> {
        drm_ffi::mode::dumbbuffer::destroy(self.as_fd(), buffer.handle).map(|_| ())
    }

    fn map_dumb_buffer(&self, buffer: &DumbHandle) -> io::Result<MemMap> {
        let map = drm_ffi::mode::dumbbuffer::map(self.as_fd(), buffer.handle, 0, 0)?;
        let len = usize::try_from(buffer.size)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "dumb buffer too large to map"))?;
        MemMap::new(self.as_fd(), len, map.offset)
    }

    fn add_framebuffer(&self, buffer: &DumbHandle, format: DrmFourcc) -> io::Result<framebuffer::Handle> {
        self.add_planar_framebuffer(&PlanarDumbBuffer { buffer, format }, FbCmd2Flags::MODIFIERS)
    }

    fn remove_framebuffer(&self, fb: framebuffer::Handle) -> io::Result<()> {
        self.destroy_framebuffer(fb)
    }

    fn atomic_commit(&self, flags: AtomicCommitFlags, properties: &[PropertyTriple]) -> io::Result<()> {
        let mut req = AtomicModeReq::new();
        for &(object, prop, value) in properties {
            req.add_raw_property(object, prop, value);
        }
        ControlDevice::atomic_commit(self, flags, req)
    }

    fn read_flip_events(&self) -> io::Result<Vec<FlipEvent>> {
        let events = match self.receive_events() {
            Ok(events) => events,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        Ok(events
            .filter_map(|event| match event {
                Event::PageFlip(event) => Some(FlipEvent {
                    crtc: event.crtc,
                    frame: event.frame,
                    duration: event.duration,
                }),
                _ => {
                    trace!("Got a non-page-flip event of device '{:?}'.", self.dev_path());
                    None
                }
            })
            .collect())
    }
}
