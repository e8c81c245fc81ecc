//! In-memory mode-setting device used by the unit tests
//!
//! The fake records every resource operation and commit in a call log, completes
//! page flips immediately and signals them through an eventfd, so the real
//! calloop based loop can be driven without hardware.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::unix::io::{AsFd, BorrowedFd, OwnedFd};
use std::rc::Rc;
use std::time::Duration;

use drm::control::{connector, crtc, framebuffer, from_u32, plane, AtomicCommitFlags, Mode};
use drm::{ClientCapability, DriverCapability};
use drm_fourcc::DrmFourcc;
use rustix::event::{eventfd, EventfdFlags};
use rustix::io::Errno;

use super::device::{
    DumbHandle, FlipEvent, KmsDevice, ObjectHandle, PlaneCapabilities, PropertyDescriptor, PropertyTriple,
};
use super::session::SessionConfig;

// RUST_LOG=trace shows the session logs of a failing test
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One recorded device operation
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateDumb(u32),
    DestroyDumb(u32),
    Map(u32),
    Unmap(u32),
    AddFb(framebuffer::Handle),
    RmFb(framebuffer::Handle),
    CreateBlob(u64),
    DestroyBlob(u64),
    Commit {
        flags: AtomicCommitFlags,
        entries: Vec<PropertyTriple>,
        accepted: bool,
    },
}

#[derive(Debug)]
struct FakeState {
    atomic_supported: bool,
    atomic_enabled: bool,
    fail_properties: bool,
    fail_event_read: bool,
    fail_commits: u32,
    fail_dumb_at: Option<u32>,
    pitch_padding: u32,
    plane_crtcs: Vec<crtc::Handle>,
    properties: HashMap<ObjectHandle, Vec<PropertyDescriptor>>,
    modes: Vec<Mode>,
    dumb_count: u32,
    next_handle: u32,
    next_fb: u32,
    next_blob: u64,
    frame: u32,
    events: VecDeque<FlipEvent>,
    calls: Vec<Call>,
}

/// Fake [`KmsDevice`] with one connector, one crtc and one plane
#[derive(Debug, Clone)]
pub struct FakeDevice {
    state: Rc<RefCell<FakeState>>,
    notify: Rc<OwnedFd>,
}

fn descriptors(base: u32, names: &[&str]) -> Vec<PropertyDescriptor> {
    names
        .iter()
        .zip(base..)
        .map(|(name, id)| PropertyDescriptor {
            name: name.to_string(),
            handle: from_u32(id).unwrap(),
        })
        .collect()
}

impl FakeDevice {
    pub fn connector() -> connector::Handle {
        from_u32(20).unwrap()
    }

    pub fn crtc() -> crtc::Handle {
        from_u32(31).unwrap()
    }

    pub fn plane() -> plane::Handle {
        from_u32(40).unwrap()
    }

    /// Session configuration addressing the fake's objects
    pub fn session_config(size: (u32, u32)) -> SessionConfig {
        SessionConfig {
            connector: Self::connector(),
            crtc: Self::crtc(),
            plane: Self::plane(),
            size,
            offset: (0, 0),
        }
    }

    pub fn new() -> FakeDevice {
        init_logging();
        let mut properties = HashMap::new();
        properties.insert(
            ObjectHandle::Connector(Self::connector()),
            descriptors(200, &["CRTC_ID", "DPMS", "EDID"]),
        );
        properties.insert(
            ObjectHandle::Crtc(Self::crtc()),
            descriptors(300, &["MODE_ID", "ACTIVE", "OUT_FENCE_PTR"]),
        );
        properties.insert(
            ObjectHandle::Plane(Self::plane()),
            descriptors(
                400,
                &[
                    "FB_ID", "CRTC_ID", "SRC_X", "SRC_Y", "SRC_W", "SRC_H", "CRTC_X", "CRTC_Y", "CRTC_W",
                    "CRTC_H", "zpos", "type",
                ],
            ),
        );

        let notify = eventfd(0, EventfdFlags::CLOEXEC | EventfdFlags::NONBLOCK).unwrap();
        FakeDevice {
            state: Rc::new(RefCell::new(FakeState {
                atomic_supported: true,
                atomic_enabled: false,
                fail_properties: false,
                fail_event_read: false,
                fail_commits: 0,
                fail_dumb_at: None,
                pitch_padding: 0,
                plane_crtcs: vec![Self::crtc()],
                properties,
                modes: vec![unsafe { std::mem::zeroed() }],
                dumb_count: 0,
                next_handle: 1,
                next_fb: 60,
                next_blob: 500,
                frame: 0,
                events: VecDeque::new(),
                calls: Vec::new(),
            })),
            notify: Rc::new(notify),
        }
    }

    pub fn atomic_enabled(&self) -> bool {
        self.state.borrow().atomic_enabled
    }

    pub fn set_atomic_supported(&self, supported: bool) {
        self.state.borrow_mut().atomic_supported = supported;
    }

    pub fn fail_property_enumeration(&self, fail: bool) {
        self.state.borrow_mut().fail_properties = fail;
    }

    pub fn fail_event_read(&self, fail: bool) {
        self.state.borrow_mut().fail_event_read = fail;
    }

    /// Reject the next `count` atomic commits
    pub fn fail_commits(&self, count: u32) {
        self.state.borrow_mut().fail_commits = count;
    }

    /// Fail the dumb allocation with the given zero based index
    pub fn fail_dumb_allocation(&self, index: u32) {
        self.state.borrow_mut().fail_dumb_at = Some(index);
    }

    /// Add row padding to every allocated dumb buffer
    pub fn set_pitch_padding(&self, bytes: u32) {
        self.state.borrow_mut().pitch_padding = bytes;
    }

    pub fn set_plane_crtcs(&self, crtcs: Vec<crtc::Handle>) {
        self.state.borrow_mut().plane_crtcs = crtcs;
    }

    pub fn clear_modes(&self) {
        self.state.borrow_mut().modes.clear();
    }

    pub fn remove_property(&self, object: ObjectHandle, name: &str) {
        if let Some(props) = self.state.borrow_mut().properties.get_mut(&object) {
            props.retain(|desc| desc.name != name);
        }
    }

    /// Resolve a property id of the fake by name
    pub fn property(&self, object: ObjectHandle, name: &str) -> drm::control::property::Handle {
        self.state.borrow().properties[&object]
            .iter()
            .find(|desc| desc.name == name)
            .map(|desc| desc.handle)
            .unwrap()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    /// Flags and entries of every commit the device accepted
    pub fn accepted_commits(&self) -> Vec<(AtomicCommitFlags, Vec<PropertyTriple>)> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Commit {
                    flags,
                    entries,
                    accepted: true,
                } => Some((*flags, entries.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn commit_attempts(&self) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|call| matches!(call, Call::Commit { .. }))
            .count()
    }

    /// Number of completions queued but not yet read
    pub fn queued_events(&self) -> usize {
        self.state.borrow().events.len()
    }

    fn signal(&self) {
        let _ = rustix::io::write(&*self.notify, &1u64.to_ne_bytes());
    }

    fn reset_signal(&self) {
        let mut buf = [0u8; 8];
        let _ = rustix::io::read(&*self.notify, &mut buf);
    }
}

impl AsFd for FakeDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.notify.as_fd()
    }
}

/// Heap backed mapping, logs its unmap on drop
#[derive(Debug)]
pub struct FakeMapping {
    handle: u32,
    data: Vec<u8>,
    state: Rc<RefCell<FakeState>>,
}

impl AsRef<[u8]> for FakeMapping {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl AsMut<[u8]> for FakeMapping {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for FakeMapping {
    fn drop(&mut self) {
        self.state.borrow_mut().calls.push(Call::Unmap(self.handle));
    }
}

impl KmsDevice for FakeDevice {
    type Mapping = FakeMapping;

    fn driver_capability(&self, cap: DriverCapability) -> io::Result<u64> {
        match cap {
            DriverCapability::CRTCInVBlankEvent => Ok(1),
            _ => Ok(0),
        }
    }

    fn enable_client_capability(&self, cap: ClientCapability) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        match cap {
            ClientCapability::Atomic if !state.atomic_supported => Err(Errno::OPNOTSUPP.into()),
            ClientCapability::Atomic => {
                state.atomic_enabled = true;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn object_properties(&self, object: ObjectHandle) -> io::Result<Vec<PropertyDescriptor>> {
        let state = self.state.borrow();
        if state.fail_properties {
            return Err(Errno::IO.into());
        }
        state
            .properties
            .get(&object)
            .cloned()
            .ok_or_else(|| Errno::NOENT.into())
    }

    fn plane_capabilities(&self, plane: plane::Handle) -> io::Result<PlaneCapabilities> {
        if plane != Self::plane() {
            return Err(Errno::NOENT.into());
        }
        Ok(PlaneCapabilities {
            crtcs: self.state.borrow().plane_crtcs.clone(),
            formats: vec![DrmFourcc::Argb8888 as u32, DrmFourcc::Xrgb8888 as u32],
        })
    }

    fn connector_modes(&self, connector: connector::Handle) -> io::Result<Vec<Mode>> {
        if connector != Self::connector() {
            return Err(Errno::NOENT.into());
        }
        Ok(self.state.borrow().modes.clone())
    }

    fn create_mode_blob(&self, _mode: &Mode) -> io::Result<u64> {
        let mut state = self.state.borrow_mut();
        let blob = state.next_blob;
        state.next_blob += 1;
        state.calls.push(Call::CreateBlob(blob));
        Ok(blob)
    }

    fn destroy_blob(&self, blob: u64) -> io::Result<()> {
        self.state.borrow_mut().calls.push(Call::DestroyBlob(blob));
        Ok(())
    }

    fn create_dumb_buffer(&self, (width, height): (u32, u32), bpp: u32) -> io::Result<DumbHandle> {
        let mut state = self.state.borrow_mut();
        let index = state.dumb_count;
        state.dumb_count += 1;
        if state.fail_dumb_at == Some(index) {
            return Err(Errno::NOMEM.into());
        }
        let handle = state.next_handle;
        state.next_handle += 1;
        let pitch = width * bpp / 8 + state.pitch_padding;
        state.calls.push(Call::CreateDumb(handle));
        Ok(DumbHandle {
            handle,
            width,
            height,
            pitch,
            size: pitch as u64 * height as u64,
        })
    }

    fn destroy_dumb_buffer(&self, buffer: &DumbHandle) -> io::Result<()> {
        let handle = buffer.handle;
        self.state.borrow_mut().calls.push(Call::DestroyDumb(handle));
        Ok(())
    }

    fn map_dumb_buffer(&self, buffer: &DumbHandle) -> io::Result<FakeMapping> {
        self.state.borrow_mut().calls.push(Call::Map(buffer.handle));
        Ok(FakeMapping {
            handle: buffer.handle,
            data: vec![0; buffer.size as usize],
            state: self.state.clone(),
        })
    }

    fn add_framebuffer(&self, _buffer: &DumbHandle, _format: DrmFourcc) -> io::Result<framebuffer::Handle> {
        let mut state = self.state.borrow_mut();
        let fb = from_u32(state.next_fb).unwrap();
        state.next_fb += 1;
        state.calls.push(Call::AddFb(fb));
        Ok(fb)
    }

    fn remove_framebuffer(&self, fb: framebuffer::Handle) -> io::Result<()> {
        self.state.borrow_mut().calls.push(Call::RmFb(fb));
        Ok(())
    }

    fn atomic_commit(&self, flags: AtomicCommitFlags, properties: &[PropertyTriple]) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        let accepted = state.fail_commits == 0;
        state.calls.push(Call::Commit {
            flags,
            entries: properties.to_vec(),
            accepted,
        });
        if !accepted {
            state.fail_commits -= 1;
            return Err(Errno::BUSY.into());
        }
        if flags.contains(AtomicCommitFlags::PAGE_FLIP_EVENT) {
            state.frame += 1;
            let frame = state.frame;
            state.events.push_back(FlipEvent {
                crtc: Self::crtc(),
                frame,
                duration: Duration::from_micros(16_667 * frame as u64),
            });
            drop(state);
            self.signal();
        }
        Ok(())
    }

    fn read_flip_events(&self) -> io::Result<Vec<FlipEvent>> {
        if self.state.borrow().fail_event_read {
            return Err(Errno::IO.into());
        }
        self.reset_signal();
        Ok(self.state.borrow_mut().events.drain(..).collect())
    }
}
