//! The flip session: one connector, crtc and plane showing a double buffered image
//!
//! A [`FlipSession`] owns every resource needed to keep a plane updated: the three
//! [`DisplayObject`]s with their property caches, the mode blob and a [`SwapChain`].
//! It implements the page flip protocol:
//!
//! - [`FlipSession::modeset`] commits the mode once, showing surface `0`,
//! - [`FlipSession::start`] issues the first nonblocking flip to surface `1`,
//! - every flip completion read by [`FlipSession::dispatch_events`] advances the front
//!   index, notifies the [`FlipObserver`], lets the [`FrameProducer`] draw into the
//!   surface that became writable and flips to it.
//!
//! At most one flip is in flight at any time and the front index only changes once the
//! hardware reported the flip as done, so software never draws into a surface the
//! display might still read.
//!
//! Waiting for completions is left to a [`FlipLoop`](super::FlipLoop), releasing the
//! session in the right order to [`teardown`](super::teardown).

use std::fmt;
use std::time::{Duration, Instant};

use drm::control::{connector, crtc, plane};
use tracing::{debug, error, info, info_span, instrument, trace, warn};

use super::atomic::{
    append_modeset, append_plane_config, append_plane_unbind, AtomicRequest, CommitMode, PlaneConfig,
};
use super::device::{check_plane, FlipEvent, KmsDevice, ObjectHandle};
use super::dumb::SURFACE_FORMAT;
use super::error::{AccessError, Error};
use super::properties::DisplayObject;
use super::swapchain::SwapChain;
use crate::producer::{FlipObserver, FrameProducer};
use crate::utils::DevPath;

/// Static configuration of a [`FlipSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Connector to drive
    pub connector: connector::Handle,
    /// Crtc to route the connector and plane to
    pub crtc: crtc::Handle,
    /// Plane to scan out the frame surfaces
    pub plane: plane::Handle,
    /// Size of the frame surfaces in pixels
    pub size: (u32, u32),
    /// Position of the surfaces on the crtc
    pub offset: (i32, i32),
}

/// What to do if the device rejects a page flip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlipRetryPolicy {
    /// Number of rejected flips in a row before giving up
    pub max_consecutive_failures: u32,
    /// Time to wait before resubmitting a rejected flip
    pub retry_delay: Duration,
}

impl Default for FlipRetryPolicy {
    fn default() -> Self {
        FlipRetryPolicy {
            max_consecutive_failures: 8,
            retry_delay: Duration::from_millis(16),
        }
    }
}

#[derive(Debug)]
struct ModeBlob<D: KmsDevice> {
    id: u64,
    device: D,
}

impl<D: KmsDevice> Drop for ModeBlob<D> {
    fn drop(&mut self) {
        trace!(blob = self.id, "destroying mode blob");
        if let Err(err) = self.device.destroy_blob(self.id) {
            warn!(blob = self.id, ?err, "failed to destroy mode blob");
        }
    }
}

#[derive(Debug)]
struct DisplayObjects {
    connector: DisplayObject,
    crtc: DisplayObject,
    plane: DisplayObject,
}

impl DisplayObjects {
    fn load<D: KmsDevice>(device: &D, config: &SessionConfig) -> Result<Self, Error> {
        Ok(DisplayObjects {
            connector: DisplayObject::load(device, ObjectHandle::Connector(config.connector))?,
            crtc: DisplayObject::load(device, ObjectHandle::Crtc(config.crtc))?,
            plane: DisplayObject::load(device, ObjectHandle::Plane(config.plane))?,
        })
    }
}

/// Page flipping state of a single plane
pub struct FlipSession<D: KmsDevice> {
    // field order is drop order
    swapchain: Option<SwapChain<D>>,
    mode_blob: Option<ModeBlob<D>>,
    objects: Option<DisplayObjects>,
    device: D,
    config: SessionConfig,
    policy: FlipRetryPolicy,
    producer: Box<dyn FrameProducer>,
    observer: Box<dyn FlipObserver>,
    flip_pending: bool,
    shutting_down: bool,
    completed_flips: u64,
    consecutive_failures: u32,
    retry_at: Option<Instant>,
    error: Option<Error>,
    span: tracing::Span,
}

impl<D: KmsDevice> fmt::Debug for FlipSession<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlipSession")
            .field("device", &self.device)
            .field("config", &self.config)
            .field("swapchain", &self.swapchain)
            .field("mode_blob", &self.mode_blob.as_ref().map(|blob| blob.id))
            .field("flip_pending", &self.flip_pending)
            .field("shutting_down", &self.shutting_down)
            .field("consecutive_failures", &self.consecutive_failures)
            .finish_non_exhaustive()
    }
}

impl<D: KmsDevice> FlipSession<D> {
    /// Set up a session.
    ///
    /// Checks that the plane can scan out ARGB8888 on the crtc before touching
    /// anything else, then loads the properties of all three objects, uploads the
    /// preferred mode of the connector and allocates both frame surfaces.
    /// Anything already created is released again if a later step fails.
    ///
    /// The atomic api has to be enabled on `device` beforehand, see
    /// [`enable_atomic`](super::enable_atomic).
    pub fn new(
        device: D,
        config: SessionConfig,
        producer: Box<dyn FrameProducer>,
        observer: Box<dyn FlipObserver>,
        policy: FlipRetryPolicy,
    ) -> Result<Self, Error> {
        let span = info_span!("flip_session", crtc = ?config.crtc, plane = ?config.plane);
        let _guard = span.enter();
        info!(
            "Initializing flip session ({:?}:{:?}:{:?}) with {}x{} surfaces at {:?}",
            config.connector, config.crtc, config.plane, config.size.0, config.size.1, config.offset
        );

        check_plane(&device, config.crtc, config.plane, SURFACE_FORMAT)?;
        let objects = DisplayObjects::load(&device, &config)?;

        let modes = device.connector_modes(config.connector).map_err(|source| {
            Error::Access(AccessError {
                errmsg: "Error loading connector info",
                dev: device.dev_path(),
                source,
            })
        })?;
        let mode = *modes.first().ok_or(Error::NoMode(config.connector))?;
        debug!(?mode, "Using connector mode");
        let id = device.create_mode_blob(&mode).map_err(|source| {
            Error::Access(AccessError {
                errmsg: "Failed to create Property Blob for mode",
                dev: device.dev_path(),
                source,
            })
        })?;
        let mode_blob = ModeBlob {
            id,
            device: device.clone(),
        };

        let swapchain = SwapChain::new(&device, config.size)?;

        drop(_guard);
        Ok(FlipSession {
            swapchain: Some(swapchain),
            mode_blob: Some(mode_blob),
            objects: Some(objects),
            device,
            config,
            policy,
            producer,
            observer,
            flip_pending: false,
            shutting_down: false,
            completed_flips: 0,
            consecutive_failures: 0,
            retry_at: None,
            error: None,
            span,
        })
    }

    /// Device this session runs on
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Configuration of this session
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The frame surfaces, `None` once released by teardown
    pub fn swapchain(&self) -> Option<&SwapChain<D>> {
        self.swapchain.as_ref()
    }

    /// Index of the displayed surface
    pub fn front_index(&self) -> Option<usize> {
        self.swapchain.as_ref().map(SwapChain::front_index)
    }

    /// Whether a flip commit is in flight
    pub fn flip_pending(&self) -> bool {
        self.flip_pending
    }

    /// Whether shutdown was requested
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Number of flip completions handled so far
    pub fn completed_flips(&self) -> u64 {
        self.completed_flips
    }

    /// Whether a rejected flip waits to be resubmitted
    pub fn retry_pending(&self) -> bool {
        self.retry_at.is_some()
    }

    pub(super) fn span(&self) -> &tracing::Span {
        &self.span
    }

    fn parts(&self) -> Result<(&DisplayObjects, &SwapChain<D>), Error> {
        match (self.objects.as_ref(), self.swapchain.as_ref()) {
            (Some(objects), Some(swapchain)) => Ok((objects, swapchain)),
            _ => Err(Error::ShuttingDown),
        }
    }

    fn plane_config(&self, swapchain: &SwapChain<D>, idx: usize) -> Option<PlaneConfig> {
        swapchain.surface(idx).map(|surface| PlaneConfig {
            fb: surface.fb(),
            crtc: self.config.crtc,
            size: self.config.size,
            offset: self.config.offset,
        })
    }

    /// Route connector, crtc and plane together and show the front surface.
    ///
    /// This is the only blocking commit of a session.
    #[instrument(level = "debug", parent = &self.span, skip(self))]
    pub fn modeset(&mut self) -> Result<(), Error> {
        let (objects, swapchain) = self.parts()?;
        let blob = self.mode_blob.as_ref().ok_or(Error::ShuttingDown)?;
        let config = self
            .plane_config(swapchain, swapchain.front_index())
            .ok_or(Error::ShuttingDown)?;

        let crtc = self.config.crtc;
        let mut req = AtomicRequest::new();
        append_modeset(&mut req, &objects.connector, &objects.crtc, crtc, blob.id)?;
        append_plane_config(&mut req, &objects.plane, &config)?;
        req.submit(&self.device, CommitMode::Blocking)?;

        info!(front = swapchain.front_index(), "Modeset committed");
        Ok(())
    }

    /// Queue a nonblocking flip to the writable surface.
    ///
    /// Fails with [`Error::FlipPending`] if a flip is already in flight and with
    /// [`Error::ShuttingDown`] once shutdown was requested, in both cases without
    /// touching the device. On success the flip is pending until its completion is
    /// dispatched.
    #[profiling::function]
    #[instrument(level = "trace", parent = &self.span, skip(self))]
    pub fn request_flip(&mut self) -> Result<(), Error> {
        if self.shutting_down {
            return Err(Error::ShuttingDown);
        }
        if self.flip_pending {
            return Err(Error::FlipPending(self.config.crtc));
        }

        let (objects, swapchain) = self.parts()?;
        let target = swapchain.writable_index();
        let config = self.plane_config(swapchain, target).ok_or(Error::ShuttingDown)?;

        let mut req = AtomicRequest::new();
        append_plane_config(&mut req, &objects.plane, &config)?;
        req.submit(&self.device, CommitMode::Nonblocking { event: true })?;

        trace!(target, fb = ?config.fb, "Page flip queued");
        self.flip_pending = true;
        Ok(())
    }

    // Flip and apply the retry policy to commits the device rejects
    fn flip_or_schedule_retry(&mut self) -> Result<(), Error> {
        match self.request_flip() {
            Ok(()) => {
                self.consecutive_failures = 0;
                self.retry_at = None;
                Ok(())
            }
            Err(Error::Access(err)) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.policy.max_consecutive_failures {
                    error!(
                        failures = self.consecutive_failures,
                        "Page flip rejected, giving up: {}", err
                    );
                    self.retry_at = None;
                    return Err(Error::FlipRetriesExhausted(self.consecutive_failures));
                }
                warn!(
                    failures = self.consecutive_failures,
                    delay = ?self.policy.retry_delay,
                    "Page flip rejected, retrying: {}", err
                );
                self.retry_at = Some(Instant::now() + self.policy.retry_delay);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Issue the first flip.
    ///
    /// Call this once after [`FlipSession::modeset`]. The first flip shows whatever the
    /// writable surface contains, the producer is first asked for a frame once that
    /// flip completed.
    pub fn start(&mut self) -> Result<(), Error> {
        let span = self.span.clone();
        let _guard = span.enter();
        debug!("Starting page flip cycle");
        self.flip_or_schedule_retry()
    }

    /// Time until a rejected flip should be resubmitted
    pub fn retry_timeout(&self) -> Option<Duration> {
        self.retry_at
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Resubmit a rejected flip once its retry delay passed.
    ///
    /// The same surface is flipped to again, the producer is not invoked.
    pub fn retry_flip(&mut self) -> Result<(), Error> {
        let due = matches!(self.retry_at, Some(deadline) if deadline <= Instant::now());
        if !due || self.shutting_down || self.flip_pending {
            return Ok(());
        }
        let span = self.span.clone();
        let _guard = span.enter();
        self.retry_at = None;
        debug!(failures = self.consecutive_failures, "Resubmitting page flip");
        self.flip_or_schedule_retry()
    }

    /// Read and handle every pending device event
    #[profiling::function]
    pub fn dispatch_events(&mut self) -> Result<(), Error> {
        let events = self.device.read_flip_events().map_err(|source| {
            Error::Access(AccessError {
                errmsg: "Error processing drm events",
                dev: self.device.dev_path(),
                source,
            })
        })?;

        for event in events {
            if event.crtc != self.config.crtc {
                trace!(crtc = ?event.crtc, "Ignoring flip of unrelated crtc");
                continue;
            }
            self.on_flip_complete(event)?;
        }
        Ok(())
    }

    fn on_flip_complete(&mut self, event: FlipEvent) -> Result<(), Error> {
        let span = self.span.clone();
        let _guard = span.enter();
        if !self.flip_pending {
            warn!(frame = event.frame, "Flip completion without a pending flip");
            return Ok(());
        }
        trace!(frame = event.frame, duration = ?event.duration, "Page flip completed");

        self.flip_pending = false;
        self.completed_flips += 1;
        if let Some(swapchain) = self.swapchain.as_mut() {
            swapchain.flip();
        }
        self.observer.on_flip_completed();

        if self.shutting_down {
            return Ok(());
        }

        if let Some(swapchain) = self.swapchain.as_mut() {
            swapchain.writable_mut().fill_with(&mut *self.producer);
        }
        self.flip_or_schedule_retry()
    }

    /// Stop issuing flips.
    ///
    /// An in-flight flip still completes and is dispatched normally.
    pub fn request_shutdown(&mut self) {
        if !self.shutting_down {
            let _guard = self.span.enter();
            info!(pending = self.flip_pending, "Shutdown requested");
        }
        self.shutting_down = true;
        self.retry_at = None;
    }

    pub(super) fn set_error(&mut self, err: Error) {
        if self.error.is_none() {
            self.error = Some(err);
        } else {
            warn!(?err, "Dropping additional dispatch error");
        }
    }

    /// Error raised while dispatching events inside the event loop
    pub fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    /// Detach the plane from framebuffer and crtc, without waiting for completion
    pub(super) fn unbind_plane(&self) -> Result<(), Error> {
        let objects = self.objects.as_ref().ok_or(Error::ShuttingDown)?;
        let mut req = AtomicRequest::new();
        append_plane_unbind(&mut req, &objects.plane)?;
        req.submit(&self.device, CommitMode::Nonblocking { event: false })
    }

    pub(super) fn release_surfaces(&mut self) -> bool {
        match self.swapchain.take() {
            Some(swapchain) => {
                swapchain.release();
                true
            }
            None => false,
        }
    }

    pub(super) fn release_mode_blob(&mut self) -> bool {
        self.mode_blob.take().is_some()
    }

    pub(super) fn release_objects(&mut self) -> bool {
        match self.objects.take() {
            Some(DisplayObjects {
                connector,
                crtc,
                plane,
            }) => {
                connector.release();
                crtc.release();
                plane.release();
                true
            }
            None => false,
        }
    }
}

impl<D: KmsDevice> Drop for FlipSession<D> {
    fn drop(&mut self) {
        // already torn down
        if self.objects.is_none() {
            return;
        }
        let span = self.span.clone();
        let _guard = span.enter();
        self.request_shutdown();
        if self.flip_pending {
            warn!("Dropping session with an undrained page flip");
        }
        if let Err(err) = self.unbind_plane() {
            warn!("Failed to detach plane on drop: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    use drm::control::{from_u32, AtomicCommitFlags, RawResourceHandle};

    use super::*;
    use crate::backend::drm::device::PropertyTriple;
    use crate::backend::drm::test::{Call, FakeDevice};

    fn config() -> SessionConfig {
        FakeDevice::session_config((640, 512))
    }

    type Counter = Rc<RefCell<u32>>;

    fn session_with(
        device: &FakeDevice,
        policy: FlipRetryPolicy,
    ) -> (FlipSession<FakeDevice>, Counter, Counter) {
        let produced = Rc::new(RefCell::new(0));
        let completed = Rc::new(RefCell::new(0));
        let (p, c) = (produced.clone(), completed.clone());
        let session = FlipSession::new(
            device.clone(),
            config(),
            Box::new(move |_: &mut [u32], _: u32, _: u32| *p.borrow_mut() += 1),
            Box::new(move || *c.borrow_mut() += 1),
            policy,
        )
        .unwrap();
        (session, produced, completed)
    }

    fn flip_target(device: &FakeDevice, entries: &[PropertyTriple]) -> u64 {
        let fb_id = device.property(ObjectHandle::Plane(FakeDevice::plane()), "FB_ID");
        entries
            .iter()
            .find(|(_, prop, _)| *prop == fb_id)
            .map(|(_, _, v)| *v)
            .unwrap()
    }

    fn fb_of(session: &FlipSession<FakeDevice>, idx: usize) -> u64 {
        let fb = session.swapchain().unwrap().surface(idx).unwrap().fb();
        RawResourceHandle::from(fb).get() as u64
    }

    #[test]
    fn modeset_and_first_flips() {
        let device = FakeDevice::new();
        let (mut session, produced, completed) = session_with(&device, FlipRetryPolicy::default());

        session.modeset().unwrap();
        assert_eq!(session.front_index(), Some(0));
        let commits = device.accepted_commits();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].0, AtomicCommitFlags::ALLOW_MODESET);
        assert_eq!(flip_target(&device, &commits[0].1), fb_of(&session, 0));

        session.start().unwrap();
        assert!(session.flip_pending());
        let commits = device.accepted_commits();
        let flip = AtomicCommitFlags::NONBLOCK | AtomicCommitFlags::PAGE_FLIP_EVENT;
        assert!(commits[1].0.contains(flip));
        assert_eq!(flip_target(&device, &commits[1].1), fb_of(&session, 1));

        session.dispatch_events().unwrap();
        assert_eq!(session.front_index(), Some(1));
        assert!(session.flip_pending());
        assert_eq!(*produced.borrow(), 1);
        assert_eq!(*completed.borrow(), 1);
        let commits = device.accepted_commits();
        assert_eq!(commits.len(), 3);
        assert_eq!(flip_target(&device, &commits[2].1), fb_of(&session, 0));
    }

    #[test]
    fn front_index_alternates() {
        let device = FakeDevice::new();
        let (mut session, produced, _) = session_with(&device, FlipRetryPolicy::default());
        session.modeset().unwrap();
        session.start().unwrap();
        for n in 1..=10 {
            session.dispatch_events().unwrap();
            assert_eq!(session.front_index(), Some(n % 2));
            let swapchain = session.swapchain().unwrap();
            assert_ne!(swapchain.front().fb(), swapchain.writable().fb());
        }
        assert_eq!(*produced.borrow(), 10);
        assert_eq!(session.completed_flips(), 10);
    }

    #[test]
    fn second_flip_while_pending_is_rejected() {
        let device = FakeDevice::new();
        let (mut session, _, _) = session_with(&device, FlipRetryPolicy::default());
        session.modeset().unwrap();
        session.start().unwrap();
        let attempts = device.commit_attempts();

        assert!(matches!(session.request_flip(), Err(Error::FlipPending(_))));
        assert_eq!(device.commit_attempts(), attempts);
        assert!(session.flip_pending());
    }

    #[test]
    fn no_flips_after_shutdown() {
        let device = FakeDevice::new();
        let (mut session, produced, completed) = session_with(&device, FlipRetryPolicy::default());
        session.modeset().unwrap();
        session.start().unwrap();
        session.request_shutdown();
        let attempts = device.commit_attempts();

        assert!(matches!(session.request_flip(), Err(Error::ShuttingDown)));
        session.dispatch_events().unwrap();
        // the pending flip still completes and is applied
        assert!(!session.flip_pending());
        assert_eq!(session.front_index(), Some(1));
        assert_eq!(*completed.borrow(), 1);
        assert_eq!(*produced.borrow(), 0);
        assert_eq!(device.commit_attempts(), attempts);
    }

    #[test]
    fn rejected_flip_is_retried_on_the_same_surface() {
        let device = FakeDevice::new();
        let policy = FlipRetryPolicy {
            max_consecutive_failures: 8,
            retry_delay: Duration::ZERO,
        };
        let (mut session, produced, _) = session_with(&device, policy);
        session.modeset().unwrap();

        device.fail_commits(2);
        session.start().unwrap();
        assert!(!session.flip_pending());
        assert!(session.retry_pending());
        assert_eq!(session.front_index(), Some(0));

        session.retry_flip().unwrap();
        assert!(session.retry_pending());
        session.retry_flip().unwrap();
        assert!(!session.retry_pending());
        assert!(session.flip_pending());

        let commits = device.calls();
        let targets = commits
            .iter()
            .filter_map(|call| match call {
                Call::Commit { flags, entries, .. } if flags.contains(AtomicCommitFlags::PAGE_FLIP_EVENT) => {
                    Some(flip_target(&device, entries))
                }
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(targets, vec![fb_of(&session, 1); 3]);
        assert_eq!(*produced.borrow(), 0);
    }

    #[test]
    fn retries_are_exhausted() {
        let device = FakeDevice::new();
        let policy = FlipRetryPolicy {
            max_consecutive_failures: 3,
            retry_delay: Duration::ZERO,
        };
        let (mut session, _, _) = session_with(&device, policy);
        session.modeset().unwrap();
        session.start().unwrap();

        device.fail_commits(u32::MAX);
        session.dispatch_events().unwrap();
        session.retry_flip().unwrap();
        assert!(matches!(session.retry_flip(), Err(Error::FlipRetriesExhausted(3))));
        assert!(!session.retry_pending());
        assert!(!session.flip_pending());
    }

    #[test]
    fn retry_waits_for_its_delay() {
        let device = FakeDevice::new();
        let policy = FlipRetryPolicy {
            max_consecutive_failures: 8,
            retry_delay: Duration::from_secs(3600),
        };
        let (mut session, _, _) = session_with(&device, policy);
        session.modeset().unwrap();
        device.fail_commits(1);
        session.start().unwrap();
        let attempts = device.commit_attempts();
        session.retry_flip().unwrap();
        assert_eq!(device.commit_attempts(), attempts);
        assert!(session.retry_timeout().unwrap() > Duration::from_secs(3000));
    }

    #[test]
    fn incompatible_plane_fails_before_allocation() {
        let device = FakeDevice::new();
        device.set_plane_crtcs(vec![from_u32(32).unwrap()]);
        let err = FlipSession::new(
            device.clone(),
            config(),
            Box::new(|_: &mut [u32], _: u32, _: u32| {}),
            Box::new(|| {}),
            FlipRetryPolicy::default(),
        )
        .unwrap_err();
        assert!(err.is_plane_error());
        assert!(device.calls().is_empty());
    }

    #[test]
    fn connector_without_mode() {
        let device = FakeDevice::new();
        device.clear_modes();
        let err = FlipSession::new(
            device.clone(),
            config(),
            Box::new(|_: &mut [u32], _: u32, _: u32| {}),
            Box::new(|| {}),
            FlipRetryPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::NoMode(_)));
        assert!(device.calls().is_empty());
    }

    #[test]
    fn failed_second_surface_unwinds_setup() {
        let device = FakeDevice::new();
        device.fail_dumb_allocation(1);
        let result = FlipSession::new(
            device.clone(),
            config(),
            Box::new(|_: &mut [u32], _: u32, _: u32| {}),
            Box::new(|| {}),
            FlipRetryPolicy::default(),
        );
        assert!(matches!(result, Err(Error::Access(_))));

        let calls = device.calls();
        assert_eq!(
            calls[calls.len() - 4..],
            [
                Call::Unmap(1),
                Call::RmFb(from_u32(60).unwrap()),
                Call::DestroyDumb(1),
                Call::DestroyBlob(500),
            ]
        );
    }

    #[test]
    fn missing_mandatory_property_aborts_setup() {
        let device = FakeDevice::new();
        device.remove_property(ObjectHandle::Plane(FakeDevice::plane()), "SRC_W");
        let result = FlipSession::new(
            device.clone(),
            config(),
            Box::new(|_: &mut [u32], _: u32, _: u32| {}),
            Box::new(|| {}),
            FlipRetryPolicy::default(),
        );
        assert!(matches!(result, Err(Error::UnknownProperty { name: "SRC_W", .. })));
        assert!(device.calls().is_empty());
    }

    #[test]
    fn dropping_a_session_releases_everything() {
        let device = FakeDevice::new();
        let (session, _, _) = session_with(&device, FlipRetryPolicy::default());
        device.clear_calls();
        drop(session);
        let calls = device.calls();
        assert_eq!(calls.len(), 8);
        assert!(matches!(
            &calls[0],
            Call::Commit { flags, accepted: true, .. } if *flags == AtomicCommitFlags::NONBLOCK
        ));
        assert_eq!(calls[7], Call::DestroyBlob(500));
    }

    #[test]
    fn dropping_a_flipping_session_detaches_the_plane_first() {
        let device = FakeDevice::new();
        let (mut session, _, _) = session_with(&device, FlipRetryPolicy::default());
        session.modeset().unwrap();
        session.start().unwrap();
        assert!(session.flip_pending());
        device.clear_calls();

        drop(session);
        let calls = device.calls();
        let unbind = calls
            .iter()
            .position(|call| {
                matches!(call, Call::Commit { flags, .. } if *flags == AtomicCommitFlags::NONBLOCK)
            })
            .unwrap();
        let first_rmfb = calls
            .iter()
            .position(|call| matches!(call, Call::RmFb(_)))
            .unwrap();
        assert!(unbind < first_rmfb);
        let commits = calls
            .iter()
            .filter(|call| matches!(call, Call::Commit { .. }))
            .count();
        assert_eq!(commits, 1);
    }

    #[test]
    fn dropping_after_teardown_issues_nothing() {
        let device = FakeDevice::new();
        let (mut session, _, _) = session_with(&device, FlipRetryPolicy::default());
        session.modeset().unwrap();
        crate::backend::drm::teardown(&mut session, None);
        device.clear_calls();

        drop(session);
        assert!(device.calls().is_empty());
    }
}
