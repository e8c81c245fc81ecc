//! Ordered release of a [`FlipSession`]
//!
//! Resources have to be released in the reverse order of their dependencies, and
//! nothing may be released while the display could still read it. [`teardown`]
//! therefore first waits for an in-flight flip, then detaches the plane and only
//! afterwards frees the surfaces, the mode blob and the property caches.
//!
//! Every step runs regardless of the outcome of the previous ones, failures are
//! logged and collected in the returned [`TeardownReport`].

use tracing::{debug, error, info, warn};

use super::device::KmsDevice;
use super::error::Error;
use super::event_loop::FlipLoop;
use super::session::FlipSession;

/// Outcome of a [`teardown`]
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Flip completions consumed while waiting for the in-flight flip
    pub drained_flips: u64,
    /// Waiting for the in-flight flip failed
    pub drain_error: Option<Error>,
    /// The plane could not be detached
    pub unbind_error: Option<Error>,
    /// Whether frame surfaces were released by this teardown
    pub surfaces_released: bool,
    /// Whether the mode blob was released by this teardown
    pub mode_blob_released: bool,
    /// Whether the property caches were released by this teardown
    pub objects_released: bool,
}

impl TeardownReport {
    /// Returns true if no step failed
    pub fn is_clean(&self) -> bool {
        self.drain_error.is_none() && self.unbind_error.is_none()
    }
}

/// Release everything a session holds.
///
/// Requests shutdown, dispatches events through `flip_loop` until no flip is in
/// flight, detaches the plane with a nonblocking commit, releases both frame surfaces
/// in creation order, destroys the mode blob and finally drops the cached properties.
///
/// Without a loop an in-flight flip cannot be awaited; this is logged and teardown
/// continues. Calling this again on a released session is a no-op apart from the
/// unbind attempt failing with [`Error::ShuttingDown`].
pub fn teardown<D: KmsDevice + 'static>(
    session: &mut FlipSession<D>,
    flip_loop: Option<&mut FlipLoop<D>>,
) -> TeardownReport {
    let span = session.span().clone();
    let _guard = span.enter();
    let mut report = TeardownReport::default();

    session.request_shutdown();

    let before = session.completed_flips();
    match flip_loop {
        Some(flip_loop) => {
            while session.flip_pending() {
                if let Err(err) = flip_loop.dispatch_once(session) {
                    error!("Failed waiting for pending flip: {}", err);
                    report.drain_error = Some(err);
                    break;
                }
            }
        }
        None if session.flip_pending() => {
            warn!("No event loop to wait for the pending flip");
        }
        None => {}
    }
    report.drained_flips = session.completed_flips() - before;
    debug!(drained = report.drained_flips, "Drained pending flips");

    if let Err(err) = session.unbind_plane() {
        warn!("Failed to detach plane: {}", err);
        report.unbind_error = Some(err);
    }

    report.surfaces_released = session.release_surfaces();
    report.mode_blob_released = session.release_mode_blob();
    report.objects_released = session.release_objects();

    info!(clean = report.is_clean(), "Session torn down");
    report
}
