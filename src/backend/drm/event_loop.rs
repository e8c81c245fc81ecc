//! Waiting on the device for flip completions
//!
//! [`FlipLoop`] wraps a [`calloop::EventLoop`] with the device registered as a
//! level-triggered fd source. Each [`FlipLoop::dispatch_once`] blocks until the
//! device becomes readable (or a rejected flip is due for resubmission) and hands
//! every pending completion to the [`FlipSession`].
//!
//! Further sources, for example a signal handler requesting shutdown, can be added
//! through [`FlipLoop::handle`]. Their callbacks get mutable access to the session.

use calloop::generic::Generic;
use calloop::{EventLoop, Interest, LoopHandle, Mode, PostAction};
use tracing::{debug, error, info};

use super::device::KmsDevice;
use super::error::Error;
use super::session::FlipSession;

/// Event loop driving a [`FlipSession`]
pub struct FlipLoop<D: KmsDevice + 'static> {
    event_loop: EventLoop<'static, FlipSession<D>>,
}

impl<D: KmsDevice + 'static> std::fmt::Debug for FlipLoop<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlipLoop").finish_non_exhaustive()
    }
}

impl<D: KmsDevice + 'static> FlipLoop<D> {
    /// Create a loop listening on the device of `session`
    pub fn new(session: &FlipSession<D>) -> Result<Self, Error> {
        let event_loop = EventLoop::try_new().map_err(Error::EventLoop)?;
        event_loop
            .handle()
            .insert_source(
                Generic::new(session.device().clone(), Interest::READ, Mode::Level),
                |_, _, session: &mut FlipSession<D>| {
                    profiling::scope!("dispatch_flip_events");
                    if let Err(err) = session.dispatch_events() {
                        error!("Failed to dispatch device events: {}", err);
                        session.set_error(err);
                    }
                    Ok(PostAction::Continue)
                },
            )
            .map_err(|err| Error::EventLoop(err.error))?;
        debug!("Registered device with the flip loop");

        Ok(FlipLoop { event_loop })
    }

    /// Handle to insert additional event sources
    pub fn handle(&self) -> LoopHandle<'static, FlipSession<D>> {
        self.event_loop.handle()
    }

    /// Wait once and dispatch everything that became ready.
    ///
    /// Blocks without timeout unless a rejected flip waits for resubmission. Waits
    /// interrupted by a signal are retried inside calloop, any other wait failure and
    /// every error raised while handling events is returned.
    #[profiling::function]
    pub fn dispatch_once(&mut self, session: &mut FlipSession<D>) -> Result<(), Error> {
        let timeout = session.retry_timeout();
        self.event_loop
            .dispatch(timeout, session)
            .map_err(Error::EventLoop)?;

        if let Some(err) = session.take_error() {
            return Err(err);
        }
        session.retry_flip()
    }

    /// Issue the first flip and keep flipping until shutdown is requested.
    ///
    /// Returns `Ok` once [`FlipSession::request_shutdown`] was called, a flip issued
    /// before may still be pending. Any error ends the loop early. In both cases the
    /// session should be handed to [`teardown`](super::teardown) afterwards.
    pub fn run(&mut self, session: &mut FlipSession<D>) -> Result<(), Error> {
        if session.is_shutting_down() {
            return Ok(());
        }
        session.start()?;
        info!("Entering flip loop");
        while !session.is_shutting_down() {
            self.dispatch_once(session)?;
        }
        info!(flips = session.completed_flips(), "Leaving flip loop");
        Ok(())
    }
}
