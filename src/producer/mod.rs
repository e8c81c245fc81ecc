//! Collaborators driven by a [`FlipSession`](crate::backend::drm::FlipSession)
//!
//! A session never decides what to draw. Once per completed page flip it notifies a
//! [`FlipObserver`] and asks a [`FrameProducer`] to fill the surface that just became
//! writable.
//!
//! Both traits are implemented for closures, which is convenient for small programs and tests:
//!
//! ```
//! use kmsflip::producer::{FlipObserver, FrameProducer};
//!
//! let mut solid = |pixels: &mut [u32], _width: u32, _height: u32| pixels.fill(0xFF00_00FF);
//! let mut frame = [0u32; 4];
//! solid.fill(&mut frame, 2, 2);
//! assert_eq!(frame, [0xFF00_00FF; 4]);
//!
//! let mut flips = 0;
//! let mut counter = || flips += 1;
//! counter.on_flip_completed();
//! assert_eq!(flips, 1);
//! ```

mod pattern;
mod stats;

pub use self::pattern::{Pattern, TestPattern};
pub use self::stats::FpsCounter;

/// Source of frame contents
pub trait FrameProducer {
    /// Fill `pixels` with the next frame.
    ///
    /// `pixels` holds exactly `width * height` packed ARGB8888 values, row by row.
    /// The slice must not be retained past the call.
    fn fill(&mut self, pixels: &mut [u32], width: u32, height: u32);
}

impl<F> FrameProducer for F
where
    F: FnMut(&mut [u32], u32, u32),
{
    fn fill(&mut self, pixels: &mut [u32], width: u32, height: u32) {
        self(pixels, width, height)
    }
}

/// Sink notified once per completed page flip
pub trait FlipObserver {
    /// Called from the flip completion handler, must neither block nor fail
    fn on_flip_completed(&mut self);
}

impl<F> FlipObserver for F
where
    F: FnMut(),
{
    fn on_flip_completed(&mut self) {
        self()
    }
}
