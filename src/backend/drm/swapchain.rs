//! Double buffering of frame surfaces
//!
//! The [`SwapChain`] owns exactly two [`FrameSurface`]s. One of them, the *front*,
//! is the surface the display currently scans out (or is about to). The other one
//! is the only surface software may draw into. The front index is only advanced
//! once the hardware confirmed a flip, so the writable surface is never the one
//! referenced by an in-flight commit.

use tracing::trace;

use super::device::KmsDevice;
use super::dumb::FrameSurface;
use super::error::Error;

/// Two frame surfaces and the index of the displayed one
#[derive(Debug)]
pub struct SwapChain<D: KmsDevice> {
    surfaces: [FrameSurface<D>; 2],
    front: usize,
}

impl<D: KmsDevice> SwapChain<D> {
    /// Allocate both surfaces.
    ///
    /// If the second allocation fails the first surface is released again.
    pub fn new(device: &D, size: (u32, u32)) -> Result<Self, Error> {
        let first = FrameSurface::new(device, size)?;
        let second = FrameSurface::new(device, size)?;
        Ok(SwapChain {
            surfaces: [first, second],
            front: 0,
        })
    }

    /// Index of the displayed surface
    pub fn front_index(&self) -> usize {
        self.front
    }

    /// Index of the surface software may write to
    pub fn writable_index(&self) -> usize {
        self.front ^ 1
    }

    /// The displayed surface
    pub fn front(&self) -> &FrameSurface<D> {
        &self.surfaces[self.front]
    }

    /// The surface software may write to
    pub fn writable(&self) -> &FrameSurface<D> {
        &self.surfaces[self.writable_index()]
    }

    /// Mutable access to the surface software may write to
    pub fn writable_mut(&mut self) -> &mut FrameSurface<D> {
        let idx = self.writable_index();
        &mut self.surfaces[idx]
    }

    /// Surface by index
    pub fn surface(&self, idx: usize) -> Option<&FrameSurface<D>> {
        self.surfaces.get(idx)
    }

    /// Make the writable surface the front one.
    ///
    /// Only call this once the device reported the flip to it as completed.
    pub fn flip(&mut self) {
        self.front ^= 1;
        trace!(front = self.front, "Swapped surfaces");
    }

    /// Release both surfaces in creation order
    pub fn release(self) {
        let [first, second] = self.surfaces;
        drop(first);
        drop(second);
    }
}
