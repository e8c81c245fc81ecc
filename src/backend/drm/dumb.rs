//! Memory mapped dumb buffers attached to framebuffers

use std::fmt;

use drm::control::framebuffer;
use drm_fourcc::DrmFourcc;
use tracing::{trace, warn};

use super::device::{DumbHandle, KmsDevice};
use super::error::{AccessError, Error};
use crate::producer::FrameProducer;
use crate::utils::DevPath;

/// Pixel format of every frame surface
pub const SURFACE_FORMAT: DrmFourcc = DrmFourcc::Argb8888;
const BPP: u32 = 32;

#[derive(Debug)]
struct DumbAllocation<D: KmsDevice> {
    handle: DumbHandle,
    device: D,
}

impl<D: KmsDevice> Drop for DumbAllocation<D> {
    fn drop(&mut self) {
        trace!(handle = self.handle.handle, "destroying dumb buffer");
        if let Err(err) = self.device.destroy_dumb_buffer(&self.handle) {
            warn!(handle = self.handle.handle, ?err, "failed to destroy dumb buffer");
        }
    }
}

#[derive(Debug)]
struct Framebuffer<D: KmsDevice> {
    fb: framebuffer::Handle,
    device: D,
}

impl<D: KmsDevice> Drop for Framebuffer<D> {
    fn drop(&mut self) {
        trace!(fb = ?self.fb, "destroying framebuffer");
        if let Err(err) = self.device.remove_framebuffer(self.fb) {
            warn!(fb = ?self.fb, ?err, "failed to destroy framebuffer");
        }
    }
}

/// A dumb buffer, its framebuffer and a writable mapping of it
///
/// Dropping the surface unmaps the memory, removes the framebuffer and frees the
/// allocation, in that order.
pub struct FrameSurface<D: KmsDevice> {
    // field order is drop order
    mapping: D::Mapping,
    framebuffer: Framebuffer<D>,
    allocation: DumbAllocation<D>,
    staging: Vec<u32>,
}

impl<D: KmsDevice> fmt::Debug for FrameSurface<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSurface")
            .field("fb", &self.framebuffer.fb)
            .field("buffer", &self.allocation.handle)
            .finish_non_exhaustive()
    }
}

impl<D: KmsDevice> FrameSurface<D> {
    /// Allocate a `width` x `height` ARGB8888 surface
    pub fn new(device: &D, (width, height): (u32, u32)) -> Result<Self, Error> {
        let access = |errmsg: &'static str| {
            move |source: std::io::Error| {
                Error::Access(AccessError {
                    errmsg,
                    dev: device.dev_path(),
                    source,
                })
            }
        };

        let handle = device
            .create_dumb_buffer((width, height), BPP)
            .map_err(access("Failed to create dumb buffer"))?;
        let allocation = DumbAllocation {
            handle,
            device: device.clone(),
        };

        let fb = device
            .add_framebuffer(&allocation.handle, SURFACE_FORMAT)
            .map_err(access("Failed to add framebuffer"))?;
        let framebuffer = Framebuffer {
            fb,
            device: device.clone(),
        };

        let mapping = device
            .map_dumb_buffer(&allocation.handle)
            .map_err(access("Failed to map dumb buffer"))?;

        trace!(
            ?fb,
            width,
            height,
            pitch = handle.pitch,
            size = handle.size,
            "Created frame surface"
        );
        Ok(FrameSurface {
            mapping,
            framebuffer,
            allocation,
            staging: Vec::new(),
        })
    }

    /// Framebuffer of this surface
    pub fn fb(&self) -> framebuffer::Handle {
        self.framebuffer.fb
    }

    /// Width and height in pixels
    pub fn size(&self) -> (u32, u32) {
        (self.allocation.handle.width, self.allocation.handle.height)
    }

    /// Bytes per row
    pub fn pitch(&self) -> u32 {
        self.allocation.handle.pitch
    }

    /// Size of the allocation in bytes
    pub fn byte_size(&self) -> u64 {
        self.allocation.handle.size
    }

    /// The mapped memory
    pub fn as_bytes(&self) -> &[u8] {
        self.mapping.as_ref()
    }

    /// Let `producer` draw the next frame into this surface.
    ///
    /// Without row padding the producer writes straight into the mapping,
    /// otherwise it draws into a packed staging buffer which is then copied row by row.
    pub fn fill_with(&mut self, producer: &mut dyn FrameProducer) {
        let (width, height) = self.size();
        let pitch = self.pitch() as usize;
        let row_bytes = width as usize * 4;
        let pixels = width as usize * height as usize;
        let mapping = self.mapping.as_mut();

        if pitch == row_bytes {
            if let Some(bytes) = mapping.get_mut(..pixels * 4) {
                // SAFETY: every bit pattern is a valid u32
                let (prefix, direct, _) = unsafe { bytes.align_to_mut::<u32>() };
                if prefix.is_empty() {
                    producer.fill(direct, width, height);
                    return;
                }
            }
        }

        self.staging.resize(pixels, 0);
        producer.fill(&mut self.staging, width, height);
        for (src, dst) in self
            .staging
            .chunks_exact(width as usize)
            .zip(mapping.chunks_mut(pitch))
        {
            for (pixel, out) in src.iter().zip(dst[..row_bytes].chunks_exact_mut(4)) {
                out.copy_from_slice(&pixel.to_ne_bytes());
            }
        }
    }
}
