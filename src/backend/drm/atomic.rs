//! Atomic request assembly and submission
//!
//! A request is a list of (object, property, value) triples which the kernel
//! applies all together or not at all.

use drm::control::property::Value;
use drm::control::{crtc, framebuffer, AtomicCommitFlags};
use tracing::{debug, instrument, trace};

use super::device::{KmsDevice, PropertyTriple};
use super::error::{AccessError, Error};
use super::properties::{DisplayObject, PropertyKind};
use crate::utils::DevPath;

/// How a request is handed to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Wait for completion, allowing a full modeset
    Blocking,
    /// Return immediately, the device applies the request on the next vblank
    Nonblocking {
        /// Request a page flip completion event
        event: bool,
    },
}

impl CommitMode {
    /// Commit flags used for this mode
    pub fn flags(self) -> AtomicCommitFlags {
        match self {
            CommitMode::Blocking => AtomicCommitFlags::ALLOW_MODESET,
            CommitMode::Nonblocking { event: true } => {
                AtomicCommitFlags::NONBLOCK | AtomicCommitFlags::PAGE_FLIP_EVENT
            }
            CommitMode::Nonblocking { event: false } => AtomicCommitFlags::NONBLOCK,
        }
    }
}

/// One indivisible set of property writes
#[derive(Debug, Default, Clone)]
pub struct AtomicRequest {
    entries: Vec<PropertyTriple>,
}

impl AtomicRequest {
    /// Create an empty request
    pub fn new() -> Self {
        AtomicRequest::default()
    }

    /// Add a property write for `object`.
    ///
    /// Fails with [`Error::UnknownProperty`] if the object lacks a mandatory
    /// property. Optional properties the object lacks are skipped.
    pub fn append(
        &mut self,
        object: &DisplayObject,
        kind: PropertyKind,
        value: Value<'_>,
    ) -> Result<&mut Self, Error> {
        match object.property(kind) {
            Some(prop) => {
                self.entries.push((object.handle().raw(), prop, value.into()));
            }
            None if kind.is_optional() => {
                debug!(object = ?object.handle(), "Skipping unsupported {} property", kind.name());
            }
            None => {
                return Err(Error::UnknownProperty {
                    handle: object.handle().raw(),
                    name: kind.name(),
                });
            }
        }
        Ok(self)
    }

    /// The triples collected so far
    pub fn entries(&self) -> &[PropertyTriple] {
        &self.entries
    }

    /// Returns true if nothing has been appended yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hand the request to the device
    #[profiling::function]
    #[instrument(level = "trace", skip_all, fields(entries = self.entries.len(), ?mode))]
    pub fn submit<D: KmsDevice>(&self, device: &D, mode: CommitMode) -> Result<(), Error> {
        trace!("Submitting atomic request");
        if let Err(source) = device.atomic_commit(mode.flags(), &self.entries) {
            let errmsg = match mode {
                CommitMode::Blocking => "Modeset commit failed",
                CommitMode::Nonblocking { event: true } => "Page flip commit failed",
                CommitMode::Nonblocking { event: false } => "Nonblocking commit failed",
            };
            return Err(Error::Access(AccessError {
                errmsg,
                dev: device.dev_path(),
                source,
            }));
        }
        Ok(())
    }
}

/// Scan-out configuration of the plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneConfig {
    /// Framebuffer to scan out
    pub fb: framebuffer::Handle,
    /// Crtc to scan out on
    pub crtc: crtc::Handle,
    /// Size of the framebuffer, used for source and destination rectangle
    pub size: (u32, u32),
    /// Position of the destination rectangle on the crtc
    pub offset: (i32, i32),
}

// source coordinates are 16.16 fixed point
fn to_fixed(n: u32) -> u64 {
    (n as u64) << 16
}

/// Bind a framebuffer to the plane, showing it in full at the configured offset
pub fn append_plane_config(
    req: &mut AtomicRequest,
    plane: &DisplayObject,
    config: &PlaneConfig,
) -> Result<(), Error> {
    let (w, h) = config.size;
    let (x, y) = config.offset;
    let values = [
        (PropertyKind::FbId, Value::Framebuffer(Some(config.fb))),
        (PropertyKind::CrtcId, Value::CRTC(Some(config.crtc))),
        (PropertyKind::SrcX, Value::UnsignedRange(0)),
        (PropertyKind::SrcY, Value::UnsignedRange(0)),
        (PropertyKind::SrcW, Value::UnsignedRange(to_fixed(w))),
        (PropertyKind::SrcH, Value::UnsignedRange(to_fixed(h))),
        (PropertyKind::CrtcX, Value::SignedRange(x as i64)),
        (PropertyKind::CrtcY, Value::SignedRange(y as i64)),
        (PropertyKind::CrtcW, Value::UnsignedRange(w as u64)),
        (PropertyKind::CrtcH, Value::UnsignedRange(h as u64)),
        (PropertyKind::Zpos, Value::UnsignedRange(0)),
    ];
    for (kind, value) in values {
        req.append(plane, kind, value)?;
    }
    Ok(())
}

/// Detach the plane from its framebuffer and crtc
pub fn append_plane_unbind(req: &mut AtomicRequest, plane: &DisplayObject) -> Result<(), Error> {
    req.append(plane, PropertyKind::FbId, Value::Framebuffer(None))?
        .append(plane, PropertyKind::CrtcId, Value::CRTC(None))?;
    Ok(())
}

/// Route the connector to the crtc and enable the crtc with the given mode blob
pub fn append_modeset(
    req: &mut AtomicRequest,
    connector: &DisplayObject,
    crtc: &DisplayObject,
    crtc_handle: crtc::Handle,
    mode_blob: u64,
) -> Result<(), Error> {
    req.append(connector, PropertyKind::CrtcId, Value::CRTC(Some(crtc_handle)))?
        .append(crtc, PropertyKind::ModeId, Value::Blob(mode_blob))?
        .append(crtc, PropertyKind::Active, Value::Boolean(true))?;
    Ok(())
}
