//! Property lookup for connectors, crtcs and planes
//!
//! Everything in the atomic api is set via properties, but the numeric property
//! ids differ between devices (and even between objects of the same device).
//! A [`DisplayObject`] therefore enumerates the properties of its object once and
//! keeps them in a [`PropertyDirectory`]. On top of the name based directory the
//! object resolves the closed set of [`PropertyKind`]s used by the flip path,
//! so that a missing property is discovered during setup rather than on the
//! first commit that needs it.

use std::collections::HashMap;

use drm::control::property;
use tracing::{debug, trace};

use super::device::{KmsDevice, ObjectHandle, ObjectKind, PropertyDescriptor};
use super::error::{AccessError, Error};
use crate::utils::DevPath;

/// Properties written by the flip path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// Framebuffer scanned out by a plane
    FbId,
    /// Crtc a plane or connector is bound to
    CrtcId,
    /// Source rectangle x, 16.16 fixed point
    SrcX,
    /// Source rectangle y, 16.16 fixed point
    SrcY,
    /// Source rectangle width, 16.16 fixed point
    SrcW,
    /// Source rectangle height, 16.16 fixed point
    SrcH,
    /// Destination rectangle x on the crtc
    CrtcX,
    /// Destination rectangle y on the crtc
    CrtcY,
    /// Destination rectangle width on the crtc
    CrtcW,
    /// Destination rectangle height on the crtc
    CrtcH,
    /// Layering hint of a plane
    Zpos,
    /// Mode blob of a crtc
    ModeId,
    /// Whether a crtc is enabled
    Active,
}

impl PropertyKind {
    const PLANE: &'static [PropertyKind] = &[
        PropertyKind::FbId,
        PropertyKind::CrtcId,
        PropertyKind::SrcX,
        PropertyKind::SrcY,
        PropertyKind::SrcW,
        PropertyKind::SrcH,
        PropertyKind::CrtcX,
        PropertyKind::CrtcY,
        PropertyKind::CrtcW,
        PropertyKind::CrtcH,
        PropertyKind::Zpos,
    ];
    const CONNECTOR: &'static [PropertyKind] = &[PropertyKind::CrtcId];
    const CRTC: &'static [PropertyKind] = &[PropertyKind::ModeId, PropertyKind::Active];

    /// Property name as exposed by the kernel
    pub fn name(self) -> &'static str {
        match self {
            PropertyKind::FbId => "FB_ID",
            PropertyKind::CrtcId => "CRTC_ID",
            PropertyKind::SrcX => "SRC_X",
            PropertyKind::SrcY => "SRC_Y",
            PropertyKind::SrcW => "SRC_W",
            PropertyKind::SrcH => "SRC_H",
            PropertyKind::CrtcX => "CRTC_X",
            PropertyKind::CrtcY => "CRTC_Y",
            PropertyKind::CrtcW => "CRTC_W",
            PropertyKind::CrtcH => "CRTC_H",
            PropertyKind::Zpos => "zpos",
            PropertyKind::ModeId => "MODE_ID",
            PropertyKind::Active => "ACTIVE",
        }
    }

    /// Whether a commit may silently skip this property if the hardware lacks it
    pub fn is_optional(self) -> bool {
        matches!(self, PropertyKind::Zpos)
    }

    /// Kinds the flip path writes on an object of the given type
    pub fn for_object(kind: ObjectKind) -> &'static [PropertyKind] {
        match kind {
            ObjectKind::Connector => Self::CONNECTOR,
            ObjectKind::Crtc => Self::CRTC,
            ObjectKind::Plane => Self::PLANE,
        }
    }
}

/// Name to property mapping of a single object
#[derive(Debug, Default)]
pub struct PropertyDirectory {
    descriptors: Vec<PropertyDescriptor>,
    by_name: HashMap<String, property::Handle>,
}

impl PropertyDirectory {
    /// Enumerate the properties of `object`
    pub fn load<D: KmsDevice>(device: &D, object: ObjectHandle) -> Result<Self, Error> {
        let descriptors = device.object_properties(object).map_err(|source| {
            Error::Access(AccessError {
                errmsg: "Error reading properties",
                dev: device.dev_path(),
                source,
            })
        })?;
        Ok(Self::from_descriptors(descriptors))
    }

    /// Build a directory out of already enumerated descriptors
    pub fn from_descriptors(descriptors: Vec<PropertyDescriptor>) -> Self {
        let by_name = descriptors
            .iter()
            .map(|desc| (desc.name.clone(), desc.handle))
            .collect();
        PropertyDirectory {
            descriptors,
            by_name,
        }
    }

    /// Resolve a property name
    pub fn resolve(&self, name: &str) -> Option<property::Handle> {
        self.by_name.get(name).copied()
    }

    /// All cached descriptors
    pub fn descriptors(&self) -> &[PropertyDescriptor] {
        &self.descriptors
    }

    /// Number of cached properties
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns true if the object exposes no properties
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// One addressable mode-setting object and its properties
#[derive(Debug)]
pub struct DisplayObject {
    handle: ObjectHandle,
    directory: PropertyDirectory,
    resolved: HashMap<PropertyKind, property::Handle>,
}

impl DisplayObject {
    /// Load the properties of `handle` and resolve the kinds used by the flip path.
    ///
    /// Fails if the properties cannot be enumerated or if a mandatory property is
    /// missing. Missing optional properties are only logged.
    pub fn load<D: KmsDevice>(device: &D, handle: ObjectHandle) -> Result<Self, Error> {
        let directory = PropertyDirectory::load(device, handle)?;
        Self::with_directory(handle, directory)
    }

    /// Wrap an already loaded directory, see [`DisplayObject::load`]
    pub fn with_directory(handle: ObjectHandle, directory: PropertyDirectory) -> Result<Self, Error> {
        let mut resolved = HashMap::new();
        for &kind in PropertyKind::for_object(handle.kind()) {
            match directory.resolve(kind.name()) {
                Some(prop) => {
                    resolved.insert(kind, prop);
                }
                None if kind.is_optional() => {
                    debug!(object = ?handle, "Note: {} property not supported", kind.name());
                }
                None => {
                    return Err(Error::UnknownProperty {
                        handle: handle.raw(),
                        name: kind.name(),
                    });
                }
            }
        }
        trace!(object = ?handle, props = directory.len(), "Loaded properties");
        Ok(DisplayObject {
            handle,
            directory,
            resolved,
        })
    }

    /// Handle of the object
    pub fn handle(&self) -> ObjectHandle {
        self.handle
    }

    /// The full property directory of this object
    pub fn directory(&self) -> &PropertyDirectory {
        &self.directory
    }

    /// Property handle of a known kind, if the hardware exposes it
    pub fn property(&self, kind: PropertyKind) -> Option<property::Handle> {
        self.resolved.get(&kind).copied()
    }

    /// Drop the cached descriptors, then the directory itself.
    pub fn release(self) {
        let DisplayObject {
            handle,
            directory,
            resolved,
        } = self;
        drop(resolved);
        let count = directory.len();
        drop(directory);
        trace!(object = ?handle, count, "Released cached properties");
    }
}
