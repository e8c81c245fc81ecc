//! Backend helpers for driving display hardware
//!
//! Currently only contains [`drm`], atomic kernel mode-setting on linux.

pub mod drm;
