#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! # kmsflip: atomic page flipping on a single plane
//!
//! This crate drives one display output through the kernel mode-setting api. It
//! sets a mode with one atomic commit and then keeps a moving image on screen by
//! flipping between two memory mapped dumb buffers, synchronized to the flip
//! completion events of the hardware.
//!
//! ## Structure of the crate
//!
//! - [`backend::drm`] contains the device access, the atomic request builder, the
//!   swap chain, the event loop and the teardown of a session.
//! - [`producer`] defines what a session is driven by: a frame producer drawing
//!   the image and an observer notified on every flip. It also contains an animated
//!   test pattern and a frame rate counter.
//!
//! ### The event loop and state handling
//!
//! kmsflip is built around [`calloop`], a callback-oriented event loop. The device
//! node is registered as a source and every completion is handled with mutable
//! access to the [`FlipSession`](backend::drm::FlipSession). Additional sources,
//! like signal handlers, can be inserted into the same loop.
//!
//! ### Logging
//!
//! kmsflip makes extensive use of [`tracing`] for its internal logging. Every session
//! carries its own span, commits are instrumented at `trace` level.

pub mod backend;
pub mod producer;
pub mod reexports;
pub mod utils;
