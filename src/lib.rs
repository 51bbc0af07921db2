//! **Lock-free atomic `Arc` cells and a latest-frame hand-off.**
//!
//! [`AtomicRefBox<T>`] holds at most one `Arc<T>` and can be shared between
//! threads. Besides swaps and stores it supports [`load`](AtomicRefBox::load),
//! which hands out a new strong reference without taking the value out of the
//! box, and an identity-based [`compare_exchange`](AtomicRefBox::compare_exchange).
//! No operation takes a lock, and writers never wait for readers.
//!
//! [`FrameChannel<F>`] builds the producer/consumer frame hand-off on top of
//! it: a capture thread publishes every frame it gets, only the newest one is
//! kept, and readers fetch whatever is newest whenever they like.
//! [`CaptureSession`] runs a [`FrameSource`] on its own thread and feeds a
//! channel.
//!
//! ## Why `load` is safe
//!
//! Reading the pointer out of the box and bumping its strong count are two
//! separate steps, and a writer can replace and release the value between
//! them. A load therefore announces the pointer it read in a per-box hazard
//! record and confirms it is still current before bumping the count. A
//! writer that displaces an announced value defers releasing the box's
//! reference until the announcement is withdrawn; anything not announced is
//! released at once, so deferred values never outnumber loads in flight. The
//! caller of [`swap`](AtomicRefBox::swap) always receives a reference it may
//! drop immediately.
//!
//! ## Testing under loom
//!
//! ```text
//! cargo test --features loom --lib
//! ```

mod atomic_ref_box;
mod capture;
mod config;
mod error;
mod frame;
mod frame_channel;
mod reclaim;
mod sync;


pub use atomic_ref_box::AtomicRefBox;
pub use capture::{Capture, CaptureSession, CaptureStats, FrameSource};
pub use config::CaptureConfig;
pub use error::{CaptureError, Result};
pub use frame::{Dimensions, Frame, PixelFormat};
pub use frame_channel::{ChannelState, FrameChannel, Notifier};
