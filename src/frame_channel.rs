//! Latest-frame hand-off between a capture thread and any number of readers.

use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{debug, warn};

use crate::sync::{AtomicU64, AtomicU8};
use crate::AtomicRefBox;

/// Advisory "new frame available" callback. Carries no frame; call
/// [`FrameChannel::current`] to fetch it.
pub type Notifier = Box<dyn Fn() + Send + Sync>;

const IDLE: u8 = 0;
const LIVE: u8 = 1;
const CLOSED: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Nothing published yet.
    Idle,
    /// At least one frame published.
    Live,
    /// Torn down by [`FrameChannel::reset`]. Terminal.
    Closed,
}

/// Holds only the newest published frame.
///
/// The producer calls [`publish`](FrameChannel::publish) for every captured
/// frame, superseding the previous one. Readers call
/// [`current`](FrameChannel::current) whenever they like and get their own
/// reference to whatever is newest; a reader may never see some frames.
///
/// # Examples
///
///     use std::sync::Arc;
///     use atomicrefbox::{ChannelState, FrameChannel};
///
///     let channel = FrameChannel::new();
///     assert_eq!(channel.current(), None);
///
///     channel.publish(Arc::new("first"));
///     let held = channel.current().unwrap();
///     channel.publish(Arc::new("second"));
///     assert_eq!(*held, "first");
///     assert_eq!(*channel.current().unwrap(), "second");
///
///     channel.reset();
///     assert_eq!(channel.state(), ChannelState::Closed);
///     assert_eq!(channel.current(), None);
///
pub struct FrameChannel<F> {
    latest: AtomicRefBox<F>,
    notifier: AtomicRefBox<Notifier>,
    state: AtomicU8,
    published: AtomicU64,
}

impl<F> FrameChannel<F> {
    pub fn new() -> FrameChannel<F> {
        FrameChannel {
            latest: AtomicRefBox::empty(),
            notifier: AtomicRefBox::empty(),
            state: AtomicU8::new(IDLE),
            published: AtomicU64::new(0),
        }
    }

    /// Makes `frame` the current frame and releases the one it replaces,
    /// then runs the notifier, if any, on this thread.
    ///
    /// Frames published after [`reset`](FrameChannel::reset) are dropped.
    pub fn publish(&self, frame: Arc<F>) {
        if self.state.load(Ordering::Acquire) == CLOSED {
            warn!("frame published to a closed channel; dropping it");
            return;
        }

        drop(self.latest.swap(Some(frame)));

        if self
            .state
            .compare_exchange(IDLE, LIVE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!("frame channel is live");
        }
        // Lost a race with `reset`; don't leave a frame behind in a closed channel.
        if self.state.load(Ordering::Acquire) == CLOSED {
            self.latest.store(None);
            return;
        }

        self.published.fetch_add(1, Ordering::Relaxed);
        if let Some(notify) = self.notifier.load() {
            notify();
        }
    }

    /// Returns the newest frame, or `None` before the first publish and after
    /// [`reset`](FrameChannel::reset).
    pub fn current(&self) -> Option<Arc<F>> {
        if self.state.load(Ordering::Acquire) == CLOSED {
            return None;
        }
        self.latest.load()
    }

    /// Installs or clears the notifier.
    ///
    /// A `publish` running concurrently with this call may still invoke the
    /// previous notifier once.
    pub fn set_notifier(&self, notifier: Option<Notifier>) {
        self.notifier.store(notifier.map(Arc::new));
    }

    /// Tears the channel down: releases the current frame and the notifier.
    pub fn reset(&self) {
        if self.state.swap(CLOSED, Ordering::AcqRel) != CLOSED {
            debug!(
                "frame channel closed after {} frames",
                self.published.load(Ordering::Relaxed)
            );
        }
        self.latest.store(None);
        self.notifier.store(None);
    }

    pub fn state(&self) -> ChannelState {
        match self.state.load(Ordering::Acquire) {
            IDLE => ChannelState::Idle,
            LIVE => ChannelState::Live,
            _ => ChannelState::Closed,
        }
    }

    /// Number of frames accepted by [`publish`](FrameChannel::publish).
    pub fn frames_published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl<F> Default for FrameChannel<F> {
    fn default() -> FrameChannel<F> {
        FrameChannel::new()
    }
}

impl<F> Debug for FrameChannel<F> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("FrameChannel")
            .field("state", &self.state())
            .field("latest", &self.latest)
            .field("frames_published", &self.frames_published())
            .finish()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicIsize, AtomicUsize};
    use std::sync::Barrier;
    use std::thread;

    struct Tracked {
        seq: u64,
        live: Arc<AtomicIsize>,
    }

    impl Tracked {
        fn new(seq: u64, live: &Arc<AtomicIsize>) -> Tracked {
            live.fetch_add(1, Ordering::SeqCst);
            Tracked {
                seq,
                live: live.clone(),
            }
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn latest_publish_wins() {
        let live = Arc::new(AtomicIsize::new(0));
        let channel = FrameChannel::new();
        assert_eq!(channel.state(), ChannelState::Idle);

        channel.publish(Arc::new(Tracked::new(1, &live)));
        assert_eq!(channel.state(), ChannelState::Live);
        channel.publish(Arc::new(Tracked::new(2, &live)));

        assert_eq!(channel.current().unwrap().seq, 2);
        assert_eq!(live.load(Ordering::SeqCst), 1);
        assert_eq!(channel.frames_published(), 2);
    }

    #[test]
    fn readers_keep_superseded_frames() {
        let live = Arc::new(AtomicIsize::new(0));
        let channel = FrameChannel::new();
        channel.publish(Arc::new(Tracked::new(1, &live)));
        let held = channel.current().unwrap();

        channel.publish(Arc::new(Tracked::new(2, &live)));
        assert_eq!(held.seq, 1);
        assert_eq!(live.load(Ordering::SeqCst), 2);

        drop(held);
        assert_eq!(live.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reset_releases_frame_and_closes() {
        let live = Arc::new(AtomicIsize::new(0));
        let channel = FrameChannel::new();
        channel.publish(Arc::new(Tracked::new(1, &live)));
        channel.reset();

        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(channel.current().is_none());

        channel.publish(Arc::new(Tracked::new(2, &live)));
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert!(channel.current().is_none());
        assert_eq!(channel.frames_published(), 1);
    }

    #[test]
    fn notifier_fires_once_per_publish() {
        let calls = Arc::new(AtomicUsize::new(0));
        let channel = FrameChannel::new();

        let counter = calls.clone();
        channel.set_notifier(Some(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        channel.publish(Arc::new(1u32));
        channel.publish(Arc::new(2u32));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        channel.set_notifier(None);
        channel.publish(Arc::new(3u32));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn notifier_can_read_the_new_frame() {
        let channel = Arc::new(FrameChannel::new());
        let seen = Arc::new(AtomicUsize::new(0));

        let (reader, sink) = (Arc::downgrade(&channel), seen.clone());
        channel.set_notifier(Some(Box::new(move || {
            if let Some(channel) = reader.upgrade() {
                let frame: Arc<usize> = channel.current().unwrap();
                sink.store(*frame, Ordering::SeqCst);
            }
        })));
        channel.publish(Arc::new(41usize));
        assert_eq!(seen.load(Ordering::SeqCst), 41);
        channel.publish(Arc::new(42usize));
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn reset_clears_notifier() {
        let calls = Arc::new(AtomicUsize::new(0));
        let channel = FrameChannel::new();
        let counter = calls.clone();
        channel.set_notifier(Some(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        channel.reset();
        channel.publish(Arc::new(()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reset_races_publish_without_leaking() {
        for _ in 0..200 {
            let live = Arc::new(AtomicIsize::new(0));
            let channel = Arc::new(FrameChannel::new());
            let gate = Arc::new(Barrier::new(2));

            let producer = {
                let (channel, gate, live) = (channel.clone(), gate.clone(), live.clone());
                thread::spawn(move || {
                    gate.wait();
                    for seq in 0..50 {
                        channel.publish(Arc::new(Tracked::new(seq, &live)));
                    }
                })
            };
            gate.wait();
            channel.reset();
            producer.join().unwrap();

            assert!(channel.current().is_none());
            assert_eq!(live.load(Ordering::SeqCst), 0);
        }
    }
}
