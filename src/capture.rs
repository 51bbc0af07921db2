//! Drives a [`FrameSource`] on a dedicated thread and publishes its frames
//! through a [`FrameChannel`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info, trace};

use crate::config::CaptureConfig;
use crate::error::{CaptureError, Result};
use crate::frame::{Dimensions, Frame};
use crate::FrameChannel;

/// What a single poll of a [`FrameSource`] produced.
#[derive(Debug)]
pub enum Capture<F> {
    Frame(F),
    /// The device discarded a frame that arrived late.
    Dropped,
    /// No frame is ready yet.
    Idle,
    /// The source has nothing more to deliver.
    Finished,
}

/// A capture device, seen from the session that runs it.
///
/// Every method is called on the session's worker thread, except
/// [`dimensions`](FrameSource::dimensions) and [`start`](FrameSource::start),
/// which run on the thread calling [`CaptureSession::start`].
pub trait FrameSource: Send + 'static {
    type Frame: Send + Sync + 'static;

    /// Size of the frames this source delivers.
    fn dimensions(&self) -> Dimensions;

    /// Opens the device. Errors abort [`CaptureSession::start`].
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn capture(&mut self) -> Result<Capture<Self::Frame>>;

    fn stop(&mut self) {}
}

/// Frame counters of a capture session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub published: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> CaptureStats {
        CaptureStats {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// A running capture: a worker thread feeding one [`FrameChannel`].
///
/// The channel is created fresh for each session and reset when the worker
/// exits, so readers see `None` once capture has stopped.
pub struct CaptureSession<F = Frame> {
    channel: Arc<FrameChannel<F>>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    dimensions: Dimensions,
    worker: Option<JoinHandle<()>>,
}

impl<F: Send + Sync + 'static> CaptureSession<F> {
    /// Opens `source` and starts publishing its frames.
    pub fn start<S>(mut source: S, config: &CaptureConfig) -> Result<CaptureSession<F>>
    where
        S: FrameSource<Frame = F>,
    {
        source.start()?;
        let dimensions = source.dimensions();

        let channel = Arc::new(FrameChannel::new());
        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(Counters::default());

        let worker = Worker {
            source,
            channel: channel.clone(),
            running: running.clone(),
            counters: counters.clone(),
            config: config.clone(),
        };
        let handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || worker.run());
        let handle = match handle {
            Ok(handle) => handle,
            Err(err) => {
                // The source went down with the closure.
                channel.reset();
                return Err(CaptureError::Spawn(err));
            }
        };

        info!(
            "capture started on {:?} at {}x{}",
            config.thread_name, dimensions.width, dimensions.height
        );
        Ok(CaptureSession {
            channel,
            running,
            counters,
            dimensions,
            worker: Some(handle),
        })
    }

    /// The channel readers should poll for the latest frame.
    pub fn channel(&self) -> &Arc<FrameChannel<F>> {
        &self.channel
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// `false` once the worker has exited, for whatever reason.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> CaptureStats {
        self.counters.snapshot()
    }

    /// Stops the worker, waits for it, and returns the final counters.
    pub fn stop(mut self) -> Result<CaptureStats> {
        self.shutdown()?;
        Ok(self.stats())
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        self.running.store(false, Ordering::Release);
        let joined = worker.join();
        self.channel.reset();
        match joined {
            Ok(()) => {
                debug!("capture stopped: {:?}", self.counters.snapshot());
                Ok(())
            }
            Err(_) => Err(CaptureError::WorkerPanicked),
        }
    }
}

impl<F> Drop for CaptureSession<F> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.running.store(false, Ordering::Release);
            if worker.join().is_err() {
                error!("capture thread panicked");
            }
            self.channel.reset();
        }
    }
}

struct Worker<S: FrameSource> {
    source: S,
    channel: Arc<FrameChannel<S::Frame>>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    config: CaptureConfig,
}

impl<S: FrameSource> Worker<S> {
    fn run(mut self) {
        while self.running.load(Ordering::Acquire) {
            if let Some(limit) = self.config.max_frames {
                if self.counters.published.load(Ordering::Relaxed) >= limit {
                    debug!("capture reached its limit of {} frames", limit);
                    break;
                }
            }

            match self.source.capture() {
                Ok(Capture::Frame(frame)) => {
                    self.channel.publish(Arc::new(frame));
                    self.counters.published.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Capture::Dropped) => {
                    trace!("frame dropped by source");
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Capture::Idle) => thread::sleep(self.config.idle_backoff()),
                Ok(Capture::Finished) => {
                    debug!("frame source finished");
                    break;
                }
                Err(err) => {
                    error!("frame source failed: {}", err);
                    break;
                }
            }
        }

        self.source.stop();
        self.channel.reset();
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Plays back a fixed script, then reports `Finished`.
    struct Script {
        steps: VecDeque<Result<Capture<u64>>>,
        stopped: Arc<AtomicBool>,
    }

    impl Script {
        fn new(steps: Vec<Result<Capture<u64>>>) -> (Script, Arc<AtomicBool>) {
            let stopped = Arc::new(AtomicBool::new(false));
            let script = Script {
                steps: steps.into(),
                stopped: stopped.clone(),
            };
            (script, stopped)
        }
    }

    impl FrameSource for Script {
        type Frame = u64;

        fn dimensions(&self) -> Dimensions {
            Dimensions::new(640, 480)
        }

        fn capture(&mut self) -> Result<Capture<u64>> {
            self.steps.pop_front().unwrap_or(Ok(Capture::Finished))
        }

        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    /// Publishes an increasing counter until stopped.
    struct Counting(u64);

    impl FrameSource for Counting {
        type Frame = u64;

        fn dimensions(&self) -> Dimensions {
            Dimensions::new(1, 1)
        }

        fn capture(&mut self) -> Result<Capture<u64>> {
            self.0 += 1;
            thread::sleep(Duration::from_micros(50));
            Ok(Capture::Frame(self.0))
        }
    }

    /// Fails to set up the way a device with a broken configuration would.
    struct Misconfigured(fn() -> CaptureError);

    impl FrameSource for Misconfigured {
        type Frame = Frame;

        fn dimensions(&self) -> Dimensions {
            Dimensions::new(0, 0)
        }

        fn start(&mut self) -> Result<()> {
            Err((self.0)())
        }

        fn capture(&mut self) -> Result<Capture<Frame>> {
            unreachable!("never started")
        }
    }

    fn wait_until_stopped<F: Send + Sync + 'static>(session: &CaptureSession<F>) {
        for _ in 0..2000 {
            if !session.is_running() {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("capture worker did not exit");
    }

    #[test]
    fn finished_source_tears_down_channel() {
        let (script, stopped) = Script::new(vec![
            Ok(Capture::Frame(1)),
            Ok(Capture::Dropped),
            Ok(Capture::Idle),
            Ok(Capture::Frame(2)),
        ]);
        let session = CaptureSession::start(script, &CaptureConfig::default()).unwrap();
        assert_eq!(session.dimensions(), Dimensions::new(640, 480));
        wait_until_stopped(&session);

        assert!(stopped.load(Ordering::SeqCst));
        assert!(session.channel().current().is_none());
        assert_eq!(session.channel().frames_published(), 2);
        let stats = session.stop().unwrap();
        assert_eq!(
            stats,
            CaptureStats {
                published: 2,
                dropped: 1
            }
        );
    }

    #[test]
    fn source_error_stops_worker() {
        let (script, stopped) = Script::new(vec![
            Ok(Capture::Frame(1)),
            Err(CaptureError::Source(String::from("unplugged"))),
            Ok(Capture::Frame(2)),
        ]);
        let session = CaptureSession::start(script, &CaptureConfig::default()).unwrap();
        wait_until_stopped(&session);
        assert!(stopped.load(Ordering::SeqCst));
        assert_eq!(session.stats().published, 1);
    }

    #[test]
    fn frame_limit_is_honoured() {
        let config = CaptureConfig {
            max_frames: Some(5),
            ..CaptureConfig::default()
        };
        let session = CaptureSession::start(Counting(0), &config).unwrap();
        wait_until_stopped(&session);
        assert_eq!(session.stop().unwrap().published, 5);
    }

    #[test]
    fn readers_see_increasing_frames_while_live() {
        let session = CaptureSession::start(Counting(0), &CaptureConfig::default()).unwrap();
        let channel = session.channel().clone();

        let mut last = 0;
        let mut observed = 0;
        while observed < 20 {
            if let Some(frame) = channel.current() {
                assert!(*frame >= last);
                if *frame > last {
                    observed += 1;
                }
                last = *frame;
            }
            thread::yield_now();
        }

        let stats = session.stop().unwrap();
        assert!(stats.published >= last);
        assert!(channel.current().is_none());
    }

    #[test]
    fn setup_failures_are_reported() {
        let cases: [(fn() -> CaptureError, &str); 4] = [
            (
                || CaptureError::OpenDevice(String::from("no camera")),
                "opening capture device failed: no camera",
            ),
            (|| CaptureError::AddInput, "adding preview input failed"),
            (|| CaptureError::AddOutput, "adding preview output failed"),
            (
                || CaptureError::AddConnection,
                "adding preview connection failed",
            ),
        ];
        for (fail, message) in cases {
            match CaptureSession::start(Misconfigured(fail), &CaptureConfig::default()) {
                Err(err) => assert_eq!(err.to_string(), message),
                Ok(_) => panic!("session started without a device"),
            }
        }
    }

    #[test]
    fn open_failure_keeps_its_cause() {
        let fail = || CaptureError::OpenDevice(String::from("no camera"));
        match CaptureSession::start(Misconfigured(fail), &CaptureConfig::default()) {
            Err(CaptureError::OpenDevice(message)) => assert_eq!(message, "no camera"),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("session started without a device"),
        }
    }

    #[test]
    fn dropping_session_stops_worker() {
        let session = CaptureSession::start(Counting(0), &CaptureConfig::default()).unwrap();
        let channel = session.channel().clone();
        drop(session);
        assert!(channel.current().is_none());
    }
}
