//! The dedicated audio worker: a lock-protected FIFO job queue, a fixed
//! tick driving the engine update, and a fence for synchronizing with
//! queued work.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{error, info};

use crate::PCM_FRAME_CHUNK_SIZE;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Where to run a job posted from the audio thread itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPolicy {
    /// Invoke inline when already on the audio thread.
    RunNow,
    /// Always enqueue for the next pump.
    Enqueue,
}

/// FIFO of engine jobs destined for the audio thread.
pub struct JobQueue {
    jobs: Mutex<VecDeque<(Job, &'static str)>>,
    audio_thread: Mutex<Option<ThreadId>>,
    last_frame_time: AtomicU32,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            audio_thread: Mutex::new(None),
            last_frame_time: AtomicU32::new(0f32.to_bits()),
        }
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the caller is the thread currently pumping jobs.
    pub fn is_audio_thread(&self) -> bool {
        *self.audio_thread.lock() == Some(thread::current().id())
    }

    /// Adopt the calling thread as the audio thread.
    pub fn bind_current_thread(&self) {
        *self.audio_thread.lock() = Some(thread::current().id());
    }

    pub fn unbind(&self) {
        *self.audio_thread.lock() = None;
    }

    pub fn post(&self, job: Job, tag: &'static str) {
        self.jobs.lock().push_back((job, tag));
    }

    /// Post or, per `policy`, run inline when already on the audio thread.
    pub fn post_or_run(&self, policy: JobPolicy, job: Job, tag: &'static str) {
        if policy == JobPolicy::RunNow && self.is_audio_thread() {
            job();
        } else {
            self.post(job, tag);
        }
    }

    /// Execute everything queued so far. A panicking job is logged and
    /// skipped; the tick carries on.
    pub fn drain(&self) {
        loop {
            let Some((job, tag)) = self.jobs.lock().pop_front() else {
                break;
            };
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)).is_err() {
                error!(target: "audio::thread", tag, "audio job panicked; continuing");
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn publish_frame_time(&self, seconds: f32) {
        self.last_frame_time
            .store(seconds.to_bits(), Ordering::Relaxed);
    }

    /// Last tick duration, seconds.
    pub fn frame_time(&self) -> f32 {
        f32::from_bits(self.last_frame_time.load(Ordering::Relaxed))
    }
}

/// Blocks a caller until every job enqueued before `begin` has executed.
pub struct AudioThreadFence {
    counter: Arc<AtomicUsize>,
}

impl Default for AudioThreadFence {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioThreadFence {
    pub fn new() -> Self {
        Self {
            counter: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn begin(&self, queue: &JobQueue) {
        self.counter.fetch_add(1, Ordering::AcqRel);
        let counter = self.counter.clone();
        queue.post(
            Box::new(move || {
                counter.fetch_sub(1, Ordering::AcqRel);
            }),
            "fence",
        );
    }

    pub fn is_ready(&self) -> bool {
        self.counter.load(Ordering::Acquire) == 0
    }

    pub fn wait(&self) {
        while !self.is_ready() {
            thread::yield_now();
        }
    }

    pub fn begin_and_wait(&self, queue: &JobQueue) {
        self.begin(queue);
        self.wait();
    }
}

/// Anything the worker drives once per tick.
pub trait TickTarget: Send + Sync + 'static {
    /// Drain jobs and run one update with the measured dt.
    fn pump(&self);
}

/// The worker thread. Runs `target.pump()` at roughly the device period
/// until stopped.
pub struct AudioThread {
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl AudioThread {
    pub fn start(target: Arc<dyn TickTarget>) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();

        let tick = Duration::from_millis((PCM_FRAME_CHUNK_SIZE as u64 * 1000) / 48_000);
        let handle = thread::Builder::new()
            .name("audio-update".into())
            .spawn(move || {
                info!(target: "audio::thread", "audio thread started");
                while thread_running.load(Ordering::Acquire) {
                    let started = Instant::now();
                    target.pump();
                    let elapsed = started.elapsed();
                    if elapsed < tick {
                        thread::sleep(tick - elapsed);
                    }
                }
                info!(target: "audio::thread", "audio thread stopped");
            })?;

        Ok(Self {
            handle: Some(handle),
            running,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Signal shutdown and join.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AudioThread {
    fn drop(&mut self) {
        self.stop();
    }
}
