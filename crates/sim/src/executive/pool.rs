use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// One-shot work submitted to the phase pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Re-runnable payload for periodic and handshake tasks.
pub type Work = Box<dyn FnMut() + Send + 'static>;

/// The closed set of task shapes the executive schedules. Everything else
/// is composed from these three.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    OneShot,
    Periodic { period: Duration },
    /// Started explicitly each round; completion is observed through the
    /// owning [`HandshakeGroup`].
    Handshake,
}

/// Bounded pool of OS worker threads for time-critical phase execution.
/// `run` dispatches a batch and blocks until every job completed: the
/// end-of-phase barrier. With zero workers (single-core host or spawn
/// failure) jobs run inline on the calling thread.
pub struct WorkerPool {
    senders: Vec<Sender<Job>>,
    done_rx: Receiver<()>,
    handles: Vec<JoinHandle<()>>,
    degraded: bool,
}

impl WorkerPool {
    /// Clamps `requested` to available CPUs minus one, always leaving a core
    /// for the OS and the control thread. Spawn failure is recoverable: the
    /// pool comes up smaller (possibly empty) and reports `degraded`.
    pub fn new(name: &str, requested: usize) -> Self {
        let cpus = thread::available_parallelism().map_or(1, |n| n.get());
        let target = requested.min(cpus.saturating_sub(1));
        if target < requested {
            log::info!("{name}: clamped {requested} workers to {target} ({cpus} cpus)");
        }

        let (done_tx, done_rx) = channel();
        let mut senders = Vec::with_capacity(target);
        let mut handles = Vec::with_capacity(target);
        let mut degraded = false;

        for index in 0..target {
            let (job_tx, job_rx) = channel::<Job>();
            let worker_done = done_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || {
                    while let Ok(job) = job_rx.recv() {
                        job();
                        if worker_done.send(()).is_err() {
                            break;
                        }
                    }
                });
            match spawned {
                Ok(handle) => {
                    senders.push(job_tx);
                    handles.push(handle);
                }
                Err(err) => {
                    log::warn!("{name}: worker spawn failed ({err}), degrading to {index} workers");
                    degraded = true;
                    break;
                }
            }
        }

        drop(done_tx);
        Self {
            senders,
            done_rx,
            handles,
            degraded,
        }
    }

    pub fn workers(&self) -> usize {
        self.senders.len()
    }

    pub fn degraded(&self) -> bool {
        self.degraded
    }

    /// Runs the batch to completion. Barrier semantics: returns only after
    /// the last job finished, on whatever thread it ran.
    pub fn run(&mut self, jobs: Vec<Job>) {
        if self.senders.is_empty() {
            for job in jobs {
                job();
            }
            return;
        }

        let mut outstanding = 0usize;
        for (index, job) in jobs.into_iter().enumerate() {
            let slot = index % self.senders.len();
            match self.senders[slot].send(job) {
                Ok(()) => outstanding += 1,
                // Worker died: fall back inline rather than failing the phase.
                Err(returned) => (returned.0)(),
            }
        }
        for _ in 0..outstanding {
            if self.done_rx.recv().is_err() {
                break;
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.senders.clear();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Handle to a one-shot or periodic task thread.
pub struct TaskHandle {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TaskHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn join(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Spawns a task of the given kind on its own thread. `Handshake` tasks are
/// not spawned here; they need the group's completion channel, see
/// [`HandshakeGroup::spawn`].
pub fn spawn_task(name: &str, kind: TaskKind, mut work: Work) -> io::Result<TaskHandle> {
    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = stop.clone();

    let handle = match kind {
        TaskKind::OneShot => thread::Builder::new().name(name.to_owned()).spawn(move || {
            if !thread_stop.load(Ordering::Acquire) {
                work();
            }
        })?,
        TaskKind::Periodic { period } => {
            thread::Builder::new().name(name.to_owned()).spawn(move || {
                let mut deadline = Instant::now() + period;
                while !thread_stop.load(Ordering::Acquire) {
                    work();
                    let now = Instant::now();
                    if now < deadline {
                        thread::sleep(deadline - now);
                        deadline += period;
                    } else {
                        deadline = now + period;
                    }
                }
            })?
        }
        TaskKind::Handshake => {
            return Err(io::Error::other("handshake tasks belong to a HandshakeGroup"));
        }
    };

    Ok(TaskHandle {
        stop,
        handle: Some(handle),
    })
}

struct HandshakeWorker {
    start_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

/// A set of start/complete workers sharing one completion channel, so a
/// caller can wait for one specific worker or for whichever finishes first.
pub struct HandshakeGroup {
    workers: Vec<HandshakeWorker>,
    done_rx: Receiver<usize>,
    in_flight: Vec<bool>,
    completed: Vec<bool>,
}

impl HandshakeGroup {
    /// One thread per payload. Spawn failure drops the remaining workers
    /// and leaves a smaller (possibly empty) group; callers must consult
    /// `len` rather than assume every payload got a thread.
    pub fn spawn(name: &str, payloads: Vec<Work>) -> Self {
        let (done_tx, done_rx) = channel();
        let mut workers = Vec::with_capacity(payloads.len());

        for (index, mut work) in payloads.into_iter().enumerate() {
            let (start_tx, start_rx) = channel::<()>();
            let worker_done = done_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || {
                    while start_rx.recv().is_ok() {
                        work();
                        if worker_done.send(index).is_err() {
                            break;
                        }
                    }
                });
            match spawned {
                Ok(handle) => workers.push(HandshakeWorker {
                    start_tx,
                    handle: Some(handle),
                }),
                Err(err) => {
                    log::warn!("{name}: handshake spawn failed ({err}), group size {index}");
                    break;
                }
            }
        }

        let count = workers.len();
        Self {
            workers,
            done_rx,
            in_flight: vec![false; count],
            completed: vec![false; count],
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Releases worker `index` for one run of its payload. False while the
    /// previous run has not been claimed, or for an unknown index.
    pub fn start(&mut self, index: usize) -> bool {
        if index >= self.workers.len() || self.in_flight[index] {
            return false;
        }
        if self.workers[index].start_tx.send(()).is_err() {
            return false;
        }
        self.in_flight[index] = true;
        true
    }

    /// Blocks until worker `index` completes its started run. True when a
    /// completion was claimed.
    pub fn wait(&mut self, index: usize) -> bool {
        if index >= self.workers.len() || !self.in_flight[index] {
            return false;
        }
        while !self.completed[index] {
            match self.done_rx.recv() {
                Ok(finished) => self.completed[finished] = true,
                Err(_) => return false,
            }
        }
        self.claim(index);
        true
    }

    /// Blocks until any started worker completes; returns its index.
    pub fn wait_any(&mut self) -> Option<usize> {
        if !self.in_flight.iter().any(|f| *f) {
            return None;
        }
        if let Some(index) = self.completed.iter().position(|c| *c) {
            self.claim(index);
            return Some(index);
        }
        match self.done_rx.recv() {
            Ok(index) => {
                self.completed[index] = true;
                self.claim(index);
                Some(index)
            }
            Err(_) => None,
        }
    }

    /// Non-blocking completion check for worker `index`.
    pub fn try_wait(&mut self, index: usize) -> bool {
        if index >= self.workers.len() || !self.in_flight[index] {
            return false;
        }
        while let Ok(finished) = self.done_rx.try_recv() {
            self.completed[finished] = true;
        }
        if self.completed[index] {
            self.claim(index);
            return true;
        }
        false
    }

    pub fn idle(&self, index: usize) -> bool {
        index < self.workers.len() && !self.in_flight[index]
    }

    fn claim(&mut self, index: usize) {
        self.completed[index] = false;
        self.in_flight[index] = false;
    }
}

impl Drop for HandshakeGroup {
    fn drop(&mut self) {
        for worker in &mut self.workers {
            // Close the start channel so the loop ends, then join.
            let (orphan_tx, _orphan_rx) = channel();
            let _ = std::mem::replace(&mut worker.start_tx, orphan_tx);
            // Drain any completion the worker may be blocked on sending.
            while self.done_rx.try_recv().is_ok() {}
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}
