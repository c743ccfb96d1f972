//! Fixed-size worker pool draining a FIFO job queue.
//!
//! Workers block on `has_work` while the queue is empty; the foreground
//! blocks on `idle` inside [`WorkerPool::drain`]. Job bodies always run
//! outside the pool lock.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::Error;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct PoolState {
    queue: VecDeque<Job>,
    queued: usize,
    active: usize,
    shutting_down: bool,
}

struct Shared {
    state: Mutex<PoolState>,
    has_work: Condvar,
    idle: Condvar,
}

/// A pool of worker threads with post / drain-to-idle / shutdown semantics.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

fn worker_main(shared: &Shared) {
    loop {
        let mut state = shared.state.lock().unwrap();
        while !state.shutting_down && state.queue.is_empty() {
            state = shared.has_work.wait(state).unwrap();
        }
        if state.shutting_down && state.queue.is_empty() {
            return;
        }

        let job = match state.queue.pop_front() {
            Some(job) => job,
            None => continue,
        };
        state.queued -= 1;
        state.active += 1;
        drop(state);

        job();

        let mut state = shared.state.lock().unwrap();
        state.active -= 1;
        if state.queued == 0 && state.active == 0 {
            shared.idle.notify_all();
        }
    }
}

impl WorkerPool {
    /// Launch a pool with `nthreads` workers (clamped to at least one).
    ///
    /// A thread that fails to spawn rolls the pool back: already-started
    /// workers are woken and joined before the error is returned.
    pub fn new(nthreads: usize) -> Result<WorkerPool, Error> {
        let nthreads = nthreads.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState::default()),
            has_work: Condvar::new(),
            idle: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(nthreads);
        for i in 0..nthreads {
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("elfscope-worker-{i}"))
                .spawn(move || worker_main(&worker_shared));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    log::warn!("worker spawn failed: {err}");
                    {
                        let mut state = shared.state.lock().unwrap();
                        state.shutting_down = true;
                    }
                    shared.has_work.notify_all();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(Error::Io(err));
                }
            }
        }

        Ok(WorkerPool { shared, workers })
    }

    /// Enqueue a job. Fails once the pool is shutting down.
    pub fn post<F>(&self, job: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.state.lock().unwrap();
        if state.shutting_down {
            return Err(Error::PostFailure);
        }
        state.queue.push_back(Box::new(job));
        state.queued += 1;
        self.shared.has_work.notify_one();
        Ok(())
    }

    /// Block until the queue is empty and no worker is inside a job.
    /// Workers stay alive.
    pub fn drain(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while state.queued != 0 || state.active != 0 {
            state = self.shared.idle.wait(state).unwrap();
        }
    }

    /// Stop accepting work, wake every worker and join them. Idempotent.
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if !state.shutting_down {
                state.shutting_down = true;
                self.shared.has_work.notify_all();
            }
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }

    /// Snapshot of `(queued, active)`, taken under the pool lock.
    pub fn counts(&self) -> (usize, usize) {
        let state = self.shared.state.lock().unwrap();
        (state.queued, state.active)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
        // Residual queued jobs are discarded without being invoked.
        let mut state = self.shared.state.lock().unwrap();
        state.queued -= state.queue.len();
        state.queue.clear();
    }
}
