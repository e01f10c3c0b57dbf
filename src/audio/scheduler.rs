//! Background scheduling context for self-rescheduling playback loops.
//!
//! A deadline-ordered timer queue. In realtime mode a worker thread sleeps
//! until the earliest deadline on the wall clock. In manual mode nothing
//! runs until `advance_to` is called, and "now" jumps to each task's
//! deadline before the task runs, so a task that reschedules itself after
//! `T` lands exactly on `0, T, 2T, ...`.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// A unit of scheduled work; receives a handle so it can reschedule itself
pub type Task = Box<dyn FnOnce(&SchedulerHandle) + Send + 'static>;

struct Timer {
    deadline: Duration,
    seq: u64,
    task: Task,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    // Min-heap on (deadline, insertion order)
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Clone, Copy)]
enum Clock {
    Wall(Instant),
    Virtual,
}

struct Queue {
    timers: BinaryHeap<Timer>,
    next_seq: u64,
    virtual_now: Duration,
    shutdown: bool,
}

struct Inner {
    queue: Mutex<Queue>,
    wakeup: Condvar,
    clock: Clock,
}

impl Inner {
    fn now_locked(&self, queue: &Queue) -> Duration {
        match self.clock {
            Clock::Wall(origin) => origin.elapsed(),
            Clock::Virtual => queue.virtual_now,
        }
    }
}

/// Cloneable handle for scheduling work
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: Arc<Inner>,
}

impl SchedulerHandle {
    /// Time since the scheduler was created (wall or virtual)
    pub fn now(&self) -> Duration {
        let queue = self.inner.queue.lock();
        self.inner.now_locked(&queue)
    }

    /// Run `task` once `delay` has elapsed from now
    pub fn schedule_after<F>(&self, delay: Duration, task: F)
    where
        F: FnOnce(&SchedulerHandle) + Send + 'static,
    {
        let mut queue = self.inner.queue.lock();
        if queue.shutdown {
            return;
        }
        let deadline = self.inner.now_locked(&queue) + delay;
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.timers.push(Timer {
            deadline,
            seq,
            task: Box::new(task),
        });
        self.inner.wakeup.notify_one();
    }

    /// Number of tasks waiting to run
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().timers.len()
    }

    /// Drop every pending task without running it
    pub fn clear(&self) {
        let dropped = std::mem::take(&mut self.inner.queue.lock().timers);
        drop(dropped);
    }

    fn is_virtual(&self) -> bool {
        matches!(self.inner.clock, Clock::Virtual)
    }
}

pub struct Scheduler {
    handle: SchedulerHandle,
    worker: Option<thread::JoinHandle<()>>,
}

impl Scheduler {
    fn with_clock(clock: Clock) -> Self {
        Self {
            handle: SchedulerHandle {
                inner: Arc::new(Inner {
                    queue: Mutex::new(Queue {
                        timers: BinaryHeap::new(),
                        next_seq: 0,
                        virtual_now: Duration::ZERO,
                        shutdown: false,
                    }),
                    wakeup: Condvar::new(),
                    clock,
                }),
            },
            worker: None,
        }
    }

    /// Wall-clock scheduler serviced by a dedicated thread
    pub fn realtime() -> Self {
        let mut scheduler = Self::with_clock(Clock::Wall(Instant::now()));
        let handle = scheduler.handle.clone();
        let worker = thread::Builder::new()
            .name("layerloop-scheduler".to_string())
            .spawn(move || run_worker(handle));
        match worker {
            Ok(worker) => scheduler.worker = Some(worker),
            Err(e) => tracing::error!("Failed to spawn scheduler thread: {}", e),
        }
        scheduler
    }

    /// Virtual-time scheduler driven by `advance_to`
    pub fn manual() -> Self {
        Self::with_clock(Clock::Virtual)
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    pub fn now(&self) -> Duration {
        self.handle.now()
    }

    /// Run every task due at or before `target`, in deadline order, then
    /// move virtual time to `target`. Returns the number of tasks run.
    ///
    /// Tasks scheduled by those tasks run too if they fall inside the window.
    /// No-op on a realtime scheduler.
    pub fn advance_to(&self, target: Duration) -> usize {
        if !self.handle.is_virtual() {
            return 0;
        }

        let inner = &self.handle.inner;
        let mut ran = 0;
        loop {
            let mut queue = inner.queue.lock();
            let due = queue.timers.peek().is_some_and(|t| t.deadline <= target);
            if !due {
                queue.virtual_now = queue.virtual_now.max(target);
                return ran;
            }
            let Some(timer) = queue.timers.pop() else {
                return ran;
            };
            queue.virtual_now = queue.virtual_now.max(timer.deadline);
            drop(queue);

            (timer.task)(&self.handle);
            ran += 1;
        }
    }

    /// Advance virtual time by `delta`
    pub fn advance(&self, delta: Duration) -> usize {
        let target = self.now() + delta;
        self.advance_to(target)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        {
            let mut queue = self.handle.inner.queue.lock();
            queue.shutdown = true;
            queue.timers.clear();
            self.handle.inner.wakeup.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(handle: SchedulerHandle) {
    let inner = Arc::clone(&handle.inner);
    let mut queue = inner.queue.lock();
    loop {
        if queue.shutdown {
            break;
        }
        let now = inner.now_locked(&queue);
        match queue.timers.peek().map(|t| t.deadline) {
            None => inner.wakeup.wait(&mut queue),
            Some(deadline) if deadline > now => {
                inner.wakeup.wait_for(&mut queue, deadline - now);
            }
            Some(_) => {
                if let Some(timer) = queue.timers.pop() {
                    MutexGuard::unlocked(&mut queue, || (timer.task)(&handle));
                }
            }
        }
    }
    tracing::debug!("Scheduler thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn tick_every(handle: &SchedulerHandle, interval: Duration, log: Arc<Mutex<Vec<Duration>>>) {
        log.lock().push(handle.now());
        let next = Arc::clone(&log);
        handle.schedule_after(interval, move |h| tick_every(h, interval, next));
    }

    #[test]
    fn test_manual_runs_in_deadline_order() {
        let scheduler = Scheduler::manual();
        let handle = scheduler.handle();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (delay_ms, tag) in [(30, 'c'), (10, 'a'), (20, 'b')] {
            let order = Arc::clone(&order);
            handle.schedule_after(Duration::from_millis(delay_ms), move |_| {
                order.lock().push(tag)
            });
        }

        assert_eq!(scheduler.advance(Duration::from_millis(25)), 2);
        assert_eq!(*order.lock(), vec!['a', 'b']);
        assert_eq!(scheduler.now(), Duration::from_millis(25));
        assert_eq!(handle.pending(), 1);
    }

    #[test]
    fn test_self_rescheduling_is_exact_in_virtual_time() {
        let scheduler = Scheduler::manual();
        let log = Arc::new(Mutex::new(Vec::new()));
        tick_every(&scheduler.handle(), Duration::from_millis(500), Arc::clone(&log));

        scheduler.advance(Duration::from_millis(1200));

        assert_eq!(
            *log.lock(),
            vec![
                Duration::ZERO,
                Duration::from_millis(500),
                Duration::from_millis(1000)
            ]
        );
    }

    #[test]
    fn test_clear_drops_pending() {
        let scheduler = Scheduler::manual();
        let handle = scheduler.handle();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        handle.schedule_after(Duration::ZERO, move |_| {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
        });

        handle.clear();
        scheduler.advance(Duration::from_secs(1));
        assert_eq!(runs.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn test_realtime_runs_on_worker() {
        let scheduler = Scheduler::realtime();
        let (tx, rx) = crossbeam_channel::bounded(1);
        scheduler
            .handle()
            .schedule_after(Duration::from_millis(5), move |_| {
                let _ = tx.send(thread::current().name().map(str::to_string));
            });

        let name = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(name.as_deref(), Some("layerloop-scheduler"));
    }
}
