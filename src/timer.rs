//! Shared timer thread servicing delayed submissions.
//!
//! One process-wide thread sleeps until the earliest deadline in a
//! min-heap of pending entries, then fires them. Firing a timer entry
//! just re-enqueues the job onto its queue, so the timer thread itself
//! never runs user work for longer than an enqueue.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use crate::executor::Job;

struct TimerEntry {
    deadline: Instant,
    /// Insertion sequence, breaking ties so equal deadlines fire FIFO.
    seq: u64,
    fire: Job,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse: BinaryHeap is a max-heap, we want the earliest deadline
        // on top.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

struct TimerShared {
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

static TIMER: OnceLock<&'static TimerShared> = OnceLock::new();

fn shared() -> &'static TimerShared {
    TIMER.get_or_init(|| {
        let shared: &'static TimerShared = Box::leak(Box::new(TimerShared {
            state: Mutex::new(TimerState::default()),
            wakeup: Condvar::new(),
        }));
        thread::Builder::new()
            .name("dispatchq-timer".into())
            .spawn(move || timer_loop(shared))
            .expect("failed to spawn timer thread");
        shared
    })
}

/// Schedules `fire` to run after `delay` on the timer thread.
///
/// `fire` must be cheap; callers wrap the real submission in it.
pub(crate) fn schedule_after(delay: Duration, fire: Job) {
    let shared = shared();
    let deadline = Instant::now() + delay;
    {
        let mut state = shared.state.lock().expect("timer mutex poisoned");
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(TimerEntry {
            deadline,
            seq,
            fire,
        });
    }
    shared.wakeup.notify_one();
}

fn timer_loop(shared: &'static TimerShared) {
    let mut state = shared.state.lock().expect("timer mutex poisoned");
    loop {
        let now = Instant::now();
        match state.heap.peek().map(|entry| entry.deadline) {
            Some(deadline) if deadline <= now => {
                let entry = state.heap.pop().expect("peeked entry vanished");
                drop(state);
                (entry.fire)();
                state = shared.state.lock().expect("timer mutex poisoned");
            }
            Some(deadline) => {
                let wait = deadline.saturating_duration_since(now);
                state = shared
                    .wakeup
                    .wait_timeout(state, wait)
                    .expect("timer mutex poisoned")
                    .0;
            }
            None => {
                state = shared
                    .wakeup
                    .wait(state)
                    .expect("timer mutex poisoned");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn fires_after_delay() {
        let (tx, rx) = mpsc::channel();
        let start = Instant::now();
        schedule_after(
            Duration::from_millis(30),
            Box::new(move || tx.send(Instant::now()).unwrap()),
        );
        let fired = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(fired.duration_since(start) >= Duration::from_millis(30));
    }

    #[test]
    fn equal_deadlines_fire_in_order() {
        let (tx, rx) = mpsc::channel();
        let deadline = Duration::from_millis(20);
        for i in 0..4 {
            let tx = tx.clone();
            schedule_after(deadline, Box::new(move || tx.send(i).unwrap()));
        }
        let order: Vec<i32> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }
}
