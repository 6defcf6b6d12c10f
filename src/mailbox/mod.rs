//! Single-consumer mailbox for the controller
//!
//! All controller state is mutated from one run-loop draining this mailbox,
//! so handlers never race each other. Producers get a clonable [`PostHandle`]
//! and post messages; the owner additionally schedules delayed deliveries
//! through a timer heap, which is how retry ticks and periodic polling are
//! implemented without extra threads.
//!
//! Messages from a single producer are delivered FIFO. Delayed messages are
//! delivered in due-time order, interleaved with immediate messages by
//! arrival time.

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Producer-side handle onto a [`Mailbox`]
///
/// Posting to a mailbox whose consumer has gone away silently drops the
/// message; collaborators never observe the controller's lifetime.
pub struct PostHandle<M> {
    tx: Sender<M>,
}

impl<M> Clone for PostHandle<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M> PostHandle<M> {
    /// Post a message for immediate delivery.
    pub fn post(&self, message: M) {
        let _ = self.tx.send(message);
    }
}

struct TimerEntry<M> {
    due: Instant,
    seq: u64,
    message: M,
}

impl<M> PartialEq for TimerEntry<M> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<M> Eq for TimerEntry<M> {}

impl<M> PartialOrd for TimerEntry<M> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<M> Ord for TimerEntry<M> {
    // Reversed so the BinaryHeap pops the earliest entry first; ties break
    // in posting order.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Single-consumer mailbox with delayed delivery
pub struct Mailbox<M> {
    tx: Sender<M>,
    rx: Receiver<M>,
    timers: BinaryHeap<TimerEntry<M>>,
    seq: u64,
}

impl<M> Default for Mailbox<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Mailbox<M> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            timers: BinaryHeap::new(),
            seq: 0,
        }
    }

    /// Create a new producer handle.
    pub fn handle(&self) -> PostHandle<M> {
        PostHandle {
            tx: self.tx.clone(),
        }
    }

    /// Post a message onto our own queue for immediate delivery.
    pub fn post(&self, message: M) {
        let _ = self.tx.send(message);
    }

    /// Schedule a message for delivery after `delay`.
    pub fn post_delayed(&mut self, message: M, delay: Duration) {
        let entry = TimerEntry {
            due: Instant::now() + delay,
            seq: self.seq,
            message,
        };
        self.seq += 1;
        self.timers.push(entry);
    }

    /// Block until the next message is available.
    ///
    /// Returns `None` once every producer handle is gone and no timers
    /// remain, which ends the consumer's run-loop.
    pub fn recv(&mut self) -> Option<M> {
        loop {
            let now = Instant::now();
            let next_due = self.timers.peek().map(|entry| entry.due);

            if let Some(due) = next_due {
                if due <= now {
                    if let Some(entry) = self.timers.pop() {
                        return Some(entry.message);
                    }
                    continue;
                }

                match self.rx.recv_timeout(due - now) {
                    Ok(message) => return Some(message),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => {
                        // Producers are gone; let the remaining timers lapse.
                        let now = Instant::now();
                        if due > now {
                            std::thread::sleep(due - now);
                        }
                        continue;
                    }
                }
            } else {
                return self.rx.recv().ok();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut mailbox: Mailbox<u32> = Mailbox::new();
        let handle = mailbox.handle();

        handle.post(1);
        handle.post(2);
        handle.post(3);

        assert_eq!(mailbox.recv(), Some(1));
        assert_eq!(mailbox.recv(), Some(2));
        assert_eq!(mailbox.recv(), Some(3));
    }

    #[test]
    fn test_immediate_beats_delayed() {
        let mut mailbox: Mailbox<&str> = Mailbox::new();
        let handle = mailbox.handle();

        mailbox.post_delayed("late", Duration::from_millis(40));
        handle.post("now");

        assert_eq!(mailbox.recv(), Some("now"));
        assert_eq!(mailbox.recv(), Some("late"));
    }

    #[test]
    fn test_delayed_order_by_due_time() {
        let mut mailbox: Mailbox<&str> = Mailbox::new();

        mailbox.post_delayed("second", Duration::from_millis(60));
        mailbox.post_delayed("first", Duration::from_millis(20));

        assert_eq!(mailbox.recv(), Some("first"));
        assert_eq!(mailbox.recv(), Some("second"));
    }

    #[test]
    fn test_cross_thread_post() {
        let mut mailbox: Mailbox<u32> = Mailbox::new();
        let handle = mailbox.handle();

        let worker = std::thread::spawn(move || {
            handle.post(42);
        });

        assert_eq!(mailbox.recv(), Some(42));
        worker.join().unwrap();
    }
}
