//! Bounded ring-buffer queue with blocking senders and receivers.
//!
//! Fixed capacity, explicit cursors. `write_cursor` is the next slot a
//! back-send fills; `read_cursor` is the slot consumed last, so the next
//! receive reads `read_cursor + 1`. An urgent send writes at `read_cursor`
//! and steps it back, making the value the very next one read.
//!
//! The queue only records who waits. Moving tasks between READY and
//! BLOCKED is the kernel's job; woken tasks are returned to it.

use core_types::TaskId;
use kernel_api::KernelError;
use serde::Serialize;
use std::collections::VecDeque;

/// Outcome of a send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SendStatus {
    /// Stored; `woke` is a receiver to move to READY
    Sent { woke: Option<TaskId> },
    /// Queue full, nothing stored
    Blocked,
}

/// Outcome of a receive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ReceiveStatus<T> {
    /// Took a value; `woke` is a sender to move to READY
    Received { value: T, woke: Option<TaskId> },
    /// Queue empty, nothing taken
    Blocked,
}

/// Bounded circular queue.
#[derive(Debug, Clone)]
pub struct BoundedQueue<T> {
    slots: Vec<Option<T>>,
    write_cursor: usize,
    read_cursor: usize,
    count: usize,
    send_waiters: VecDeque<TaskId>,
    receive_waiters: VecDeque<TaskId>,
}

impl<T> BoundedQueue<T> {
    /// Creates an empty queue. Capacity must be at least one.
    pub fn with_capacity(capacity: usize) -> Result<Self, KernelError> {
        if capacity == 0 {
            return Err(KernelError::InvalidScenario(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Ok(Self {
            slots,
            write_cursor: 0,
            read_cursor: capacity - 1,
            count: 0,
            send_waiters: VecDeque::new(),
            receive_waiters: VecDeque::new(),
        })
    }

    /// Returns the configured capacity.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of queued values.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.capacity()
    }

    pub fn write_cursor(&self) -> usize {
        self.write_cursor
    }

    pub fn read_cursor(&self) -> usize {
        self.read_cursor
    }

    /// Raw slot contents, in storage order.
    pub fn slots(&self) -> &[Option<T>] {
        &self.slots
    }

    pub fn send_waiters(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.send_waiters.iter().copied()
    }

    pub fn receive_waiters(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.receive_waiters.iter().copied()
    }

    /// `xQueueSendToBack`: FIFO enqueue.
    ///
    /// When full, a named sender is appended to the send waiters.
    pub fn send_to_back(&mut self, sender: Option<TaskId>, value: T) -> SendStatus {
        if self.is_full() {
            Self::enlist(&mut self.send_waiters, sender);
            return SendStatus::Blocked;
        }
        Self::delist(&mut self.send_waiters, sender);
        self.slots[self.write_cursor] = Some(value);
        self.write_cursor = (self.write_cursor + 1) % self.capacity();
        self.count += 1;
        SendStatus::Sent {
            woke: self.receive_waiters.pop_front(),
        }
    }

    /// `xQueueSendToFront`: the value becomes the next one received.
    pub fn send_to_front(&mut self, sender: Option<TaskId>, value: T) -> SendStatus {
        if self.is_full() {
            Self::enlist(&mut self.send_waiters, sender);
            return SendStatus::Blocked;
        }
        Self::delist(&mut self.send_waiters, sender);
        let capacity = self.capacity();
        self.slots[self.read_cursor] = Some(value);
        self.read_cursor = (self.read_cursor + capacity - 1) % capacity;
        self.count += 1;
        SendStatus::Sent {
            woke: self.receive_waiters.pop_front(),
        }
    }

    /// `xQueueReceive`: FIFO dequeue.
    ///
    /// When empty, a named receiver is appended to the receive waiters.
    pub fn receive(&mut self, receiver: Option<TaskId>) -> ReceiveStatus<T> {
        if self.is_empty() {
            Self::enlist(&mut self.receive_waiters, receiver);
            return ReceiveStatus::Blocked;
        }
        let capacity = self.capacity();
        let next = (self.read_cursor + 1) % capacity;
        let Some(value) = self.slots[next].take() else {
            // count and slots disagree; leave the cursor where it was
            return ReceiveStatus::Blocked;
        };
        Self::delist(&mut self.receive_waiters, receiver);
        self.read_cursor = next;
        self.count -= 1;
        ReceiveStatus::Received {
            value,
            woke: self.send_waiters.pop_front(),
        }
    }

    /// Forgets a waiting task, e.g. when it is suspended.
    pub fn remove_waiter(&mut self, task: TaskId) -> bool {
        let before = self.send_waiters.len() + self.receive_waiters.len();
        self.send_waiters.retain(|&id| id != task);
        self.receive_waiters.retain(|&id| id != task);
        self.send_waiters.len() + self.receive_waiters.len() != before
    }

    fn delist(waiters: &mut VecDeque<TaskId>, task: Option<TaskId>) {
        if let Some(task) = task {
            waiters.retain(|&id| id != task);
        }
    }

    fn enlist(waiters: &mut VecDeque<TaskId>, task: Option<TaskId>) {
        if let Some(task) = task {
            if !waiters.contains(&task) {
                waiters.push_back(task);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(queue: &mut BoundedQueue<i32>) -> Vec<i32> {
        let mut out = Vec::new();
        while let ReceiveStatus::Received { value, .. } = queue.receive(None) {
            out.push(value);
        }
        out
    }

    #[test]
    fn test_queue_ordering() {
        let mut queue = BoundedQueue::with_capacity(5).unwrap();
        for value in [1, 2, 3] {
            queue.send_to_back(None, value);
        }
        assert_eq!(drain(&mut queue), vec![1, 2, 3]);
    }

    #[test]
    fn test_urgent_send_jumps_the_queue() {
        let mut queue = BoundedQueue::with_capacity(5).unwrap();
        queue.send_to_back(None, 1);
        queue.send_to_back(None, 2);
        queue.send_to_front(None, 99);
        assert_eq!(queue.len(), 3);
        assert_eq!(drain(&mut queue), vec![99, 1, 2]);
    }

    #[test]
    fn test_front_send_wraps_below_zero() {
        let mut queue = BoundedQueue::with_capacity(3).unwrap();
        queue.send_to_back(None, 1);
        assert!(matches!(queue.receive(None), ReceiveStatus::Received { value: 1, .. }));
        assert_eq!(queue.read_cursor(), 0);

        queue.send_to_front(None, 7);
        assert_eq!(queue.read_cursor(), 2);
        queue.send_to_front(None, 8);
        assert_eq!(drain(&mut queue), vec![8, 7]);
    }

    #[test]
    fn test_queue_capacity() {
        let mut queue = BoundedQueue::with_capacity(2).unwrap();
        queue.send_to_back(None, 1);
        queue.send_to_back(None, 2);
        assert_eq!(queue.send_to_back(None, 3), SendStatus::Blocked);
        assert_eq!(queue.send_to_front(None, 4), SendStatus::Blocked);
        assert_eq!(queue.len(), 2);
        assert_eq!(drain(&mut queue), vec![1, 2]);
    }

    #[test]
    fn test_zero_capacity_is_invalid() {
        assert!(BoundedQueue::<i32>::with_capacity(0).is_err());
    }

    #[test]
    fn test_waiters_wake_in_fifo_order() {
        let a = TaskId::new(1);
        let b = TaskId::new(2);
        let mut queue = BoundedQueue::with_capacity(1).unwrap();
        assert_eq!(queue.receive(Some(a)), ReceiveStatus::Blocked);
        assert_eq!(queue.receive(Some(b)), ReceiveStatus::Blocked);
        assert_eq!(queue.receive(Some(a)), ReceiveStatus::Blocked);
        assert_eq!(queue.receive_waiters().collect::<Vec<_>>(), vec![a, b]);

        assert_eq!(queue.send_to_back(None, 5), SendStatus::Sent { woke: Some(a) });
        assert_eq!(queue.send_to_back(Some(a), 6), SendStatus::Blocked);
        assert_eq!(
            queue.receive(Some(b)),
            ReceiveStatus::Received {
                value: 5,
                woke: Some(a)
            }
        );
        assert_eq!(queue.receive_waiters().count(), 0);
    }
}
