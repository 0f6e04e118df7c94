//! Bounded multi-producer/multi-consumer queue.
//!
//! A fixed-capacity ring buffer where every cell carries a sequence number.
//! Producers and consumers claim positions with a CAS on the shared tail/head
//! cursors and use the cell sequence to tell whether the cell is ready to be
//! written or read, so no lock is ever taken.

use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Cell<T> {
    sequence: AtomicUsize,
    data: UnsafeCell<MaybeUninit<T>>,
}

/// A bounded lock-free FIFO queue with power-of-two capacity.
pub struct BoundedQueue<T> {
    buffer: Box<[Cell<T>]>,
    mask: usize,
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,
}

// SAFETY: a cell's data is only touched by the single thread that won the
// CAS on the matching position, and the sequence store publishes the write.
unsafe impl<T: Send> Send for BoundedQueue<T> {}
unsafe impl<T: Send> Sync for BoundedQueue<T> {}

impl<T> BoundedQueue<T> {
    /// Creates a queue holding at least `capacity` items.
    ///
    /// The capacity is rounded up to the next power of two (minimum 2).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let buffer = (0..capacity)
            .map(|i| Cell {
                sequence: AtomicUsize::new(i),
                data: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        BoundedQueue {
            buffer,
            mask: capacity - 1,
            enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
            dequeue_pos: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Pushes an item, handing it back if the queue is momentarily full.
    pub fn enqueue(&self, item: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;

            if diff == 0 {
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*cell.data.get()).write(item) };
                        cell.sequence.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return Err(item);
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Pops the oldest item, or `None` if the queue is empty.
    pub fn dequeue(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos.wrapping_add(1) as isize;

            if diff == 0 {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let item = unsafe { (*cell.data.get()).assume_init_read() };
                        cell.sequence
                            .store(pos.wrapping_add(self.mask + 1), Ordering::Release);
                        return Some(item);
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Approximate number of queued items. Exact only when quiescent.
    pub fn len(&self) -> usize {
        let tail = self.enqueue_pos.load(Ordering::Acquire);
        let head = self.dequeue_pos.load(Ordering::Acquire);
        tail.wrapping_sub(head).min(self.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        while self.dequeue().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        assert_eq!(BoundedQueue::<u32>::new(5).capacity(), 8);
        assert_eq!(BoundedQueue::<u32>::new(16).capacity(), 16);
        assert_eq!(BoundedQueue::<u32>::new(0).capacity(), 2);
    }

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::new(4);
        for i in 0..4 {
            queue.enqueue(i).unwrap();
        }
        assert_eq!(queue.len(), 4);
        for i in 0..4 {
            assert_eq!(queue.dequeue(), Some(i));
        }
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_full_queue_returns_item() {
        let queue = BoundedQueue::new(2);
        queue.enqueue(1).unwrap();
        queue.enqueue(2).unwrap();
        assert_eq!(queue.enqueue(3), Err(3));

        assert_eq!(queue.dequeue(), Some(1));
        queue.enqueue(3).unwrap();
        assert_eq!(queue.dequeue(), Some(2));
        assert_eq!(queue.dequeue(), Some(3));
    }

    #[test]
    fn test_drop_releases_pending_items() {
        let tracker = Arc::new(());
        {
            let queue = BoundedQueue::new(8);
            for _ in 0..5 {
                queue.enqueue(tracker.clone()).unwrap();
            }
            assert_eq!(Arc::strong_count(&tracker), 6);
        }
        assert_eq!(Arc::strong_count(&tracker), 1);
    }

    #[test]
    fn test_concurrent_producers_consumers() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 10_000;

        let queue = Arc::new(BoundedQueue::new(1024));
        let mut producers = Vec::new();
        for p in 0..PRODUCERS {
            let queue = queue.clone();
            producers.push(thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let mut item = p * PER_PRODUCER + i;
                    while let Err(back) = queue.enqueue(item) {
                        item = back;
                        thread::yield_now();
                    }
                }
            }));
        }

        let mut consumers = Vec::new();
        for _ in 0..PRODUCERS {
            let queue = queue.clone();
            consumers.push(thread::spawn(move || {
                let mut seen = Vec::new();
                while seen.len() < PER_PRODUCER {
                    match queue.dequeue() {
                        Some(item) => seen.push(item),
                        None => thread::yield_now(),
                    }
                }
                seen
            }));
        }

        for p in producers {
            p.join().unwrap();
        }
        let mut all = HashSet::new();
        for c in consumers {
            for item in c.join().unwrap() {
                assert!(all.insert(item), "item {} dequeued twice", item);
            }
        }
        assert_eq!(all.len(), PRODUCERS * PER_PRODUCER);
        assert!(queue.is_empty());
    }
}
