//! Lock-free per-chain frame buffer
//!
//! Single-producer single-consumer ring of [`FadedFrame`]s between a chain's
//! worker thread and the mixer.
//!
//! Design:
//! - Producer (chain worker): pushes frames in tick order, gets the frame
//!   back when the buffer is full and retries later
//! - Consumer (mixer): pops without locks; an empty buffer reports whether
//!   the producer has finished so underruns can be told apart from a drained
//!   chain
//! - Fixed capacity, no reordering, no duplication

use crate::audio::types::FadedFrame;
use ringbuf::{traits::*, HeapRb};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Push rejected; the frame is handed back unchanged
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferFull(pub FadedFrame);

impl fmt::Display for BufferFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ring buffer full (frame at tick {})", self.0.tick)
    }
}

/// Nothing to pop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferEmpty {
    /// The producer has pushed its last frame; nothing more will arrive
    pub producer_finished: bool,
}

/// Counters shared by both halves
#[derive(Debug, Default)]
struct RingShared {
    written: AtomicU64,
    read: AtomicU64,
    /// Set by the producer after its final push
    finished: AtomicBool,
}

/// Constructor for a producer/consumer pair
pub struct ChainRingBuffer;

impl ChainRingBuffer {
    /// Create a buffer holding at most `capacity` frames (minimum 1)
    pub fn new(capacity: usize) -> (FrameProducer, FrameConsumer) {
        let capacity = capacity.max(1);
        debug!("Creating chain ring buffer with capacity: {} frames", capacity);

        let (producer, consumer) = HeapRb::<FadedFrame>::new(capacity).split();
        let shared = Arc::new(RingShared::default());

        (
            FrameProducer {
                producer,
                shared: Arc::clone(&shared),
            },
            FrameConsumer { consumer, shared },
        )
    }
}

/// Producer half (chain worker)
pub struct FrameProducer {
    producer: ringbuf::HeapProd<FadedFrame>,
    shared: Arc<RingShared>,
}

impl FrameProducer {
    /// Push a frame, or get it back if the buffer is full
    pub fn push(&mut self, frame: FadedFrame) -> Result<(), BufferFull> {
        match self.producer.try_push(frame) {
            Ok(()) => {
                self.shared.written.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(frame) => Err(BufferFull(frame)),
        }
    }

    /// Declare that no more frames will be pushed
    pub fn mark_finished(&self) {
        self.shared.finished.store(true, Ordering::Release);
    }

    pub fn occupied_len(&self) -> usize {
        self.producer.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.producer.capacity().into()
    }

    pub fn is_full(&self) -> bool {
        self.producer.is_full()
    }

    pub fn frames_written(&self) -> u64 {
        self.shared.written.load(Ordering::Relaxed)
    }
}

/// Consumer half (mixer)
pub struct FrameConsumer {
    consumer: ringbuf::HeapCons<FadedFrame>,
    shared: Arc<RingShared>,
}

impl FrameConsumer {
    /// Pop the oldest frame
    ///
    /// Lock-free and allocation-free; safe on the output path.
    pub fn pop(&mut self) -> Result<FadedFrame, BufferEmpty> {
        // Read the flag before popping: if it is set, every push happened
        // before this point and an empty pop really means exhausted.
        let producer_finished = self.shared.finished.load(Ordering::Acquire);
        match self.consumer.try_pop() {
            Some(frame) => {
                self.shared.read.fetch_add(1, Ordering::Relaxed);
                Ok(frame)
            }
            None => Err(BufferEmpty { producer_finished }),
        }
    }

    /// True when empty and the producer has finished
    pub fn is_exhausted(&self) -> bool {
        let finished = self.shared.finished.load(Ordering::Acquire);
        finished && self.consumer.is_empty()
    }

    /// True when empty but more frames are still expected
    pub fn is_starved(&self) -> bool {
        let finished = self.shared.finished.load(Ordering::Acquire);
        !finished && self.consumer.is_empty()
    }

    pub fn producer_finished(&self) -> bool {
        self.shared.finished.load(Ordering::Acquire)
    }

    /// Discard every buffered frame, returning how many were dropped
    pub fn clear(&mut self) -> usize {
        let mut dropped = 0;
        while self.consumer.try_pop().is_some() {
            dropped += 1;
        }
        self.shared.read.fetch_add(dropped as u64, Ordering::Relaxed);
        dropped
    }

    pub fn occupied_len(&self) -> usize {
        self.consumer.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.consumer.capacity().into()
    }

    pub fn frames_read(&self) -> u64 {
        self.shared.read.load(Ordering::Relaxed)
    }

    pub fn frames_written(&self) -> u64 {
        self.shared.written.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::AudioFrame;

    fn frame(n: i64) -> FadedFrame {
        FadedFrame {
            tick: n * 640,
            frame: AudioFrame::from_mono(n as f32 * 0.01),
            gain: 1.0,
        }
    }

    #[test]
    fn test_fifo_order() {
        let (mut prod, mut cons) = ChainRingBuffer::new(8);
        for n in 0..5 {
            prod.push(frame(n)).unwrap();
        }
        for n in 0..5 {
            assert_eq!(cons.pop().unwrap().tick, n * 640);
        }
        assert_eq!(prod.frames_written(), 5);
        assert_eq!(cons.frames_read(), 5);
    }

    #[test]
    fn test_full_returns_frame() {
        let (mut prod, mut cons) = ChainRingBuffer::new(2);
        prod.push(frame(0)).unwrap();
        prod.push(frame(1)).unwrap();
        assert!(prod.is_full());

        let rejected = prod.push(frame(2)).unwrap_err();
        assert_eq!(rejected.0, frame(2));

        // Retry after the consumer makes room
        cons.pop().unwrap();
        prod.push(rejected.0).unwrap();
        assert_eq!(cons.pop().unwrap().tick, 640);
        assert_eq!(cons.pop().unwrap().tick, 1280);
    }

    #[test]
    fn test_empty_distinguishes_underrun_from_finished() {
        let (mut prod, mut cons) = ChainRingBuffer::new(4);
        assert_eq!(cons.pop(), Err(BufferEmpty { producer_finished: false }));
        assert!(cons.is_starved());

        prod.push(frame(0)).unwrap();
        prod.mark_finished();
        assert!(!cons.is_exhausted());
        assert!(cons.pop().is_ok());
        assert_eq!(cons.pop(), Err(BufferEmpty { producer_finished: true }));
        assert!(cons.is_exhausted());
        assert!(!cons.is_starved());
    }

    #[test]
    fn test_clear() {
        let (mut prod, mut cons) = ChainRingBuffer::new(16);
        for n in 0..10 {
            prod.push(frame(n)).unwrap();
        }
        assert_eq!(cons.clear(), 10);
        assert_eq!(cons.occupied_len(), 0);
        assert_eq!(prod.occupied_len(), 0);
    }

    #[test]
    fn test_cross_thread_order() {
        let (mut prod, mut cons) = ChainRingBuffer::new(64);
        let writer = std::thread::spawn(move || {
            for n in 0..10_000 {
                let mut f = frame(n);
                loop {
                    match prod.push(f) {
                        Ok(()) => break,
                        Err(BufferFull(back)) => {
                            f = back;
                            std::thread::yield_now();
                        }
                    }
                }
            }
            prod.mark_finished();
        });

        let mut expected = 0;
        loop {
            match cons.pop() {
                Ok(f) => {
                    assert_eq!(f.tick, expected * 640);
                    expected += 1;
                }
                Err(BufferEmpty { producer_finished: true }) => break,
                Err(_) => std::thread::yield_now(),
            }
        }
        writer.join().unwrap();
        assert_eq!(expected, 10_000);
    }
}
