use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default queue capacity in samples. At 44.1 kHz this is ~370 ms of audio,
/// enough to ride out host scheduling hiccups without audible drops.
pub const DEFAULT_CAPACITY: usize = 16_384;

/// Single-producer / single-consumer ring buffer of mono `f32` samples.
///
/// Intended for the emulator thread (producer) feeding an audio callback
/// thread (consumer) without locks. The queue is *lossy* when full: new
/// pushes are dropped. Pops from an empty queue return `None` and the host
/// substitutes silence.
#[derive(Clone)]
pub struct AudioProducer {
    inner: Arc<Inner>,
}

#[derive(Clone)]
pub struct AudioConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    // One extra slot so head==tail is unambiguously empty.
    buf: Box<[UnsafeCell<MaybeUninit<f32>>]>,
    cap: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// Safe because:
// - Only the producer writes to `buf[head]`.
// - Only the consumer reads from `buf[tail]`.
// - All coordination happens through release/acquire on head and tail.
unsafe impl Sync for Inner {}
unsafe impl Send for Inner {}

impl Inner {
    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        if head >= tail {
            head - tail
        } else {
            (self.cap - tail) + head
        }
    }

    fn capacity(&self) -> usize {
        self.cap.saturating_sub(1)
    }

    #[inline]
    fn next_index(&self, idx: usize) -> usize {
        let next = idx + 1;
        if next == self.cap { 0 } else { next }
    }
}

pub fn audio_queue(capacity: usize) -> (AudioProducer, AudioConsumer) {
    let cap = capacity.saturating_add(1).max(2);
    let mut v: Vec<UnsafeCell<MaybeUninit<f32>>> = Vec::with_capacity(cap);
    for _ in 0..cap {
        v.push(UnsafeCell::new(MaybeUninit::uninit()));
    }

    let inner = Arc::new(Inner {
        buf: v.into_boxed_slice(),
        cap,
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
    });

    (
        AudioProducer {
            inner: Arc::clone(&inner),
        },
        AudioConsumer { inner },
    )
}

impl AudioProducer {
    /// Push one sample. Returns false (dropping the sample) when full.
    #[inline]
    pub fn push(&self, sample: f32) -> bool {
        let head = self.inner.head.load(Ordering::Relaxed);
        let next = self.inner.next_index(head);
        let tail = self.inner.tail.load(Ordering::Acquire);
        if next == tail {
            // Full: drop newest.
            return false;
        }

        unsafe {
            (*self.inner.buf[head].get()).write(sample);
        }
        self.inner.head.store(next, Ordering::Release);
        true
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

impl AudioConsumer {
    #[inline]
    pub fn pop(&self) -> Option<f32> {
        let tail = self.inner.tail.load(Ordering::Relaxed);
        let head = self.inner.head.load(Ordering::Acquire);
        if tail == head {
            return None;
        }

        let sample = unsafe { (*self.inner.buf[tail].get()).assume_init_read() };
        let next = self.inner.next_index(tail);
        self.inner.tail.store(next, Ordering::Release);
        Some(sample)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_roundtrip() {
        let (tx, rx) = audio_queue(4);
        assert!(tx.push(0.25));
        assert!(tx.push(-0.5));
        assert_eq!(rx.pop(), Some(0.25));
        assert_eq!(rx.pop(), Some(-0.5));
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn full_queue_drops_newest() {
        let (tx, rx) = audio_queue(2);
        assert!(tx.push(1.0));
        assert!(tx.push(2.0));
        assert!(!tx.push(3.0));
        assert_eq!(rx.pop(), Some(1.0));
        assert_eq!(rx.pop(), Some(2.0));
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn len_tracks_across_wraparound() {
        let (tx, rx) = audio_queue(3);
        for round in 0..10 {
            assert!(tx.push(round as f32));
            assert_eq!(tx.len(), 1);
            assert_eq!(rx.pop(), Some(round as f32));
            assert_eq!(rx.len(), 0);
        }
    }

    #[test]
    fn cross_thread_transfer() {
        let (tx, rx) = audio_queue(DEFAULT_CAPACITY);
        let producer = std::thread::spawn(move || {
            for i in 0..1000 {
                while !tx.push(i as f32) {
                    std::thread::yield_now();
                }
            }
        });
        let mut received = 0u32;
        while received < 1000 {
            if let Some(s) = rx.pop() {
                assert_eq!(s, received as f32);
                received += 1;
            }
        }
        producer.join().unwrap();
    }
}
