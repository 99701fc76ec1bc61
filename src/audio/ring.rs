// SampleRing - lock-free SPSC float ring between capture and graph threads
//
// Single producer (the audio callback) and single consumer (the graph
// feeder) share a fixed buffer through two atomic indices. One slot is kept
// empty to distinguish full from empty, so a ring of capacity C holds at
// most C-1 samples. The producer never blocks: when the ring is full the
// remainder of the chunk is dropped and counted.
//
// Ordering protocol:
// - push: load tail with Acquire (observe consumer progress), copy samples,
//   store head with Release (publish the copied samples)
// - pop_exact: load head with Acquire (observe published samples), copy,
//   store tail with Release (hand slots back to the producer)

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

struct RingInner {
    buf: UnsafeCell<Box<[f32]>>,
    cap: usize,
    /// Write index (producer-owned)
    head: AtomicUsize,
    /// Read index (consumer-owned)
    tail: AtomicUsize,
    /// Samples dropped because the ring was full
    dropped: AtomicU64,
}

// The index protocol guarantees producer and consumer never touch the same
// slots: the producer writes only in [head, tail-1) and the consumer reads
// only in [tail, head).
unsafe impl Sync for RingInner {}
unsafe impl Send for RingInner {}

/// Producer half of the ring. Owned by the audio capture thread.
pub struct RingProducer {
    inner: Arc<RingInner>,
}

/// Consumer half of the ring. Owned by the graph feeder.
pub struct RingConsumer {
    inner: Arc<RingInner>,
}

/// Create a ring holding up to `capacity - 1` samples.
///
/// The pipeline sizes this at five seconds of audio so a stalled graph
/// worker has generous slack before capture overflow starts dropping.
///
/// # Panics
/// Panics if `capacity < 2` (one slot is reserved for the full/empty
/// discriminator).
pub fn sample_ring(capacity: usize) -> (RingProducer, RingConsumer) {
    assert!(capacity >= 2, "ring capacity must be at least 2");
    let inner = Arc::new(RingInner {
        buf: UnsafeCell::new(vec![0.0_f32; capacity].into_boxed_slice()),
        cap: capacity,
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
        dropped: AtomicU64::new(0),
    });
    (
        RingProducer {
            inner: Arc::clone(&inner),
        },
        RingConsumer { inner },
    )
}

impl RingProducer {
    /// Push up to `samples.len()` samples; returns how many were accepted.
    ///
    /// Best-effort: a full ring drops the remainder rather than blocking
    /// the capture callback. Dropped samples are counted.
    pub fn push(&mut self, samples: &[f32]) -> usize {
        let inner = &*self.inner;
        let cap = inner.cap;
        let mut written = 0;

        while written < samples.len() {
            let h = inner.head.load(Ordering::Relaxed);
            let t = inner.tail.load(Ordering::Acquire);
            let free = (t + cap - h - 1) % cap;
            if free == 0 {
                break;
            }
            let to_write = free.min(samples.len() - written);
            let idx = h % cap;
            let chunk = to_write.min(cap - idx);

            // Producer-exclusive region [h, h+chunk): the consumer will not
            // read past head, and no other producer exists.
            unsafe {
                let buf = &mut *inner.buf.get();
                buf[idx..idx + chunk].copy_from_slice(&samples[written..written + chunk]);
            }
            inner.head.store((h + chunk) % cap, Ordering::Release);
            written += chunk;
        }

        let shortfall = samples.len() - written;
        if shortfall > 0 {
            inner.dropped.fetch_add(shortfall as u64, Ordering::Relaxed);
        }
        written
    }

    /// Total samples dropped on overflow since construction.
    pub fn dropped_samples(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

impl RingConsumer {
    /// Pop exactly `out.len()` samples, or nothing.
    ///
    /// Returns false without consuming anything when fewer samples are
    /// buffered; the graph never processes a partial hop.
    pub fn pop_exact(&mut self, out: &mut [f32]) -> bool {
        let inner = &*self.inner;
        let cap = inner.cap;
        let n = out.len();

        let t = inner.tail.load(Ordering::Relaxed);
        let h = inner.head.load(Ordering::Acquire);
        let available = (h + cap - t) % cap;
        if available < n {
            return false;
        }

        let idx = t % cap;
        let chunk = n.min(cap - idx);
        // Consumer-exclusive region [t, t+n): the producer will not write
        // into slots it has not been handed back.
        unsafe {
            let buf = &*inner.buf.get();
            out[..chunk].copy_from_slice(&buf[idx..idx + chunk]);
            if n > chunk {
                out[chunk..].copy_from_slice(&buf[..n - chunk]);
            }
        }
        inner.tail.store((t + n) % cap, Ordering::Release);
        true
    }

    /// Samples currently buffered.
    pub fn available(&self) -> usize {
        let inner = &*self.inner;
        let t = inner.tail.load(Ordering::Relaxed);
        let h = inner.head.load(Ordering::Acquire);
        (h + inner.cap - t) % inner.cap
    }

    /// Total samples the producer dropped on overflow.
    pub fn dropped_samples(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}
