//! # Latest-Frame Buffer
//!
//! Single-slot holder for the most recently decoded picture, plus the list of
//! per-frame observers.
//!
//! ## Architecture
//!
//! - **Slot**: `Mutex<Option<Arc<Frame>>>`. A new picture is installed by
//!   swapping the `Arc`, never by writing into the previous picture's bytes,
//!   so a reader holding an older `Arc` keeps a complete picture.
//! - **Observers**: stored as `Arc<dyn Fn>` so [`FrameBuffer::publish`] can
//!   clone the list out of the lock and invoke callbacks without holding it.
//!   A panicking observer is caught and logged; capture continues.
//!
//! ## Ordering
//!
//! `publish` runs every observer for a picture before returning, and the
//! decode thread is the only publisher, so observers for picture *n* finish
//! before picture *n + 1* is installed.
//!
//! ## Performance Characteristics
//!
//! - `get()`: one lock + one `Arc` clone, no pixel copy
//! - `get_copy()`: full pixel copy, for callers that mutate the picture
//! - `publish()`: one lock for the swap, one for the observer snapshot

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Pixel layout of a decoded picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 3 bytes per pixel, B, G, R
    Bgr24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Bgr24 => 3,
        }
    }
}

/// One complete decoded picture.
#[derive(Clone)]
pub struct Frame {
    /// Pixel data. Length is `stride * height`.
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    /// Bytes per row
    pub stride: usize,
    pub format: PixelFormat,
    /// Per-connection decode counter, starting at 0
    pub sequence: u64,
    /// When the picture finished decoding
    pub captured_at: Instant,
}

impl Frame {
    /// Wrap tightly packed BGR24 pixels.
    pub fn bgr24(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            data: Arc::new(data),
            width,
            height,
            stride: width as usize * PixelFormat::Bgr24.bytes_per_pixel(),
            format: PixelFormat::Bgr24,
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Expected byte length of one tightly packed picture.
    pub fn packed_len(width: u32, height: u32, format: PixelFormat) -> usize {
        width as usize * height as usize * format.bytes_per_pixel()
    }

    /// Copy with its own pixel storage.
    pub fn deep_copy(&self) -> Self {
        Self {
            data: Arc::new(self.data.as_ref().clone()),
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Callback invoked synchronously on the decode thread for every picture.
pub type FrameObserver = Arc<dyn Fn(&Arc<Frame>) + Send + Sync>;

/// Handle returned by [`FrameBuffer::add_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Single-slot latest-frame holder with observer fan-out.
#[derive(Default)]
pub struct FrameBuffer {
    slot: Mutex<Option<Arc<Frame>>>,
    observers: Mutex<Vec<(ObserverId, FrameObserver)>>,
    next_observer: AtomicU64,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current picture, shared. No pixel copy.
    pub fn get(&self) -> Option<Arc<Frame>> {
        self.slot.lock().clone()
    }

    /// Current picture with private pixel storage.
    pub fn get_copy(&self) -> Option<Frame> {
        let current = self.get()?;
        Some(current.deep_copy())
    }

    /// Install a new picture without notifying observers.
    pub fn set(&self, frame: Frame) -> Arc<Frame> {
        let frame = Arc::new(frame);
        *self.slot.lock() = Some(Arc::clone(&frame));
        frame
    }

    /// Install a new picture and run every observer on it.
    ///
    /// Returns the number of observers that panicked.
    pub fn publish(&self, frame: Frame) -> usize {
        let frame = self.set(frame);
        let observers: Vec<FrameObserver> = self
            .observers
            .lock()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        let mut failed = 0;
        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(&frame))).is_err() {
                failed += 1;
                warn!(sequence = frame.sequence, "frame observer panicked, ignoring");
            }
        }
        failed
    }

    pub fn clear(&self) {
        self.slot.lock().take();
    }

    pub fn add_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&Arc<Frame>) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().push((id, Arc::new(observer)));
        id
    }

    /// Detach an observer. Returns false if it was not registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn solid(value: u8, sequence: u64) -> Frame {
        Frame::bgr24(vec![value; 4 * 2 * 3], 4, 2, sequence)
    }

    #[test]
    fn test_empty_buffer() {
        let buffer = FrameBuffer::new();
        assert!(buffer.get().is_none());
        assert!(buffer.get_copy().is_none());
    }

    #[test]
    fn test_set_replaces_without_touching_old_frame() {
        let buffer = FrameBuffer::new();
        buffer.set(solid(1, 0));
        let held = buffer.get().unwrap();
        buffer.set(solid(2, 1));

        assert!(held.data.iter().all(|&b| b == 1));
        assert_eq!(buffer.get().unwrap().sequence, 1);
        assert_eq!(held.stride, 12);
    }

    #[test]
    fn test_get_copy_is_independent() {
        let buffer = FrameBuffer::new();
        buffer.set(solid(7, 0));
        let copy = buffer.get_copy().unwrap();
        let shared = buffer.get().unwrap();
        assert!(!Arc::ptr_eq(&copy.data, &shared.data));
        assert_eq!(copy.data.as_slice(), shared.data.as_slice());
    }

    #[test]
    fn test_clear() {
        let buffer = FrameBuffer::new();
        buffer.set(solid(1, 0));
        buffer.clear();
        assert!(buffer.get().is_none());
    }

    #[test]
    fn test_observers_run_and_can_be_removed() {
        let buffer = FrameBuffer::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let id = buffer.add_observer(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        buffer.publish(solid(1, 0));
        buffer.publish(solid(2, 1));
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        assert!(buffer.remove_observer(id));
        assert!(!buffer.remove_observer(id));
        buffer.publish(solid(3, 2));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_observer_does_not_stop_others() {
        let buffer = FrameBuffer::new();
        let seen = Arc::new(AtomicUsize::new(0));
        buffer.add_observer(|_| panic!("observer bug"));
        let counter = Arc::clone(&seen);
        buffer.add_observer(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(buffer.publish(solid(1, 0)), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(buffer.get().unwrap().sequence, 0);
    }

    #[test]
    fn test_observer_may_read_buffer_without_deadlock() {
        let buffer = Arc::new(FrameBuffer::new());
        let inner = Arc::clone(&buffer);
        let matched = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&matched);
        buffer.add_observer(move |frame| {
            if let Some(current) = inner.get() {
                if current.sequence == frame.sequence {
                    hits.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
        buffer.publish(solid(1, 5));
        assert_eq!(matched.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_torn_frames_under_concurrency() {
        let buffer = Arc::new(FrameBuffer::new());
        let writer_buffer = Arc::clone(&buffer);
        let writer = thread::spawn(move || {
            for i in 0..2_000u64 {
                let value = (i % 251) as u8;
                writer_buffer.publish(Frame::bgr24(vec![value; 64 * 48 * 3], 64, 48, i));
            }
        });

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    let mut checked = 0;
                    for _ in 0..5_000 {
                        if let Some(frame) = buffer.get() {
                            let expected = (frame.sequence % 251) as u8;
                            assert_eq!(frame.data.len(), 64 * 48 * 3);
                            assert!(frame.data.iter().all(|&b| b == expected));
                            checked += 1;
                        }
                    }
                    checked
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(buffer.get().unwrap().sequence, 1_999);
    }
}
