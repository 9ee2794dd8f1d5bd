use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeError {
    #[error("Playout buffer is empty")]
    Empty,
}

/// Occupancy counter between the admitting pipeline and the player.
///
/// Frames that will never arrive are counted as skipped so the player knows how many to expect.
#[derive(Debug)]
pub struct PlayoutBuffer {
    capacity: usize,
    occupied: AtomicUsize,
    skipped: AtomicUsize,
}

impl PlayoutBuffer {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        PlayoutBuffer {
            capacity: capacity.max(1),
            occupied: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        }
    }

    pub fn for_duration(seconds: u32, fps: u32) -> Self {
        Self::new(seconds as usize * fps as usize)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn occupied(&self) -> usize {
        self.occupied.load(Ordering::SeqCst)
    }

    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Takes one slot if one is free.
    pub fn try_admit(&self) -> bool {
        self.occupied
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_ok()
    }

    pub fn consume(&self) -> Result<(), ConsumeError> {
        self.occupied
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map(|_| ())
            .map_err(|_| ConsumeError::Empty)
    }

    /// Records a frame that will never be admitted.
    pub fn skip(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn admit_up_to_capacity() {
        let buffer = PlayoutBuffer::for_duration(2, 3);
        assert_eq!(buffer.capacity(), 6);
        for _ in 0..6 {
            assert!(buffer.try_admit());
        }
        assert!(!buffer.try_admit());
        assert_eq!(buffer.occupied(), 6);

        assert_eq!(buffer.consume(), Ok(()));
        assert!(buffer.try_admit());
    }

    #[test]
    fn consume_empty() {
        let buffer = PlayoutBuffer::new(4);
        assert_eq!(buffer.consume(), Err(ConsumeError::Empty));
        assert!(buffer.try_admit());
        assert_eq!(buffer.consume(), Ok(()));
        assert_eq!(buffer.consume(), Err(ConsumeError::Empty));
        assert_eq!(buffer.occupied(), 0);
    }

    #[test]
    fn concurrent_admission_never_overfills() {
        let buffer = Arc::new(PlayoutBuffer::new(100));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || (0..50).filter(|_| buffer.try_admit()).count())
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
        assert_eq!(buffer.occupied(), 100);
    }

    #[test]
    fn skips_are_counted() {
        let buffer = PlayoutBuffer::new(1);
        buffer.skip();
        buffer.skip();
        assert_eq!(buffer.skipped(), 2);
        assert_eq!(buffer.occupied(), 0);
    }
}
