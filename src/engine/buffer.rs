use std::collections::VecDeque;

/// Fixed-capacity FIFO of per-frame presence flags.
///
/// The count of `true` entries is maintained incrementally so `ratio()` is
/// O(1) regardless of capacity.
#[derive(Clone, Debug)]
pub struct RollingBuffer {
    entries: VecDeque<bool>,
    capacity: usize,
    present: usize,
}

impl RollingBuffer {
    /// Create a buffer holding at most `capacity` entries.
    ///
    /// A zero capacity is raised to one; config validation rejects it earlier.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
            present: 0,
        }
    }

    /// Append a presence flag, evicting the oldest entry once over capacity.
    pub fn push(&mut self, has_detection: bool) {
        self.entries.push_back(has_detection);
        if has_detection {
            self.present += 1;
        }
        while self.entries.len() > self.capacity {
            if let Some(true) = self.entries.pop_front() {
                self.present -= 1;
            }
        }
    }

    /// Fraction of buffered frames that contained a detection.
    ///
    /// Returns `None` while the buffer is empty.
    pub fn ratio(&self) -> Option<f64> {
        if self.entries.is_empty() {
            return None;
        }
        Some(self.present as f64 / self.entries.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffered frames with a detection.
    pub fn present(&self) -> usize {
        self.present
    }

    /// Oldest-first view of the buffered flags.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.entries.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_never_exceeds_capacity() {
        let mut buffer = RollingBuffer::new(4);
        for i in 0..20 {
            buffer.push(i % 3 == 0);
            assert!(buffer.len() <= 4);
        }
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn evicts_oldest_first() {
        let mut buffer = RollingBuffer::new(3);
        buffer.push(true);
        buffer.push(false);
        buffer.push(false);
        buffer.push(true);

        let flags: Vec<bool> = buffer.iter().collect();
        assert_eq!(flags, vec![false, false, true]);
        assert_eq!(buffer.present(), 1);
    }

    #[test]
    fn ratio_is_exact_fraction_of_present_frames() {
        let mut buffer = RollingBuffer::new(10);
        for flag in [true, true, false, true] {
            buffer.push(flag);
        }
        assert_eq!(buffer.ratio(), Some(0.75));

        for _ in 0..10 {
            buffer.push(false);
        }
        assert_eq!(buffer.ratio(), Some(0.0));
    }

    #[test]
    fn empty_buffer_has_no_ratio() {
        let buffer = RollingBuffer::new(15);
        assert!(buffer.is_empty());
        assert_eq!(buffer.ratio(), None);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut buffer = RollingBuffer::new(0);
        buffer.push(true);
        buffer.push(false);
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.iter().collect::<Vec<_>>(), vec![false]);
    }
}
