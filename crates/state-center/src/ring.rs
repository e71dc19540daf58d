use std::collections::VecDeque;

/// Fixed-capacity buffer that drops the oldest item when full.
#[derive(Debug)]
pub(crate) struct BoundedRing<T> {
    capacity: usize,
    data: VecDeque<T>,
}

impl<T> BoundedRing<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            data: VecDeque::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, item: T) {
        if self.data.len() == self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(item);
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }
}

impl<T: Clone> BoundedRing<T> {
    /// Oldest first.
    pub(crate) fn snapshot(&self) -> Vec<T> {
        self.data.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_oldest_when_full() {
        let mut ring = BoundedRing::new(2);
        ring.push(1);
        ring.push(2);
        ring.push(3);
        assert_eq!(ring.snapshot(), vec![2, 3]);
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn zero_capacity_keeps_one() {
        let mut ring = BoundedRing::new(0);
        ring.push("a");
        ring.push("b");
        assert_eq!(ring.snapshot(), vec!["b"]);
    }
}
