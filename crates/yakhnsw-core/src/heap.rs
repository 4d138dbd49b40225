//! Binary min-heap with access to both ends
//!
//! Beam search needs the closest element (to expand next) and the furthest
//! element (to evict once a bound is exceeded). `std::collections::BinaryHeap`
//! only exposes one end, so this heap keeps the usual min-ordered array and
//! finds the maximum among the leaves, which is where it must live.
//!
//! ```text
//!            [0] min
//!          /     \
//!       [1]       [2]
//!      /   \     /   \
//!    [3]   [4] [5]   [6]     <- max is one of the leaves (n/2..n)
//! ```

/// Strict ordering used by [`Heap`]
pub trait Lessable {
    fn less(&self, other: &Self) -> bool;
}

/// Binary min-heap over a [`Lessable`] element type
#[derive(Debug, Clone)]
pub struct Heap<T> {
    data: Vec<T>,
}

impl<T: Lessable> Default for Heap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Lessable> Heap<T> {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn push(&mut self, item: T) {
        self.data.push(item);
        let last = self.data.len() - 1;
        self.sift_up(last);
    }

    /// Remove and return the smallest element
    pub fn pop(&mut self) -> Option<T> {
        if self.data.is_empty() {
            return None;
        }
        let item = self.data.swap_remove(0);
        if !self.data.is_empty() {
            self.sift_down(0);
        }
        Some(item)
    }

    /// Smallest element
    pub fn min(&self) -> Option<&T> {
        self.data.first()
    }

    /// Largest element
    pub fn max(&self) -> Option<&T> {
        self.max_index().map(|i| &self.data[i])
    }

    /// Remove and return the largest element
    pub fn pop_last(&mut self) -> Option<T> {
        let idx = self.max_index()?;
        let item = self.data.swap_remove(idx);
        // The slot was a leaf, so the moved element can only need to rise.
        if idx < self.data.len() {
            self.sift_up(idx);
        }
        Some(item)
    }

    /// Consume the heap, returning elements smallest first
    pub fn into_sorted_vec(mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.data.len());
        while let Some(item) = self.pop() {
            out.push(item);
        }
        out
    }

    fn max_index(&self) -> Option<usize> {
        let n = self.data.len();
        if n == 0 {
            return None;
        }
        let mut best = n / 2;
        for i in best + 1..n {
            if self.data[best].less(&self.data[i]) {
                best = i;
            }
        }
        Some(best)
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if !self.data[i].less(&self.data[parent]) {
                break;
            }
            self.data.swap(i, parent);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.data.len();
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }
            let right = left + 1;
            let mut smallest = left;
            if right < n && self.data[right].less(&self.data[left]) {
                smallest = right;
            }
            if !self.data[smallest].less(&self.data[i]) {
                break;
            }
            self.data.swap(i, smallest);
            i = smallest;
        }
    }
}
