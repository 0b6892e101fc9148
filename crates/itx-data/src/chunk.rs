//! Fixed-size grouping of arbitrary sequences.

/// Lazy iterator over consecutive groups of `size` elements.
///
/// Every group is full except possibly the last. Created by [`chunks`].
#[derive(Debug)]
pub struct Chunks<I> {
    iter: I,
    size: usize,
}

impl<I: Iterator> Iterator for Chunks<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let group: Vec<_> = self.iter.by_ref().take(self.size).collect();
        if group.is_empty() {
            None
        } else {
            Some(group)
        }
    }
}

/// Splits `items` into groups of `size`, preserving order.
///
/// A `size` of zero is treated as one.
pub fn chunks<I: IntoIterator>(items: I, size: usize) -> Chunks<I::IntoIter> {
    Chunks {
        iter: items.into_iter(),
        size: size.max(1),
    }
}
