use arbitrary::{Arbitrary, Unstructured};

/// Returns a uniform float in `[0, 1)`. An exhausted `Unstructured` yields `0.0`.
pub(crate) fn unit(u: &mut Unstructured<'_>) -> arbitrary::Result<f64> {
    Ok(u32::arbitrary(u)? as f64 / (u32::MAX as f64 + 1.0))
}

/// Weighted candidates that are drawn without replacement.
///
/// Every draw picks among the remaining candidates with probability
/// proportional to weight, by scanning partial sums against a uniform
/// target in `[0, total)`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Pool<T> {
    items: Vec<(f64, T)>,
    total: f64,
}

impl<T> Pool<T> {
    pub(crate) fn new(items: Vec<(f64, T)>) -> Self {
        let total = items.iter().map(|(w, _)| w).sum();
        Self { items, total }
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    /// Removes and returns a candidate, or `None` if the pool is empty.
    pub(crate) fn draw(&mut self, u: &mut Unstructured<'_>) -> arbitrary::Result<Option<T>> {
        if self.items.len() <= 1 {
            return Ok(self.items.pop().map(|(_, x)| x));
        }
        let target = unit(u)? * self.total;
        let mut running = 0.0;
        // rounding can leave `target` just past the last partial sum
        let mut chosen = self.items.len() - 1;
        for (i, (w, _)) in self.items.iter().enumerate() {
            running += w;
            if running > target {
                chosen = i;
                break;
            }
        }
        let (w, x) = self.items.remove(chosen);
        self.total -= w;
        Ok(Some(x))
    }
}
