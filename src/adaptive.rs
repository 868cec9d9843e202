//! Rolling size statistics behind the adaptive output-buffer allocation.
//!
//! Before a top-level encode, the buffer asks these statistics how many
//! bytes to reserve; afterwards the observed size feeds back in. The
//! averages deliberately lean toward their current value and overestimate
//! in steady state, trading a little memory for zero reallocation on the
//! hot path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::trace;

/// Floor for the per-encode baseline.
const EXTRA_ALLOC_MIN: usize = 64;
/// Floor for the per-item average.
const ITEM_ALLOC_MIN: usize = 6;

/// Rolling averages of encoded output sizes.
///
/// `extra_avg` tracks the bytes a top-level encode needs regardless of item
/// count; `item_avg` tracks bytes per element when the top-level value is an
/// array or map. A process-wide instance backs [`EncodeOptions`] by default,
/// and workloads with very different shapes can isolate their statistics by
/// supplying their own instance.
///
/// Updates use relaxed atomics: a racing update may be lost, never torn.
///
/// [`EncodeOptions`]: crate::EncodeOptions
#[derive(Debug)]
pub struct AllocStats {
    extra_avg: AtomicUsize,
    item_avg: AtomicUsize,
}

impl AllocStats {
    /// Fresh statistics, starting from the documented minima.
    pub fn new() -> Self {
        Self {
            extra_avg: AtomicUsize::new(EXTRA_ALLOC_MIN),
            item_avg: AtomicUsize::new(ITEM_ALLOC_MIN),
        }
    }

    /// Predicted output size for a top-level value holding `nitems`
    /// elements (zero for scalars).
    pub(crate) fn predict(&self, nitems: usize) -> usize {
        let extra = self.extra_avg.load(Ordering::Relaxed);
        let item = self.item_avg.load(Ordering::Relaxed);
        extra.saturating_add(nitems.saturating_mul(item))
    }

    /// Fold the outcome of a successful top-level encode back in.
    pub(crate) fn record(&self, used: usize, nitems: usize) {
        let extra = biased_average(self.extra_avg.load(Ordering::Relaxed), used);
        self.extra_avg
            .store(extra.max(EXTRA_ALLOC_MIN), Ordering::Relaxed);

        if nitems == 0 {
            return;
        }

        let per_item = used / nitems;
        let item = biased_average(self.item_avg.load(Ordering::Relaxed), per_item);
        self.item_avg
            .store(item.max(ITEM_ALLOC_MIN), Ordering::Relaxed);

        trace!(used, nitems, extra_avg = extra, item_avg = item, "updated allocation averages");
    }

    #[cfg(test)]
    fn snapshot(&self) -> (usize, usize) {
        (
            self.extra_avg.load(Ordering::Relaxed),
            self.item_avg.load(Ordering::Relaxed),
        )
    }
}

impl Default for AllocStats {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide statistics used when options don't supply their own.
pub(crate) fn global() -> Arc<AllocStats> {
    static GLOBAL: OnceLock<Arc<AllocStats>> = OnceLock::new();
    GLOBAL.get_or_init(|| Arc::new(AllocStats::new())).clone()
}

/// Rolling average leaning toward the current value, with growth per step
/// capped at a factor of two.
fn biased_average(cur: usize, new: usize) -> usize {
    let cur_doubled = cur.saturating_mul(2);
    if new > cur_doubled {
        return cur_doubled;
    }
    (cur_doubled + new) / 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn biased_average_leans_current() {
        // (2*90 + 120) / 3 = 100
        assert_eq!(biased_average(90, 120), 100);
        // a repeated input is a fixpoint (within integer truncation)
        assert_eq!(biased_average(100, 100), 100);
    }

    #[test]
    fn biased_average_caps_growth() {
        assert_eq!(biased_average(10, 1000), 20);
        assert_eq!(biased_average(10, 20), 13);
    }

    #[test]
    fn minima_are_enforced() {
        let stats = AllocStats::new();
        stats.record(1, 1);
        let (extra, item) = stats.snapshot();
        assert!(extra >= EXTRA_ALLOC_MIN);
        assert!(item >= ITEM_ALLOC_MIN);
    }

    #[test]
    fn prediction_converges_on_a_steady_workload() {
        let stats = AllocStats::new();
        let used = 4000;
        let nitems = 10;
        for _ in 0..64 {
            stats.record(used, nitems);
        }
        let predicted = stats.predict(nitems);
        // Converges to within 2x of the actual size, never below it for long.
        assert!(predicted >= used, "predicted {} < used {}", predicted, used);
        assert!(predicted <= used * 2, "predicted {} > 2x used {}", predicted, used);
    }

    #[test]
    fn scalar_encodes_leave_item_avg_alone() {
        let stats = AllocStats::new();
        stats.record(500, 0);
        let (_, item) = stats.snapshot();
        assert_eq!(item, ITEM_ALLOC_MIN);
    }
}
