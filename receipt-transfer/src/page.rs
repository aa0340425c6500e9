//! Page arithmetic (spec.md §4.6): receipts are bucketed into fixed-width
//! time pages so transfer can be resumed and bounded without a cursor.

use compute_validator_common::time::TimestampSeconds;

pub type Page = i64;

pub const DEFAULT_PAGE_DURATION_SECONDS: u64 = 3600;
pub const DEFAULT_COLD_CUTOFF_SECONDS: u64 = 5 * 3600;
pub const DEFAULT_N_ACTIVE_PAGES: u32 = 2;

/// `page(t) = floor((t - epoch) / page_duration)`, with `epoch = 0` (the
/// Unix epoch): there's no reason to offset it further, and a fixed epoch
/// keeps page numbers stable across validator restarts and independent of
/// deployment time.
pub fn page(t: TimestampSeconds, page_duration_seconds: u64) -> Page {
    (t / page_duration_seconds) as Page
}

/// `current_page` down to `current_page - n_active_pages + 1`: the "hot"
/// window the keep-up loop repeatedly re-fetches.
pub fn hot_pages(now: TimestampSeconds, page_duration_seconds: u64, n_active_pages: u32) -> Vec<Page> {
    let current = page(now, page_duration_seconds);
    ((current - n_active_pages as Page + 1)..=current).rev().collect()
}

/// `[cutoff_page, current_page - n_active_pages]` newest-first: the "cold"
/// window the catch-up loop (or a `Once` run) sweeps.
pub fn cold_pages(
    now: TimestampSeconds,
    page_duration_seconds: u64,
    n_active_pages: u32,
    cold_cutoff_seconds: u64,
) -> Vec<Page> {
    let current = page(now, page_duration_seconds);
    let hot_floor = current - n_active_pages as Page + 1;
    let cutoff = page(now.saturating_sub(cold_cutoff_seconds), page_duration_seconds);
    if cutoff >= hot_floor {
        return Vec::new();
    }
    (cutoff..hot_floor).rev().collect()
}

/// `[cutoff_page, current_page]` newest-first: the full range a `Once` run
/// transfers (spec.md §4.6, "Once").
pub fn all_pages(
    now: TimestampSeconds,
    page_duration_seconds: u64,
    cold_cutoff_seconds: u64,
) -> Vec<Page> {
    let current = page(now, page_duration_seconds);
    let cutoff = page(now.saturating_sub(cold_cutoff_seconds), page_duration_seconds);
    (cutoff..=current).rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_buckets_by_fixed_width() {
        assert_eq!(page(0, 3600), 0);
        assert_eq!(page(3599, 3600), 0);
        assert_eq!(page(3600, 3600), 1);
    }

    #[test]
    fn hot_pages_are_newest_first_and_n_wide() {
        let pages = hot_pages(10_000, 3600, 2);
        assert_eq!(pages, vec![page(10_000, 3600), page(10_000, 3600) - 1]);
    }

    #[test]
    fn cold_pages_exclude_the_hot_window() {
        let now = 100 * 3600;
        let cold = cold_pages(now, 3600, 2, 5 * 3600);
        assert_eq!(cold.first().copied(), Some(page(now, 3600) - 2));
        assert_eq!(cold.last().copied(), Some(page(now - 5 * 3600, 3600)));
    }

    #[test]
    fn all_pages_span_cutoff_to_current_newest_first() {
        let now = 10 * 3600;
        let pages = all_pages(now, 3600, 5 * 3600);
        assert_eq!(pages.first().copied(), Some(page(now, 3600)));
        assert_eq!(pages.last().copied(), Some(page(now - 5 * 3600, 3600)));
        assert!(pages.windows(2).all(|w| w[0] > w[1]));
    }
}
