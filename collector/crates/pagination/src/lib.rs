//! Page arithmetic for offset-paginated listings.
//!
//! Listing endpoints report a `total_results` figure alongside one page of
//! `results`. Callers fetch page 1, read the total, and then request the
//! remaining pages. [`PagePlan`] captures that arithmetic so every listing
//! (species counts, observers, identifiers, observations) requests exactly
//! `ceil(total / per_page)` pages.
//!
//! # Example
//!
//! ```
//! use std::num::NonZeroU32;
//!
//! use pagination::PagePlan;
//!
//! let per_page = NonZeroU32::new(500).expect("non-zero page size");
//! let plan = PagePlan::new(1234, per_page);
//! assert_eq!(plan.page_count(), 3);
//! assert_eq!(plan.remaining_pages().collect::<Vec<_>>(), vec![2, 3]);
//! ```

use std::num::NonZeroU32;

use thiserror::Error;

/// Errors raised when a page size is supplied as a plain integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PaginationError {
    /// A page size of zero can never make progress.
    #[error("page size must be greater than zero")]
    ZeroPageSize,
}

/// Validate a raw page size.
///
/// # Errors
///
/// Returns [`PaginationError::ZeroPageSize`] when `raw` is zero.
pub fn page_size(raw: u32) -> Result<NonZeroU32, PaginationError> {
    NonZeroU32::new(raw).ok_or(PaginationError::ZeroPageSize)
}

/// The pages needed to cover a listing of known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePlan {
    total_results: u64,
    per_page: NonZeroU32,
    page_count: u32,
}

impl PagePlan {
    /// Plan the pages for `total_results` entries served `per_page` at a time.
    ///
    /// Page counts beyond `u32::MAX` saturate.
    #[must_use]
    pub fn new(total_results: u64, per_page: NonZeroU32) -> Self {
        let pages = total_results.div_ceil(u64::from(per_page.get()));
        Self {
            total_results,
            per_page,
            page_count: u32::try_from(pages).unwrap_or(u32::MAX),
        }
    }

    /// Total number of entries the listing reported.
    #[must_use]
    pub const fn total_results(&self) -> u64 {
        self.total_results
    }

    /// Entries requested per page.
    #[must_use]
    pub const fn per_page(&self) -> NonZeroU32 {
        self.per_page
    }

    /// Number of pages, `0` for an empty listing.
    #[must_use]
    pub const fn page_count(&self) -> u32 {
        self.page_count
    }

    /// All one-based page numbers in request order.
    pub fn pages(&self) -> impl Iterator<Item = u32> + use<> {
        1..=self.page_count
    }

    /// Page numbers still to fetch once page 1 has been read.
    pub fn remaining_pages(&self) -> impl Iterator<Item = u32> + use<> {
        2..=self.page_count
    }
}

#[cfg(test)]
mod tests {
    //! Page arithmetic coverage.

    use super::*;
    use rstest::rstest;

    fn per_page(raw: u32) -> NonZeroU32 {
        match page_size(raw) {
            Ok(size) => size,
            Err(err) => panic!("valid page size: {err}"),
        }
    }

    #[rstest]
    #[case::empty(0, 500, 0)]
    #[case::single_partial(1, 500, 1)]
    #[case::exact(1000, 500, 2)]
    #[case::one_over(1001, 500, 3)]
    #[case::species_listing(1234, 500, 3)]
    fn counts_pages_with_ceiling_division(
        #[case] total: u64,
        #[case] size: u32,
        #[case] expected: u32,
    ) {
        assert_eq!(PagePlan::new(total, per_page(size)).page_count(), expected);
    }

    #[rstest]
    fn remaining_pages_skip_the_first() {
        let plan = PagePlan::new(1234, per_page(500));
        assert_eq!(plan.pages().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(plan.remaining_pages().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[rstest]
    fn empty_listing_has_no_pages() {
        let plan = PagePlan::new(0, per_page(200));
        assert_eq!(plan.pages().count(), 0);
        assert_eq!(plan.remaining_pages().count(), 0);
    }

    #[rstest]
    fn rejects_zero_page_size() {
        assert_eq!(page_size(0), Err(PaginationError::ZeroPageSize));
    }
}
