//! Client-side paging over an already-fetched collection
//!
//! Pages are 1-based. All functions are total: out-of-range pages yield an
//! empty window rather than panicking.

/// Entries shown per vital-signs page
pub const PAGE_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Prev,
}

/// Entries `(page-1)*page_size .. page*page_size`, clipped to the collection
pub fn window<T>(collection: &[T], page: usize, page_size: usize) -> &[T] {
    let page = page.max(1);
    let start = (page - 1).saturating_mul(page_size).min(collection.len());
    let end = page.saturating_mul(page_size).min(collection.len());
    &collection[start..end]
}

/// ceil(len / page_size), never less than 1
pub fn total_pages(len: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 1;
    }
    len.div_ceil(page_size).max(1)
}

/// Page after moving in `direction`; unchanged when there is nowhere to go
pub fn advance(direction: Direction, current_page: usize, len: usize, page_size: usize) -> usize {
    match direction {
        Direction::Next if current_page.saturating_mul(page_size) < len => current_page + 1,
        Direction::Prev if current_page > 1 => current_page - 1,
        _ => current_page,
    }
}

/// Current page over a collection of fixed page size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pager {
    current_page: usize,
    page_size: usize,
}

impl Default for Pager {
    fn default() -> Self {
        Self::new(PAGE_SIZE)
    }
}

impl Pager {
    pub fn new(page_size: usize) -> Self {
        Self {
            current_page: 1,
            page_size: page_size.max(1),
        }
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn window<'a, T>(&self, collection: &'a [T]) -> &'a [T] {
        window(collection, self.current_page, self.page_size)
    }

    pub fn total_pages(&self, len: usize) -> usize {
        total_pages(len, self.page_size)
    }

    pub fn has_next(&self, len: usize) -> bool {
        advance(Direction::Next, self.current_page, len, self.page_size) != self.current_page
    }

    pub fn has_prev(&self) -> bool {
        self.current_page > 1
    }

    /// Move one page; returns whether the page changed
    pub fn advance(&mut self, direction: Direction, len: usize) -> bool {
        let next = advance(direction, self.current_page, len, self.page_size);
        let moved = next != self.current_page;
        self.current_page = next;
        moved
    }

    /// Jump to `page`, clamped to the pages `len` entries fill
    pub fn go_to(&mut self, page: usize, len: usize) {
        self.current_page = page.clamp(1, self.total_pages(len));
    }

    pub fn reset(&mut self) {
        self.current_page = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_twelve_entries_three_pages() {
        let items: Vec<u32> = (0..12).collect();
        assert_eq!(total_pages(items.len(), 5), 3);
        assert_eq!(window(&items, 1, 5), &[0, 1, 2, 3, 4]);
        assert_eq!(window(&items, 3, 5), &[10, 11]);
        assert_eq!(advance(Direction::Next, 3, 12, 5), 3);
        assert_eq!(advance(Direction::Prev, 1, 12, 5), 1);
        assert_eq!(advance(Direction::Next, 2, 12, 5), 3);
        assert_eq!(advance(Direction::Prev, 3, 12, 5), 2);
    }

    #[test]
    fn test_empty_collection() {
        let items: Vec<u32> = Vec::new();
        assert_eq!(total_pages(0, 5), 1);
        assert!(window(&items, 1, 5).is_empty());
        assert_eq!(advance(Direction::Next, 1, 0, 5), 1);
    }

    #[test]
    fn test_exact_multiple_has_no_extra_page() {
        assert_eq!(total_pages(10, 5), 2);
        assert_eq!(advance(Direction::Next, 2, 10, 5), 2);
    }

    #[test]
    fn test_out_of_range_page_is_empty() {
        let items: Vec<u32> = (0..3).collect();
        assert!(window(&items, 7, 5).is_empty());
        assert_eq!(window(&items, 0, 5), &[0, 1, 2]);
    }

    #[test]
    fn test_pager_navigation() {
        let mut pager = Pager::default();
        assert_eq!(pager.page_size(), PAGE_SIZE);
        assert!(!pager.has_prev());
        assert!(pager.has_next(12));

        assert!(pager.advance(Direction::Next, 12));
        assert!(pager.advance(Direction::Next, 12));
        assert!(!pager.advance(Direction::Next, 12));
        assert_eq!(pager.current_page(), 3);
        assert!(!pager.has_next(12));

        pager.reset();
        assert_eq!(pager.current_page(), 1);
    }

    #[test]
    fn test_pager_go_to_clamps() {
        let mut pager = Pager::default();
        pager.go_to(9, 12);
        assert_eq!(pager.current_page(), 3);
        pager.go_to(0, 12);
        assert_eq!(pager.current_page(), 1);
    }

    proptest! {
        #[test]
        fn prop_windows_partition_collection(len in 0usize..200, size in 1usize..20) {
            let items: Vec<usize> = (0..len).collect();
            let pages = total_pages(len, size);
            let joined: Vec<usize> = (1..=pages)
                .flat_map(|p| window(&items, p, size).to_vec())
                .collect();
            prop_assert_eq!(joined, items);
        }

        #[test]
        fn prop_advance_stays_in_range(len in 0usize..200, size in 1usize..20, start in 1usize..50) {
            let pages = total_pages(len, size);
            let page = start.min(pages);
            let next = advance(Direction::Next, page, len, size);
            let prev = advance(Direction::Prev, page, len, size);
            prop_assert!(next >= 1 && next <= pages);
            prop_assert!(prev >= 1 && prev <= pages);
        }
    }
}
