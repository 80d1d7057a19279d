use std::fmt;
use std::str::FromStr;

use log::{debug, trace, warn};
use serde_json::Value;

use crate::resource::PagedResource;

/// Errors raised by page cache lookups and live buffering
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageCacheError {
    #[error("page cache holds no pages")]
    Empty,

    #[error("page token `{0}` is not supported here")]
    Unsupported(PageToken),

    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    /// The tail of the cache is no longer the page live events are filling.
    /// Happens when an appended page lands between two live events.
    #[error("live page {expected} is not the tail of the cache (tail is page {found})")]
    InterleavedProducers { expected: u64, found: u64 },
}

/// Symbolic page reference used by lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageToken {
    First,
    Last,
    Current,
}

impl PageToken {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageToken::First => "first",
            PageToken::Last => "last",
            PageToken::Current => "current",
        }
    }
}

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PageToken {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first" => Ok(PageToken::First),
            "last" => Ok(PageToken::Last),
            "current" => Ok(PageToken::Current),
            other => Err(format!("unknown page token: {other}")),
        }
    }
}

/// Where `add` puts a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Append to the end of the cache (pages built from live events)
    Append,
    /// The page already exists server-side; only advance the page counter
    Remote,
}

/// One chunk of job events
#[derive(Debug, Clone, PartialEq)]
pub struct Page<E> {
    pub number: u64,
    pub events: Vec<E>,
    /// Rendered lines attributed to this page, reported by the renderer
    pub lines: usize,
}

impl<E> Page<E> {
    pub fn numbered(number: u64) -> Self {
        Self {
            number,
            events: Vec::new(),
            lines: 0,
        }
    }

    pub fn with_events(mut self, events: Vec<E>) -> Self {
        self.events = events;
        self
    }

    pub fn with_lines(mut self, lines: usize) -> Self {
        self.lines = lines;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageWindow {
    /// Pages allowed to keep their event bodies
    pub limit: usize,
    /// Events per page
    pub size: usize,
    /// Number of the page live events are filling, 0 before the first one
    pub current: u64,
    /// Cache index of that page
    pub index: usize,
    /// Pages ever created, including remote ones
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResultWindow {
    pub limit: usize,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferState {
    pub count: usize,
}

/// Windowed page cache for one job-output view.
///
/// Pages are numbered as they are created and never renumbered. Once more
/// than `page.limit` pages exist, the oldest lose their event bodies but keep
/// their number and line count until `trim` drops them.
#[derive(Debug, Clone)]
pub struct PageCache<E> {
    page: PageWindow,
    result: ResultWindow,
    buffer: BufferState,
    cache: Vec<Page<E>>,
    related: String,
}

impl<E> PageCache<E> {
    #[must_use]
    pub fn new<R: PagedResource>(resource: &R) -> Self {
        let mut cache = Self::with_config(resource.page_limit(), resource.page_size());
        cache.related = resource.related().to_string();
        cache
    }

    /// Build a cache directly from a page limit and size
    #[must_use]
    pub fn with_config(limit: usize, size: usize) -> Self {
        let mut cache = Self {
            page: PageWindow::default(),
            result: ResultWindow::default(),
            buffer: BufferState::default(),
            cache: Vec::new(),
            related: String::new(),
        };
        cache.reset(limit, size);
        cache
    }

    /// Reset all state from the resource's paging configuration.
    /// Safe to call again when the view is re-entered.
    pub fn init<R: PagedResource>(&mut self, resource: &R) {
        self.related = resource.related().to_string();
        self.reset(resource.page_limit(), resource.page_size());
    }

    fn reset(&mut self, limit: usize, size: usize) {
        if limit == 0 || size == 0 {
            warn!("Page cache configured with limit={limit} size={size}, clamping to 1");
        }
        let limit = limit.max(1);
        let size = size.max(1);

        self.page = PageWindow {
            limit,
            size,
            current: 0,
            index: 0,
            count: 0,
        };
        self.result = ResultWindow {
            limit: limit * size,
            count: 0,
        };
        self.buffer = BufferState { count: 0 };
        self.cache.clear();
        debug!("Page cache reset: limit={limit} size={size}");
    }

    pub fn add(&mut self, page: Page<E>, placement: Placement) {
        if placement == Placement::Append {
            self.buffer.count += page.events.len();
            self.cache.push(page);
        }
        self.page.count += 1;
    }

    /// Buffer one live event. Returns `true` when the event opened a new page.
    pub fn add_to_buffer(&mut self, event: E) -> Result<bool, PageCacheError> {
        let allocate = self.result.count % self.page.size == 0;

        if allocate {
            let number = self.page.count + 1;
            self.add(Page::numbered(number).with_events(vec![event]), Placement::Append);
            self.page.current = number;
            self.page.index = self.cache.len() - 1;
            trace!("Allocated live page {number}");
            self.trim_buffer();
        } else {
            let last = self.cache.len().checked_sub(1).ok_or(PageCacheError::Empty)?;
            if self.page.index != last {
                return Err(PageCacheError::InterleavedProducers {
                    expected: self.page.current,
                    found: self.cache[last].number,
                });
            }
            self.cache[last].events.push(event);
            self.buffer.count += 1;
        }

        self.result.count += 1;

        Ok(allocate)
    }

    /// Empty the event bodies of pages outside the retention window
    pub fn trim_buffer(&mut self) {
        let diff = self.cache.len().saturating_sub(self.page.limit);

        for page in self.cache.iter_mut().take(diff) {
            if !page.events.is_empty() {
                self.buffer.count -= page.events.len();
                trace!("Evicting {} events from page {}", page.events.len(), page.number);
                page.events.clear();
            }
        }
    }

    /// Drain every buffered event, oldest page first
    pub fn empty_buffer(&mut self) -> Vec<E> {
        let mut drained = Vec::with_capacity(self.buffer.count);

        for page in &mut self.cache {
            self.buffer.count -= page.events.len();
            drained.append(&mut page.events);
        }

        drained
    }

    #[must_use]
    pub fn is_over_capacity(&self) -> bool {
        self.cache.len() > self.page.limit
    }

    /// Remove pages beyond the limit, oldest first. Returns the number of
    /// rendered lines those pages accounted for.
    pub fn trim(&mut self) -> usize {
        let count = self.cache.len().saturating_sub(self.page.limit);
        if count == 0 {
            return 0;
        }

        let mut lines = 0;
        for page in self.cache.drain(..count) {
            lines += page.lines;
            self.buffer.count -= page.events.len();
        }
        self.page.index = self.page.index.saturating_sub(count);

        debug!("Trimmed {count} pages ({lines} lines)");
        lines
    }

    pub fn get_page_number(&self, token: PageToken) -> Result<u64, PageCacheError> {
        match token {
            PageToken::First => self
                .cache
                .first()
                .map(|page| page.number)
                .ok_or(PageCacheError::Empty),
            // TODO: decide whether `last` should report the tail page or the
            // last page known to the server before supporting it
            other => Err(PageCacheError::Unsupported(other)),
        }
    }

    /// Record rendered lines against the page live events are filling
    pub fn update_line_count(&mut self, token: PageToken, lines: usize) -> Result<(), PageCacheError> {
        if token != PageToken::Current {
            return Err(PageCacheError::Unsupported(token));
        }

        let page = self.cache.last_mut().ok_or(PageCacheError::Empty)?;
        if page.lines > 0 {
            page.lines += lines;
        } else {
            page.lines = lines;
        }
        Ok(())
    }

    /// Results the backing resource currently holds
    pub fn current<'r, R: PagedResource>(&self, resource: &'r R) -> Option<&'r Value> {
        resource.model_get(&format!("related.{}.results", self.related))
    }

    pub fn next(&mut self) -> Result<(), PageCacheError> {
        Err(PageCacheError::NotImplemented("next"))
    }

    pub fn prev(&mut self) -> Result<(), PageCacheError> {
        Err(PageCacheError::NotImplemented("prev"))
    }

    pub fn page(&self) -> &PageWindow {
        &self.page
    }

    pub fn result(&self) -> &ResultWindow {
        &self.result
    }

    pub fn buffer(&self) -> &BufferState {
        &self.buffer
    }

    pub fn pages(&self) -> &[Page<E>] {
        &self.cache
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::JobEventsResource;
    use serde_json::json;

    fn non_empty_pages<E>(cache: &PageCache<E>) -> usize {
        cache.pages().iter().filter(|p| !p.events.is_empty()).count()
    }

    #[test]
    fn init_reads_resource_paging() {
        let resource = JobEventsResource::new(json!({}), "job_events", 5, 50);
        let cache: PageCache<u32> = PageCache::new(&resource);

        assert_eq!(cache.page().limit, 5);
        assert_eq!(cache.page().size, 50);
        assert_eq!(cache.page().count, 0);
        assert_eq!(cache.result().limit, 250);
        assert_eq!(cache.result().count, 0);
        assert_eq!(cache.buffer().count, 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn init_resets_existing_state() {
        let resource = JobEventsResource::new(json!({}), "job_events", 2, 2);
        let mut cache = PageCache::new(&resource);
        for i in 0..5 {
            cache.add_to_buffer(i).unwrap();
        }

        cache.init(&resource);

        assert!(cache.is_empty());
        assert_eq!(cache.page().count, 0);
        assert_eq!(cache.result().count, 0);
        assert_eq!(cache.buffer().count, 0);
    }

    #[test]
    fn zero_config_is_clamped() {
        let cache: PageCache<u32> = PageCache::with_config(0, 0);
        assert_eq!(cache.page().limit, 1);
        assert_eq!(cache.page().size, 1);
    }

    #[test]
    fn add_remote_only_counts() {
        let mut cache: PageCache<u32> = PageCache::with_config(3, 10);

        cache.add(Page::numbered(1).with_events(vec![1, 2]), Placement::Remote);
        assert_eq!(cache.page().count, 1);
        assert!(cache.is_empty());

        cache.add(Page::numbered(2), Placement::Append);
        assert_eq!(cache.page().count, 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.pages()[0].lines, 0);
        assert!(cache.pages()[0].events.is_empty());
    }

    #[test]
    fn allocates_on_page_boundaries() {
        let mut cache = PageCache::with_config(100, 4);
        let mut allocated_on = Vec::new();

        for call in 1..=13 {
            if cache.add_to_buffer(call).unwrap() {
                allocated_on.push(call);
            }
        }

        assert_eq!(allocated_on, vec![1, 5, 9, 13]);
        assert_eq!(cache.result().count, 13);
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn seven_events_two_page_window() {
        let mut cache = PageCache::with_config(2, 3);
        let mut allocations = Vec::new();

        for e in 1..=7 {
            allocations.push(cache.add_to_buffer(format!("E{e}")).unwrap());
        }

        assert_eq!(
            allocations,
            vec![true, false, false, true, false, false, true]
        );
        assert_eq!(cache.len(), 3);
        assert!(cache.pages()[0].events.is_empty());
        assert_eq!(cache.pages()[1].events, vec!["E4", "E5", "E6"]);
        assert_eq!(cache.pages()[2].events, vec!["E7"]);
        assert_eq!(cache.buffer().count, 4);
        assert_eq!(non_empty_pages(&cache), 2);
    }

    #[test]
    fn trim_buffer_leaves_pages_in_place() {
        let mut cache: PageCache<u32> = PageCache::with_config(1, 10);
        cache.add(Page::numbered(1).with_events(vec![1, 2, 3]), Placement::Append);
        cache.add(Page::numbered(2).with_events(vec![4]), Placement::Append);
        cache.add(Page::numbered(3).with_events(vec![5, 6]), Placement::Append);

        cache.trim_buffer();

        assert_eq!(cache.len(), 3);
        assert_eq!(non_empty_pages(&cache), 1);
        assert_eq!(cache.pages()[2].events, vec![5, 6]);
        assert_eq!(cache.buffer().count, 2);
        assert_eq!(cache.page().count, 3);

        // Already evicted pages are skipped
        cache.trim_buffer();
        assert_eq!(cache.buffer().count, 2);
    }

    #[test]
    fn remote_pages_are_not_evicted_until_live_activity() {
        let mut cache = PageCache::with_config(1, 2);
        cache.add(Page::numbered(1).with_events(vec![1, 2]), Placement::Append);
        cache.add(Page::numbered(2).with_events(vec![3, 4]), Placement::Append);

        assert_eq!(non_empty_pages(&cache), 2);

        cache.add_to_buffer(5).unwrap();
        assert_eq!(non_empty_pages(&cache), 1);
        assert_eq!(cache.buffer().count, 1);
    }

    #[test]
    fn empty_buffer_drains_in_order() {
        let mut cache = PageCache::with_config(10, 2);
        for e in 1..=5 {
            cache.add_to_buffer(e).unwrap();
        }

        let drained = cache.empty_buffer();

        assert_eq!(drained, vec![1, 2, 3, 4, 5]);
        assert_eq!(cache.buffer().count, 0);
        assert!(cache.pages().iter().all(|p| p.events.is_empty()));
        assert_eq!(cache.len(), 3);
        assert!(cache.empty_buffer().is_empty());
    }

    #[test]
    fn filling_continues_after_drain() {
        let mut cache = PageCache::with_config(10, 3);
        cache.add_to_buffer(1).unwrap();
        cache.empty_buffer();

        assert!(!cache.add_to_buffer(2).unwrap());
        assert_eq!(cache.pages()[0].events, vec![2]);
    }

    #[test]
    fn trim_within_limit_is_noop() {
        let mut cache: PageCache<u32> = PageCache::with_config(3, 1);
        cache.add(Page::numbered(1).with_lines(4), Placement::Append);
        cache.add(Page::numbered(2).with_lines(4), Placement::Append);

        assert!(!cache.is_over_capacity());
        assert_eq!(cache.trim(), 0);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn trim_removes_oldest_and_reports_lines() {
        let mut cache: PageCache<u32> = PageCache::with_config(2, 1);
        for (number, lines) in [(1, 3), (2, 5), (3, 7), (4, 11)] {
            cache.add(Page::numbered(number).with_lines(lines), Placement::Append);
        }

        assert!(cache.is_over_capacity());
        assert_eq!(cache.trim(), 8);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_page_number(PageToken::First), Ok(3));
        assert_eq!(cache.page().count, 4);
    }

    #[test]
    fn trim_keeps_buffer_count_consistent() {
        let mut cache = PageCache::with_config(1, 1);
        cache.add(Page::numbered(1).with_events(vec![1, 2]), Placement::Append);
        cache.add(Page::numbered(2).with_events(vec![3]), Placement::Append);

        cache.trim();

        assert_eq!(cache.buffer().count, 1);
    }

    #[test]
    fn first_page_number_after_history() {
        let mut cache = PageCache::with_config(3, 1);
        cache.add(Page::numbered(1), Placement::Remote);
        cache.add(Page::numbered(2), Placement::Remote);
        for e in 0..3 {
            cache.add_to_buffer(e).unwrap();
        }

        let numbers: Vec<u64> = cache.pages().iter().map(|p| p.number).collect();
        assert_eq!(numbers, vec![3, 4, 5]);
        assert_eq!(cache.get_page_number(PageToken::First), Ok(3));
    }

    #[test]
    fn unsupported_tokens_are_reported() {
        let mut cache = PageCache::with_config(3, 1);
        cache.add_to_buffer(1).unwrap();

        assert_eq!(
            cache.get_page_number(PageToken::Last),
            Err(PageCacheError::Unsupported(PageToken::Last))
        );
        assert_eq!(
            cache.update_line_count(PageToken::First, 2),
            Err(PageCacheError::Unsupported(PageToken::First))
        );
        assert_eq!(cache.next(), Err(PageCacheError::NotImplemented("next")));
        assert_eq!(cache.prev(), Err(PageCacheError::NotImplemented("prev")));
    }

    #[test]
    fn empty_cache_lookups_fail() {
        let mut cache: PageCache<u32> = PageCache::with_config(3, 1);
        assert_eq!(cache.get_page_number(PageToken::First), Err(PageCacheError::Empty));
        assert_eq!(
            cache.update_line_count(PageToken::Current, 1),
            Err(PageCacheError::Empty)
        );
    }

    #[test]
    fn update_line_count_sets_then_adds() {
        let mut cache = PageCache::with_config(3, 10);
        cache.add_to_buffer(1).unwrap();

        cache.update_line_count(PageToken::Current, 4).unwrap();
        assert_eq!(cache.pages()[0].lines, 4);

        cache.update_line_count(PageToken::Current, 3).unwrap();
        assert_eq!(cache.pages()[0].lines, 7);
    }

    #[test]
    fn interleaved_append_is_rejected() {
        let mut cache = PageCache::with_config(5, 3);
        cache.add_to_buffer(1).unwrap();
        cache.add(Page::numbered(2).with_events(vec![99]), Placement::Append);

        let err = cache.add_to_buffer(2).unwrap_err();

        assert_eq!(
            err,
            PageCacheError::InterleavedProducers {
                expected: 1,
                found: 2
            }
        );
        assert_eq!(cache.result().count, 1);
        assert_eq!(cache.pages()[0].events, vec![1]);
    }

    #[test]
    fn current_reads_resource_results() {
        let resource = JobEventsResource::new(
            json!({"related": {"job_events": {"results": [{"counter": 1}]}}}),
            "job_events",
            5,
            50,
        );
        let cache: PageCache<u32> = PageCache::new(&resource);

        assert_eq!(cache.current(&resource), Some(&json!([{"counter": 1}])));
    }

    #[test]
    fn page_token_parsing() {
        assert_eq!("first".parse::<PageToken>(), Ok(PageToken::First));
        assert_eq!("current".parse::<PageToken>(), Ok(PageToken::Current));
        assert!("middle".parse::<PageToken>().is_err());
    }
}
