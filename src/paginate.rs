//! # Aggregator / Paginator
//! Filter, sort and slice canonical items into fixed-size output pages.
//!
//! - An empty status set filters nothing.
//! - Sorting is stable: equal keys keep their pre-sort order, in both directions.
//! - Text compares case-insensitively, dates chronologically (missing dates first
//!   when ascending), upvotes numerically (missing counts as zero).
//! - There is always at least one page; page numbers past the end give an empty
//!   page that still reports the real totals.

use std::cmp::Ordering;
use std::fmt;

use crate::providers::types::{CanonicalItem, PageMeta, RoadmapPage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Title,
    CreatedAt,
    LastUpdated,
    ReleasedAt,
    Upvotes,
}

impl SortField {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "title" => Some(SortField::Title),
            "createdat" | "date" => Some(SortField::CreatedAt),
            "lastupdated" | "lastmodified" => Some(SortField::LastUpdated),
            "releasedat" | "eta" => Some(SortField::ReleasedAt),
            "upvotes" => Some(SortField::Upvotes),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::Title => "title",
            SortField::CreatedAt => "createdAt",
            SortField::LastUpdated => "lastUpdated",
            SortField::ReleasedAt => "releasedAt",
            SortField::Upvotes => "upvotes",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

impl SortSpec {
    pub const fn new(field: SortField, direction: SortDirection) -> Self {
        Self { field, direction }
    }

    /// Parse `field:dir` (case-insensitive). A bare field sorts ascending.
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let (field, dir) = match lower.split_once(':') {
            Some((f, d)) => (f, d),
            None => (lower.as_str(), "asc"),
        };
        let direction = match dir {
            "asc" => SortDirection::Asc,
            "desc" => SortDirection::Desc,
            _ => return None,
        };
        Some(Self::new(SortField::parse(field)?, direction))
    }

    /// Ordering of `a` relative to `b` under this spec.
    pub fn compare(&self, a: &CanonicalItem, b: &CanonicalItem) -> Ordering {
        let ord = match self.field {
            SortField::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::LastUpdated => a.last_modified.cmp(&b.last_modified),
            SortField::ReleasedAt => a.released_at.cmp(&b.released_at),
            SortField::Upvotes => a.upvotes.unwrap_or(0).cmp(&b.upvotes.unwrap_or(0)),
        };
        match self.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        };
        write!(f, "{}:{}", self.field.as_str(), dir)
    }
}

/// Keep items whose status is in `statuses`; an empty set keeps everything.
pub fn filter_by_status(items: Vec<CanonicalItem>, statuses: &[&str]) -> Vec<CanonicalItem> {
    if statuses.is_empty() {
        return items;
    }
    items
        .into_iter()
        .filter(|it| statuses.iter().any(|s| *s == it.status))
        .collect()
}

/// Stable in-place sort.
pub fn sort_items(items: &mut [CanonicalItem], spec: SortSpec) {
    items.sort_by(|a, b| spec.compare(a, b));
}

/// `max(1, ceil(total / limit))`.
pub fn total_pages(total: usize, limit: u32) -> u32 {
    let limit = limit.max(1) as usize;
    total.div_ceil(limit).max(1) as u32
}

/// Slice `items` into pages of `limit`, stamping each item with its page number.
pub fn paginate(items: Vec<CanonicalItem>, limit: u32) -> Vec<RoadmapPage> {
    let limit = limit.max(1);
    let total = items.len();
    let pages_n = total_pages(total, limit);

    let mut pages: Vec<RoadmapPage> = (1..=pages_n)
        .map(|p| RoadmapPage {
            meta: PageMeta {
                page: p,
                limit,
                total_pages: pages_n,
                total_results: total as u32,
            },
            items: Vec::with_capacity(limit as usize),
        })
        .collect();

    for (i, mut item) in items.into_iter().enumerate() {
        let idx = i / limit as usize;
        item.page = idx as u32 + 1;
        pages[idx].items.push(item);
    }
    pages
}

/// One page of `items`. Past the last page the result is empty but keeps the real totals.
pub fn page_of(items: Vec<CanonicalItem>, page: u32, limit: u32) -> RoadmapPage {
    let limit = limit.max(1);
    let page = page.max(1);
    let total = items.len();
    let start = (page as usize - 1).saturating_mul(limit as usize);

    let slice = items
        .into_iter()
        .skip(start)
        .take(limit as usize)
        .map(|mut it| {
            it.page = page;
            it
        })
        .collect();

    RoadmapPage {
        meta: PageMeta {
            page,
            limit,
            total_pages: total_pages(total, limit),
            total_results: total as u32,
        },
        items: slice,
    }
}
