//! Keyset pagination over the user directory.
//!
//! The cursor never holds a storage handle. It carries the first and last
//! sort key of the page on screen plus a bounded stack of the first keys of
//! the pages left behind, and travels with every request and response.

use serde::{Deserialize, Serialize};

pub const DIRECTORY_PAGE_SIZE: usize = 10;
pub const DIRECTORY_SEARCH_CAP: usize = 20;
pub const PAGE_STACK_CAPACITY: usize = 256;

/// Bounded LIFO of "first key of page" markers.
///
/// Pushing onto a full stack drops the oldest marker and remembers that it
/// did, so the caller still knows earlier pages exist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageStack {
    #[serde(default)]
    keys: Vec<String>,
    #[serde(default)]
    truncated: bool,
}

impl PageStack {
    pub fn push(&mut self, key: String) {
        if self.keys.len() >= PAGE_STACK_CAPACITY {
            let overflow = self.keys.len() + 1 - PAGE_STACK_CAPACITY;
            self.keys.drain(..overflow);
            self.truncated = true;
        }
        self.keys.push(key);
    }

    pub fn pop(&mut self) -> Option<String> {
        let key = self.keys.pop();
        if key.is_none() {
            self.truncated = false;
        }
        key
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// True while there is any page before the current one.
    pub fn has_previous(&self) -> bool {
        !self.keys.is_empty() || self.truncated
    }

    fn clamp(&mut self) {
        if self.keys.len() > PAGE_STACK_CAPACITY {
            let overflow = self.keys.len() - PAGE_STACK_CAPACITY;
            self.keys.drain(..overflow);
            self.truncated = true;
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorMode {
    #[default]
    Listing,
    Search,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryCursor {
    #[serde(default)]
    pub mode: CursorMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_prefix: Option<String>,
    #[serde(default)]
    pub first_key: Option<String>,
    #[serde(default)]
    pub last_key: Option<String>,
    #[serde(default)]
    pub back_stack: PageStack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageDirection {
    First,
    Next,
    Prev,
}

impl PageDirection {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "first" => Some(Self::First),
            "next" => Some(Self::Next),
            "prev" => Some(Self::Prev),
            _ => None,
        }
    }
}

/// Where a page fetch starts, in sort-key order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStart<'a> {
    Beginning,
    After(&'a str),
    At(&'a str),
}

/// Anything that can hand out records ordered by a unique string key.
pub trait DirectorySource {
    type Record;
    type Error;

    fn sort_key(record: &Self::Record) -> &str;

    fn fetch_page(
        &self,
        start: PageStart<'_>,
        limit: usize,
    ) -> Result<Vec<Self::Record>, Self::Error>;

    fn fetch_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<Self::Record>, Self::Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<R> {
    pub records: Vec<R>,
    pub cursor: DirectoryCursor,
    pub has_next: bool,
    pub has_prev: bool,
}

fn fetch_window<S: DirectorySource>(
    source: &S,
    start: PageStart<'_>,
    page_size: usize,
) -> Result<(Vec<S::Record>, bool), S::Error> {
    let mut records = source.fetch_page(start, page_size + 1)?;
    let has_next = records.len() > page_size;
    records.truncate(page_size);
    Ok((records, has_next))
}

/// Moves the listing cursor one step. A search-mode cursor is discarded
/// and listing restarts from the first page.
pub fn page<S: DirectorySource>(
    source: &S,
    cursor: DirectoryCursor,
    direction: PageDirection,
    page_size: usize,
) -> Result<Page<S::Record>, S::Error> {
    let mut cursor = if cursor.mode == CursorMode::Search {
        DirectoryCursor::default()
    } else {
        cursor
    };
    cursor.back_stack.clamp();

    let direction = if cursor.first_key.is_none() {
        PageDirection::First
    } else {
        direction
    };

    let (records, has_next) = match direction {
        PageDirection::First => {
            cursor = DirectoryCursor::default();
            fetch_window(source, PageStart::Beginning, page_size)?
        }
        PageDirection::Next => {
            let last = cursor.last_key.clone().unwrap_or_default();
            let (records, has_next) = fetch_window(source, PageStart::After(&last), page_size)?;
            if records.is_empty() {
                // Nothing past the current page: stay where we are.
                let first = cursor.first_key.clone().unwrap_or_default();
                fetch_window(source, PageStart::At(&first), page_size)?
            } else {
                if let Some(first) = cursor.first_key.take() {
                    cursor.back_stack.push(first);
                }
                (records, has_next)
            }
        }
        PageDirection::Prev => match cursor.back_stack.pop() {
            Some(key) => fetch_window(source, PageStart::At(&key), page_size)?,
            None => {
                cursor.back_stack = PageStack::default();
                fetch_window(source, PageStart::Beginning, page_size)?
            }
        },
    };

    cursor.first_key = records.first().map(|r| S::sort_key(r).to_string());
    cursor.last_key = records.last().map(|r| S::sort_key(r).to_string());
    let has_prev = cursor.back_stack.has_previous();

    Ok(Page {
        records,
        cursor,
        has_next,
        has_prev,
    })
}

/// One-shot prefix search. Returns at most `cap` matches and a search-mode
/// cursor with no paging state. An empty prefix goes back to listing.
pub fn search<S: DirectorySource>(
    source: &S,
    prefix: &str,
    cap: usize,
    page_size: usize,
) -> Result<Page<S::Record>, S::Error> {
    let prefix = prefix.trim().to_lowercase();
    if prefix.is_empty() {
        return page(
            source,
            DirectoryCursor::default(),
            PageDirection::First,
            page_size,
        );
    }

    let records = source.fetch_prefix(&prefix, cap)?;
    Ok(Page {
        records,
        cursor: DirectoryCursor {
            mode: CursorMode::Search,
            search_prefix: Some(prefix),
            ..DirectoryCursor::default()
        },
        has_next: false,
        has_prev: false,
    })
}
