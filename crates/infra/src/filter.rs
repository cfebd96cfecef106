//! Listing filters and paginated result envelopes.
//!
//! Callers hand in loosely-typed [`FilterParams`] (usually straight from a query
//! string); repositories only ever see the normalised [`Filter`], whose sort
//! column is one of a closed, per-listing set.

use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "asc" => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }

    /// Apply this order to an ascending comparison.
    pub fn apply(self, ord: core::cmp::Ordering) -> core::cmp::Ordering {
        match self {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    }
}

/// Whitelisted sort column of one listing.
pub trait SortColumn: Copy + Default {
    fn parse(raw: &str) -> Option<Self>;
    fn as_str(&self) -> &'static str;
}

macro_rules! sort_columns {
    ($(#[$meta:meta])* $name:ident { $default:ident => $default_str:literal $(, $variant:ident => $s:literal)* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub enum $name {
            #[default]
            $default,
            $($variant,)*
        }

        impl SortColumn for $name {
            fn parse(raw: &str) -> Option<Self> {
                match raw {
                    $default_str => Some(Self::$default),
                    $($s => Some(Self::$variant),)*
                    _ => None,
                }
            }

            fn as_str(&self) -> &'static str {
                match self {
                    Self::$default => $default_str,
                    $(Self::$variant => $s,)*
                }
            }
        }
    };
}

sort_columns!(
    /// Sort keys for a user's session list.
    SessionSort { CreatedAt => "created_at", ExpiresAt => "expires_at" }
);

sort_columns!(
    /// Sort keys for "my workspaces".
    WorkspaceSort { CreatedAt => "created_at", UpdatedAt => "updated_at", Name => "name", Role => "role" }
);

sort_columns!(
    /// Sort keys for a workspace's member list.
    MemberSort { JoinedAt => "joined_at", Name => "name", Email => "email", Role => "role" }
);

/// Raw listing parameters as received from a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    pub limit: i64,
    pub offset: i64,
    pub sort_by: String,
    pub order: String,
    pub search: String,
}

impl FilterParams {
    /// Clamp and whitelist into a [`Filter`].
    ///
    /// Non-positive limits become [`DEFAULT_LIMIT`], large ones [`MAX_LIMIT`];
    /// negative offsets become zero; unknown sort columns fall back to the
    /// listing's default; anything but `asc` sorts descending.
    pub fn normalize<K: SortColumn>(&self) -> Filter<K> {
        let limit = if self.limit <= 0 {
            DEFAULT_LIMIT
        } else {
            self.limit.min(MAX_LIMIT as i64) as u32
        };
        let search = self.search.trim().to_lowercase();

        Filter {
            limit,
            offset: self.offset.max(0) as u64,
            sort_by: K::parse(self.sort_by.trim().to_ascii_lowercase().as_str()).unwrap_or_default(),
            order: SortOrder::parse(&self.order),
            search: (!search.is_empty()).then_some(search),
        }
    }
}

/// Normalised listing filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter<K> {
    pub limit: u32,
    pub offset: u64,
    pub sort_by: K,
    pub order: SortOrder,
    /// Lower-cased needle, matched case-insensitively as a substring.
    pub search: Option<String>,
}

impl<K: SortColumn> Default for Filter<K> {
    fn default() -> Self {
        FilterParams::default().normalize()
    }
}

impl<K: SortColumn> Filter<K> {
    /// True when no search is set or any haystack contains the needle.
    pub fn matches<'a>(&self, haystacks: impl IntoIterator<Item = &'a str>) -> bool {
        match &self.search {
            None => true,
            Some(needle) => haystacks.into_iter().any(|h| h.to_lowercase().contains(needle.as_str())),
        }
    }

    /// Slice the already-sorted window `[offset, offset + limit)` out of `rows`.
    pub fn window<T>(&self, rows: Vec<T>) -> Vec<T> {
        rows.into_iter()
            .skip(usize::try_from(self.offset).unwrap_or(usize::MAX))
            .take(self.limit as usize)
            .collect()
    }

    pub fn info(&self) -> FilterInfo {
        FilterInfo {
            sort_by: self.sort_by.as_str().to_string(),
            order: self.order,
            search: self.search.clone(),
        }
    }
}

/// One page of a listing plus the parameters that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: PaginationInfo,
    pub filters: FilterInfo,
}

impl<T> Page<T> {
    pub fn new<K: SortColumn>(data: Vec<T>, total: u64, filter: &Filter<K>) -> Self {
        Self {
            data,
            pagination: PaginationInfo {
                limit: filter.limit,
                offset: filter.offset,
                total,
            },
            filters: filter.info(),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            data: self.data.into_iter().map(f).collect(),
            pagination: self.pagination,
            filters: self.filters,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaginationInfo {
    pub limit: u32,
    pub offset: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterInfo {
    pub sort_by: String,
    pub order: SortOrder,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}
