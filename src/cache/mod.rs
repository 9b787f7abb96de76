//! Revalidation cache for rendered view counts.
//!
//! Listing and detail reads are served from memory for a bounded window
//! (`revalidate.window_seconds`, 60 seconds by default) before the store is
//! queried again. See [`RevalidatingCounts`].

mod revalidate;

pub use revalidate::{
    DEFAULT_REVALIDATE_CAPACITY, DEFAULT_REVALIDATE_SECS, RevalidatingCounts, RevalidationConfig,
};
