//! Range-partitioned harvester for paginated document listings.
//!
//! Workers walk disjoint index ranges of a remote listing, retry under a
//! jittered exponential backoff, claim URLs in a shared seen-set and hand their
//! batches back; one merge then rewrites the text backlog, newest first.

mod error;
mod macros;

pub mod backlog;
pub mod backoff;
pub mod config;
pub mod dedup;
pub mod fetch;
pub mod monitor;
pub mod process;
pub mod range;
pub mod record;
mod request;

pub use error::{Error, Result};
pub use request::build_client;
