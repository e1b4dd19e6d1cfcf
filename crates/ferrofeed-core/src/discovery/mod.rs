//! Schema and type discovery over arbitrary JSON documents.
//!
//! Discovery is pure and synchronous: the same sample document always yields
//! the same field tree and leaf-path listing.

pub mod schema;
pub mod types;

pub use schema::{all_paths, build_tree, discover, DiscoveryResult, FieldNode};
pub use types::{infer_type, is_date_like, parse_calendar_millis, parse_numeric, FieldType};
