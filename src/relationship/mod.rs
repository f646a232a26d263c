//! Stickie relationships
//!
//! Typed, directed edges between stickies, stored in the AGE graph with a
//! relational mirror as the degraded-mode fallback.

pub mod graph;
pub mod manager;
pub mod mirror;
pub mod types;

pub use graph::AgeGraph;
pub use manager::RelationshipManager;
pub use mirror::PgMirror;
pub use types::{normalize_labels, Direction, EdgeKey, RelationType, Relationship};
