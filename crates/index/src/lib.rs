//! Secondary indexes and the index operator engine for shoal
//!
//! This crate provides:
//! - SecondaryIndex: common contract of every index variant
//! - HashIndex / SkiplistIndex / BitmaskIndex / GeoIndex / EdgeIndex
//! - IndexOperator: condition trees (EQ, NE, LT, LE, GT, GE, AND, OR, NOT)
//! - condition: operator construction from JSON examples and conditions
//! - Evaluate / evaluate: per-index operator evaluation into lazy matches
//! - Window: skip/limit post-filter

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bitmask;
pub mod condition;
pub mod edge;
pub mod eval;
pub mod factory;
pub mod geo;
pub mod hash;
pub mod key;
pub mod operator;
pub mod skiplist;
pub mod traits;
pub mod window;

pub use bitmask::BitmaskIndex;
pub use condition::{from_conditions, from_example};
pub use edge::EdgeIndex;
pub use eval::{evaluate, Evaluate, Matches};
pub use factory::create_index;
pub use geo::{GeoIndex, GeoPoint, EARTH_RADIUS_METERS};
pub use hash::HashIndex;
pub use key::{KeyExtractor, MissingPolicy};
pub use operator::{ComparisonOp, IndexOperator, Literal};
pub use skiplist::SkiplistIndex;
pub use traits::{IndexedDocument, SecondaryIndex};
pub use window::{Page, Window};
