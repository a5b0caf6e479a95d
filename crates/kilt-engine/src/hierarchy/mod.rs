//! Class hierarchy: cid ranges and the subtype oracle

pub mod cid_range;
pub mod info;

pub use cid_range::{build_ranges, ranges_contain, CidRange};
pub use info::{HierarchyInfo, HierarchyOracle};
