//! File system helpers: exclusions, destination readiness and tree walking.

pub mod exclusions;
pub mod readiness;
pub mod walker;

pub use exclusions::ExclusionSet;
pub use readiness::{check_destination, DestinationSpec, Readiness};
