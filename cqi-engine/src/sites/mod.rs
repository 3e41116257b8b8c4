//! Site databases: connection routing and driver-neutral rows

pub mod router;
pub mod rows;

pub use router::{RouterOptions, SiteHandle, SiteInfo, SiteRegistry, SiteRouter};
pub use rows::{row_to_json, RawRow, RawValue};
