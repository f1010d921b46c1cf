//! Tuning blob: container selection, section framing and parsing.
//!
//! ```text
//! image ──select_revision──▶ payload ──BlobParser::parse──▶ ParsedBlob
//!                             │
//!                             └─find_section──▶ Section (borrowed view)
//! ```

pub mod builder;
pub mod container;
pub mod cursor;
pub mod header;
pub mod parsed;
pub mod section;

pub use header::{BlobHeader, ChannelInfo};
pub use parsed::{AlgoParam, BlobParser, BlockOps, ChannelTables, ParsedBlob};
pub use section::{find_section, walk_sections, ChannelSelector, Section, SectionTag};
