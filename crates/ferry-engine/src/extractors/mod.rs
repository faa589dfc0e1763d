//! Extractor implementations, selected by [`ExtractorSpec`](crate::catalog::ExtractorSpec) tag.

mod destination_scan;
mod entity_attributes;
mod file_archive;
mod paged;

pub use destination_scan::DestinationScanExtractor;
pub use entity_attributes::EntityAttributesExtractor;
pub use file_archive::FileArchiveExtractor;
pub use paged::PagedExtractor;
