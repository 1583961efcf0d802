pub mod extractor;
pub mod service;
pub mod shard;
pub mod translator;

pub use extractor::{Extractor, NullExtractor};
pub use service::{Server, Service};
pub use shard::Shard;
