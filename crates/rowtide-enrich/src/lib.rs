mod cache;
mod error;
mod filter;
mod loader;
mod lookup;
mod lookup_cache;
mod runner;
mod streaming;

pub use cache::SnapshotCache;
pub use error::{EnrichError, EnrichResult};
pub use filter::StaticFilter;
pub use loader::RemoteLoader;
pub use lookup::{Lookup, LookupResult};
pub use lookup_cache::{CachedPayload, LookupCache};
pub use runner::LoadRunner;
pub use streaming::StreamingLookup;
