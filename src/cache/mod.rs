pub mod fetcher;
pub mod store;

pub use fetcher::{CachedFetcher, ReqwestTransport};
pub use store::{CacheStore, MemoryCache};
