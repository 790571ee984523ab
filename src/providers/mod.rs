pub mod cache;
pub mod http;
pub mod remote;

// Re-exports for convenience
pub use cache::{DiskCache, MemoryCache};
pub use remote::{FetchedData, ProviderProfile, RemoteDataProvider};
