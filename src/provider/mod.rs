//! Remote adapters.
//!
//! One adapter per resource kind translates validated attribute sets into
//! transport calls and remote objects back into attribute sets. The
//! [`ProviderRegistry`] maps kinds to adapters and schemas.

mod adapter;
mod api_cache;
mod registry;

pub use adapter::{ImportedResource, ResourceAdapter};
pub use api_cache::{api_cache_schema, ApiCacheAdapter, API_CACHE_KIND};
pub use registry::{builtin_schemas, ProviderRegistry};
