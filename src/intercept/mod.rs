//! Network interception layer.
//!
//! Classifies outgoing requests and answers each class with its own caching
//! strategy, so previously loaded pages, assets and API data keep working
//! while the network is down.

mod classify;
mod interceptor;
mod lifecycle;
mod request;
mod response_cache;

pub use classify::{classify, ClassifyRules, ResourceClass};
pub use interceptor::{Interceptor, Network};
pub use lifecycle::{ClientSession, LayerState};
pub use request::{Destination, Mode, Request, Response, FALLBACK_HEADER};
pub use response_cache::{CachedResponse, ResponseCache};
