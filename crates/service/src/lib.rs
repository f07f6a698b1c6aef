//! Session-scoped flash messages on top of a hash-map backend.
//! - `flash::FlashStore` queues and consumes read-once messages per category.
//! - `backend` holds the backend seam plus Redis and in-memory adapters.
//! - `flash::format` renders printf-style templates before queueing.

pub mod errors;
pub mod backend;
pub mod flash;
pub mod metrics;

pub use errors::{BackendError, FlashError, FlashMap, Recovered};
pub use flash::{FlashConfig, FlashRequest, FlashResponse, FlashStore};
