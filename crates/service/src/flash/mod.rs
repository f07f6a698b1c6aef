//! Read-once flash messages keyed by session and category.

pub mod format;
pub mod store;

pub use format::format;
pub use store::{FlashConfig, FlashRequest, FlashResponse, FlashStore};
