//! Data models for the upstream illustration service.
//!
//! These mirror the JSON shapes of the upstream app API closely enough to
//! deserialize its responses directly, and are what the stores persist.

mod illust;
mod request;

pub use illust::*;
pub use request::*;

use crate::cache::Cacheable;

impl Cacheable for Illust {
    fn cache_id(&self) -> String {
        self.id.to_string()
    }
}

impl Cacheable for UserDetail {
    fn cache_id(&self) -> String {
        self.user.id.to_string()
    }
}
