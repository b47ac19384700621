//! API implementation submodules.
//!
//! Each submodule contains `impl PixCache` blocks that extend the public API
//! with resource-specific methods. The struct definition remains in `lib.rs`.

mod admin;
mod builder;
mod engine;
mod illusts;
mod users;

pub use admin::PixCacheStats;
pub use builder::PixCacheBuilder;
pub(crate) use engine::Engine;
