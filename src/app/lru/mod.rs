//! Bounded caches with eviction callbacks
//!
//! - [`core`] - Generic thread-safe LRU cache
//! - [`media`] - Audio and video residency policy on top of it

pub mod core;
pub mod media;

pub use self::core::{LruCache, RemovalHandler};
pub use media::{MediaKey, MediaKind, MediaLruCache, MediaUnloader};
