//! LRU policy for resident media assets
//!
//! Bounds how many decoded audio and video assets stay resident. Evicting
//! an entry force-unloads the asset through the unloader registered for
//! its [`MediaKind`].

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::core::LruCache;
use crate::errors::LruError;

/// Which media subsystem owns a cached asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

/// Cache key: the media kind plus the caller's key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaKey {
    pub kind: MediaKind,
    pub key: String,
}

impl MediaKey {
    pub fn new(kind: MediaKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }
}

/// Releases a resident media asset
pub trait MediaUnloader: Send + Sync {
    fn force_unload(&self, asset_name: &str);
}

/// LRU of resident media assets, keyed by kind and name
pub struct MediaLruCache {
    cache: LruCache<MediaKey, String>,
}

impl MediaLruCache {
    /// # Errors
    ///
    /// Returns `LruError::InvalidCapacity` for a zero capacity
    pub fn new(
        capacity: usize,
        audio: Arc<dyn MediaUnloader>,
        video: Arc<dyn MediaUnloader>,
    ) -> Result<Self, LruError> {
        let cache = LruCache::new(capacity)?.with_removal_handler(move |key: &MediaKey, value: &String| {
            debug!("Evicting {} asset {}", key.kind, value);
            match key.kind {
                MediaKind::Audio => audio.force_unload(value),
                MediaKind::Video => video.force_unload(value),
            }
        });
        Ok(Self { cache })
    }

    pub fn capacity(&self) -> usize {
        self.cache.capacity()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn contains(&self, kind: MediaKind, key: &str) -> bool {
        self.cache.contains(&MediaKey::new(kind, key))
    }

    /// Asset name cached under `key`, refreshing it
    pub fn get(&self, kind: MediaKind, key: &str) -> Option<String> {
        self.cache.get(&MediaKey::new(kind, key))
    }

    pub fn add(&self, kind: MediaKind, key: impl Into<String>, asset_name: impl Into<String>) {
        self.cache.add(MediaKey::new(kind, key), asset_name.into());
    }

    /// Forget an entry without unloading it
    pub fn remove(&self, kind: MediaKind, key: &str) -> bool {
        self.cache.remove(&MediaKey::new(kind, key))
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Keys from most to least recently used
    pub fn get_keys(&self) -> Vec<MediaKey> {
        self.cache.get_keys()
    }
}

impl fmt::Debug for MediaLruCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaLruCache")
            .field("capacity", &self.cache.capacity())
            .field("len", &self.cache.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingUnloader {
        unloaded: Mutex<Vec<String>>,
    }

    impl MediaUnloader for RecordingUnloader {
        fn force_unload(&self, asset_name: &str) {
            self.unloaded.lock().unwrap().push(asset_name.to_string());
        }
    }

    #[test]
    fn test_eviction_dispatches_by_kind() {
        let audio = Arc::new(RecordingUnloader::default());
        let video = Arc::new(RecordingUnloader::default());
        let cache = MediaLruCache::new(2, audio.clone(), video.clone()).unwrap();

        cache.add(MediaKind::Audio, "bgm", "audio/bgm.ogg");
        cache.add(MediaKind::Video, "intro", "video/intro.mp4");
        cache.add(MediaKind::Audio, "hit", "audio/hit.ogg");
        assert_eq!(*audio.unloaded.lock().unwrap(), vec!["audio/bgm.ogg"]);
        assert!(video.unloaded.lock().unwrap().is_empty());

        cache.add(MediaKind::Audio, "step", "audio/step.ogg");
        assert_eq!(*video.unloaded.lock().unwrap(), vec!["video/intro.mp4"]);
        assert_eq!(
            cache.get_keys(),
            vec![
                MediaKey::new(MediaKind::Audio, "step"),
                MediaKey::new(MediaKind::Audio, "hit"),
            ]
        );
    }

    #[test]
    fn test_same_key_different_kinds_are_distinct() {
        let unloader = Arc::new(RecordingUnloader::default());
        let cache = MediaLruCache::new(4, unloader.clone(), unloader.clone()).unwrap();
        cache.add(MediaKind::Audio, "intro", "audio/intro.ogg");
        cache.add(MediaKind::Video, "intro", "video/intro.mp4");

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(MediaKind::Video, "intro").as_deref(), Some("video/intro.mp4"));
        assert!(cache.remove(MediaKind::Audio, "intro"));
        assert!(!cache.contains(MediaKind::Audio, "intro"));
        assert!(unloader.unloaded.lock().unwrap().is_empty());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let unloader = Arc::new(RecordingUnloader::default());
        assert!(MediaLruCache::new(0, unloader.clone(), unloader).is_err());
    }
}
