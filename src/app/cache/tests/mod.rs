//! Cross-file tests for the cache module
