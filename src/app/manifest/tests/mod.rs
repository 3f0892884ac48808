//! Cross-module manifest tests
//!
//! Publish a package, serve it through the in-memory backend and read it
//! back through a web server file system.
