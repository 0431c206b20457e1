//! Incrementally mirror a server-owned hierarchical content library into a
//! local persistent cache, without ever pulling the whole tree at once.
//!
//! The pieces, leaves first: [`db`] owns the SQLite connection and schema,
//! [`cache`] is the persistent node store plus blob store and staleness
//! model, [`remote`] normalizes the remote API's payload shapes behind the
//! [`remote::TreeSource`] trait, and [`sync`] is the synchronization engine
//! (lazy expansion, recursive crawl, invalidation).

pub mod cache;
pub mod config;
pub mod db;
pub mod remote;
pub mod sync;
