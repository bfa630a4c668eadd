//! Session-authorized gateway in front of the internal replication server.
//!
//! Clients present a session cookie on `GET /sync`. Authorized connections
//! are relayed frame for frame to the configured internal sync URL; the
//! upstream is never dialed for a connection that failed authorization.

pub mod auth;
pub mod config;
pub mod db;
pub mod handlers;
pub mod proxy;
pub mod rate_limit;
