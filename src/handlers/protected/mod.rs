// handlers/protected/mod.rs - Protected handlers (JWT authentication required)
//
// The JWT middleware inserts the request's `Caller`; handlers hand it to the
// access resolver before any query runs and filter every returned record.

pub mod access;
pub mod auth;
pub mod data;
pub mod find;
