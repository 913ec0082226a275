//! Hashing, caching and computing plug values.

pub mod cache;
pub mod compute;
pub mod context;
pub mod hash;
pub mod value;
