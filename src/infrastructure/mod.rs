//! Infrastructure layer - Storage adapters, key management and logging

pub mod api_key;
pub mod logging;
pub mod storage;
