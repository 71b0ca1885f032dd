pub mod caller_lock;
pub mod extraction;
pub mod payloads;
pub mod profile_cache;
pub mod recovery;
pub mod scheduler;
pub mod search;
