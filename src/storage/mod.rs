pub mod layout;
pub mod record_store;
pub mod snapshot;
pub mod journal;
