pub mod diff;
pub mod export;
pub mod ping;
pub mod schema;
pub mod selection;
pub mod sync;
pub mod transfer;
