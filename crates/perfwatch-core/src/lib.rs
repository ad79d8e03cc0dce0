pub mod compare;
pub mod config;
pub mod errors;
pub mod fieldchange;
pub mod migrate;
pub mod model;
pub mod provision;
pub mod schema;
pub mod storage;
