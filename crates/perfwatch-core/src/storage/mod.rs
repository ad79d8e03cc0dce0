pub mod ddl;
pub mod metadata;
pub mod store;

pub use ddl::{DdlCompiler, Dialect};
pub use store::Store;
