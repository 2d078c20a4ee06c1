pub mod cache;
pub mod config;
pub mod dataset;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod lookup;
pub mod render;
pub mod session;

pub use error::{KeyParseError, LoadError, SchemaError};
pub use loader::{LoadOutcome, Loader};
pub use lookup::{parse_key, IndexedDataset, LookupOutcome};
pub use session::{Answer, Session};
