pub mod config;
pub mod deadline;
pub mod errors;
pub mod logging;

pub use deadline::{guarded, CallOptions};
pub use errors::RagError;
