//! Request-scoped state and the stage pipeline that threads it.

pub mod pipeline;
pub mod request_context;

pub use pipeline::{Pipeline, Stage};
pub use request_context::{Correction, RequestContext, ScoredItem};
