//! Persistence API for rendered pages.
//!
//! Pages are stored under `secret ++ hash`: a metadata record (URL and
//! expiration) and the compressed content blob, kept apart so expiration
//! lookups never touch the content.

pub mod backend;
pub mod error;
pub mod routes;

pub use backend::{Backend, BackendError, FsBackend, MemoryBackend, PageMeta};
pub use error::ApiError;
pub use routes::router;
