pub mod loader;
pub mod reconciler;
pub mod schema;

pub use loader::{load_from_path, validate};
pub use schema::{Config, ServerEntry, TransportKind};
