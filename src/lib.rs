pub mod error;
pub mod indexer;
pub mod library;
pub mod models;
pub mod rag;
pub mod server;
pub mod settings;

pub use error::{AppError, AppResult, IndexError, InputError};
pub use settings::Settings;
