pub mod chunker;
pub mod extractor;
pub mod loader;
pub mod walker;

pub use loader::{load_all_documents, Document, DocumentMetadata, LoadReport, SourceFile};
pub use walker::DocumentFormat;
