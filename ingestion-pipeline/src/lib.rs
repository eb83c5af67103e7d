#![allow(clippy::missing_docs_in_private_items)]

pub mod registrar;
pub mod source;
pub mod sync;

pub use registrar::{MetadataRegistrar, RegistrationReport};
pub use source::{storage_key, source_url, SourceFetcher};
pub use sync::{MirrorSynchronizer, SyncReport};
