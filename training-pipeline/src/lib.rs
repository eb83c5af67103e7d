#![allow(clippy::missing_docs_in_private_items)]

pub mod classifier;
pub mod features;
pub mod registry;
pub mod trainer;

pub use classifier::{CentroidClassifier, ModelArtifact};
pub use registry::{ModelRegistry, ProductionPointer};
pub use trainer::Trainer;
