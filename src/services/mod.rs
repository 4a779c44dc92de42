pub mod acquisition;
pub mod chroma;
pub mod decoder;
pub mod delegate;
pub mod extractor;
pub mod matcher;
pub mod orchestrator;
pub mod recognition;
pub mod templates;
