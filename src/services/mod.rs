// FakeDetector Core Services
// Image preprocessing, detection backends, orchestration and history persistence

pub mod config_store;
pub mod detection;
pub mod image_preprocessor;
pub mod providers;
pub mod result_store;

#[cfg(test)]
pub(crate) mod test_support;

pub use config_store::*;
pub use image_preprocessor::{ImagePreprocessor, PreprocessError};
pub use providers::{
    BackendError, CallOptions, CommercialApiClient, DetectionBackend, RemoteInferenceClient,
};
pub use result_store::{PersistenceError, ResultSink, ResultStore};

pub use detection::{AnalysisError, AnalysisOrchestrator, PersistOutcome};
