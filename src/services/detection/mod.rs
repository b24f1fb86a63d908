// Detection Module
// Backend-independent analysis logic:
// - normalizer: maps backend outputs onto the canonical result and checks its invariants
// - orchestrator: active-mode selection, preprocess -> detect -> best-effort persist

pub mod normalizer;
pub mod orchestrator;

pub use normalizer::{check_invariants, classify_score, confidence_level, normalize_inference, InferenceOutput};
pub use orchestrator::{AnalysisError, AnalysisOrchestrator, PersistOutcome};
