//! skinscan-ai: lesion analysis orchestration
//!
//! Runs a learned classifier and a rule-based feature analyzer over a lesion
//! photo, recovers from failures with bounded retries and fuses both outputs
//! into one verdict.

pub mod analyzers;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod fusion;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod recovery;
pub mod worker_pool;

pub use crate::analyzers::{FeatureAnalyzer, LesionClassifier};
pub use crate::config::{AnalysisConfig, AnalysisConfigBuilder, ConfigPreset, RecoveryPolicy};
pub use crate::device::{DeviceProfile, DeviceProfiler, PerformanceTier};
pub use crate::error::{AnalysisError, AnalysisResult, AnalyzerFailure, RecoveryStrategy};
pub use crate::events::{AnalysisEvent, AnalysisListener, ChannelListener, NoopListener};
pub use crate::models::{AnalysisRequest, CombinedResult, LesionImage};
pub use crate::orchestrator::{Orchestrator, OrchestratorBuilder};
