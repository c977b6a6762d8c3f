//! 基础设施层
//!
//! 持有文件系统资源，只暴露"读讲义"和"写产物"两种能力。

pub mod artifact_store;
pub mod source_loader;

pub use artifact_store::{ArtifactName, ArtifactStore};
pub use source_loader::SourceLoader;
