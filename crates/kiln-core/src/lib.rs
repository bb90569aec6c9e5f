//! kiln-core
//!
//! Job lifecycle tracking for long-running build jobs: accept work, run it on
//! a bounded worker group, expose progress to pollers, reclaim it after a TTL.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, record, phase, input, progress, errors）
//! - **ports**: 抽象化レイヤー（StateStore, ArtifactStore, JobRunner, Clock, IdGenerator）
//! - **impls**: 実装（in-memory / Redis の State Store、ローカル成果物）
//! - **app**: アプリケーションロジック（builder, dispatcher, worker_loop, status, reaper_loop, client）
//! - **config**: 環境変数からの設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{Orchestrator, OrchestratorBuilder, PollOutcome};
pub use config::{OrchestratorConfig, StoreConfig};
pub use domain::{JobId, JobInput, KilnError};
