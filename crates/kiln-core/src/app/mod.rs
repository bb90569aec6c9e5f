//! App - アプリケーション層
//!
//! ports を組み合わせてジョブのライフサイクルを実装する。
//!
//! # 主要コンポーネント
//! - **OrchestratorBuilder**: 構築とワイヤリング（fail-fast）
//! - **Orchestrator**: 外部に見せる操作の窓口
//! - **Dispatcher**: 受付（検証、バックプレッシャー、初期レコード）
//! - **WorkerLoop**: ジョブ実行（タイムアウト、終端の記録）
//! - **StatusPoller**: 読み取り専用のステータス照会
//! - **PollingClient**: ポーリングする側の推奨挙動
//! - **ReaperLoop**: TTL 切れの回収

pub mod builder;
pub mod client;
pub mod dispatcher;
pub mod orchestrator;
pub mod reaper_loop;
pub mod retry;
pub mod status;
pub mod worker_loop;

pub use self::builder::{BuildError, OrchestratorBuilder};
pub use self::client::{
    CachedId, ClientError, ClientSettings, IdCache, NoCache, PollReport, PollingClient,
    StatusSource,
};
pub use self::dispatcher::Dispatcher;
pub use self::orchestrator::Orchestrator;
pub use self::reaper_loop::{Reaper, ReaperLoop, Reclaimed, SweepReport};
pub use self::retry::RetryPolicy;
pub use self::status::{HealthReport, PollOutcome, QueueCounts, StatusPoller};
pub use self::worker_loop::SHUTDOWN_MESSAGE;
