//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（Redis, ファイルシステム, ビルドツール）への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod artifact_store;
pub mod clock;
pub mod id_generator;
pub mod runner;
pub mod state_store;

pub use self::artifact_store::{ArtifactHandle, ArtifactStore};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::runner::{JobContext, JobRunner, ProgressReporter};
pub use self::state_store::StateStore;
