// アプリケーション層モジュール
pub mod batch_runner;
pub mod propagation_coordinator;
pub mod record_decoder;
pub mod stream_response;

// 再エクスポート
pub use batch_runner::{BatchAbort, BatchResult, BatchRunner, EntryReport, EntryResult};
pub use propagation_coordinator::{PropagationCoordinator, RecordReport, TargetOutcome};
pub use record_decoder::{DecodeError, RecordDecoder};
pub use stream_response::partial_batch_response;
