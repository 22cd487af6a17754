// ドメイン層モジュール
pub mod change_record;
pub mod propagation_outcome;
pub mod table_mapping;

// 再エクスポート
pub use change_record::{ChangeRecord, FieldMap, Operation, ScalarValue};
pub use propagation_outcome::{AdapterError, PropagationOutcome, RecordOutcome};
pub use table_mapping::TableMapping;
