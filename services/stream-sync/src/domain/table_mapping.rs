/// 同期先テーブルのマッピング
///
/// 変更レコードのどのフィールドをどの列に書き込むかを定義する。
/// MySQL/PostgreSQL/インメモリの全ターゲットで共通に使用する。
use super::change_record::{ChangeRecord, Operation, ScalarValue};

/// デフォルトのテーブル名
pub const DEFAULT_TABLE: &str = "orders";

/// デフォルトのキーフィールド名
pub const DEFAULT_KEY_FIELD: &str = "order_id";

/// デフォルトの書き込み列
pub const DEFAULT_COLUMNS: [&str; 2] = ["customer_name", "amount"];

/// テーブルマッピング
///
/// # フィールド
/// - `table`: 同期先テーブル名
/// - `key_field`: キー列名（ストリーム側のフィールド名と同じ）
/// - `columns`: 書き込む列の許可リスト。`None`の場合はイメージの全フィールド
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMapping {
    table: String,
    key_field: String,
    columns: Option<Vec<String>>,
}

impl TableMapping {
    /// 全フィールドを書き込むマッピングを作成
    pub fn new(table: impl Into<String>, key_field: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key_field: key_field.into(),
            columns: None,
        }
    }

    /// 書き込む列を限定する
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    /// 変更後の値から書き込む列と値を抽出する（キー列は含まない）
    ///
    /// 許可リストがある場合はその順序、ない場合はフィールド名順。
    /// 許可リストの列が`after`にない場合は`None`（NULLを書き込む）。
    /// REMOVEは`after`が空のため何も返さない。
    pub fn project<'a>(
        &'a self,
        record: &'a ChangeRecord,
    ) -> Vec<(&'a str, Option<&'a ScalarValue>)> {
        if record.operation() == Operation::Remove {
            return Vec::new();
        }

        let after = record.after();
        match &self.columns {
            Some(columns) => columns
                .iter()
                .filter(|column| column.as_str() != self.key_field)
                .map(|column| (column.as_str(), after.get(column.as_str())))
                .collect(),
            None => after
                .iter()
                .filter(|(name, _)| name.as_str() != self.key_field)
                .map(|(name, value)| (name.as_str(), Some(value)))
                .collect(),
        }
    }
}

impl Default for TableMapping {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE, DEFAULT_KEY_FIELD).with_columns(DEFAULT_COLUMNS)
    }
}
