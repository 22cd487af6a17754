/// 変更レコード
///
/// DynamoDB Streamsの1エントリを正規化した値。
/// デコード時に一度だけ作成され、バッチ処理が終わると破棄される。
use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};

/// 変更操作の種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    /// 新規作成
    Insert,
    /// 更新
    Modify,
    /// 削除
    Remove,
}

impl Operation {
    /// ストリームのeventNameから操作種別を判定
    ///
    /// # 戻り値
    /// * `Some(Operation)` - INSERT/MODIFY/REMOVEのいずれか
    /// * `None` - 未知のeventName
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "INSERT" => Some(Self::Insert),
            "MODIFY" => Some(Self::Modify),
            "REMOVE" => Some(Self::Remove),
            _ => None,
        }
    }

    /// eventName表記を取得
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Modify => "MODIFY",
            Self::Remove => "REMOVE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 型タグを外したスカラー値
///
/// 数値は精度を落とさないよう、ストリーム上の字句表現のまま保持する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarValue {
    /// 文字列（S）
    String(String),
    /// 数値（N）
    Number(String),
    /// 真偽値（BOOL）
    Bool(bool),
}

impl ScalarValue {
    /// キーとして使える文字列表現を取得
    ///
    /// 真偽値や空文字列はキーにならないため`None`を返す。
    pub fn as_key(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Number(s) if !s.is_empty() => Some(s.as_str()),
            _ => None,
        }
    }
}

impl Serialize for ScalarValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::String(s) => serializer.serialize_str(s),
            Self::Number(n) => {
                if let Ok(i) = n.parse::<i64>() {
                    serializer.serialize_i64(i)
                } else if let Ok(f) = n.parse::<f64>() {
                    serializer.serialize_f64(f)
                } else {
                    serializer.serialize_str(n)
                }
            }
            Self::Bool(b) => serializer.serialize_bool(*b),
        }
    }
}

/// フィールド名からスカラー値へのマップ（列順を決定的にするためBTreeMap）
pub type FieldMap = BTreeMap<String, ScalarValue>;

/// 正規化済みの変更レコード
///
/// # 不変条件
/// - `key`は空でない
/// - INSERT/MODIFYは`after`が空でない、REMOVEは`after`が空
/// - INSERTは`before`が空
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeRecord {
    operation: Operation,
    key: String,
    after: FieldMap,
    before: FieldMap,
}

impl ChangeRecord {
    /// INSERTレコードを作成
    pub fn insert(key: impl Into<String>, after: FieldMap) -> Self {
        Self {
            operation: Operation::Insert,
            key: key.into(),
            after,
            before: FieldMap::new(),
        }
    }

    /// MODIFYレコードを作成
    pub fn modify(key: impl Into<String>, after: FieldMap, before: FieldMap) -> Self {
        Self {
            operation: Operation::Modify,
            key: key.into(),
            after,
            before,
        }
    }

    /// REMOVEレコードを作成
    pub fn remove(key: impl Into<String>, before: FieldMap) -> Self {
        Self {
            operation: Operation::Remove,
            key: key.into(),
            after: FieldMap::new(),
            before,
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// 変更後の値（REMOVEでは空）
    pub fn after(&self) -> &FieldMap {
        &self.after
    }

    /// 変更前の値（INSERTでは空）
    pub fn before(&self) -> &FieldMap {
        &self.before
    }
}
