// RecordDecoder - DynamoDB Streamsエントリの正規化
//
// INSERT/MODIFY/REMOVEのストリームレコードを型タグ付きの値から
// プレーンなスカラー値に展開し、ChangeRecordに変換する。
// 副作用もI/Oも持たない純粋な変換。

use crate::domain::{ChangeRecord, FieldMap, Operation, ScalarValue};
use aws_lambda_events::event::dynamodb::EventRecord;
use serde::Serialize;
use serde_dynamo::{AttributeValue, Item};
use thiserror::Error;

/// デコードエラー型
///
/// # エラー種別
/// - `MissingKey`: キーがイメージからもKeysからも復元できない
/// - `UnsupportedType`: S/N/BOOL以外の型タグ
/// - `InvalidNumber`: Nタグの値が数値として解釈できない
/// - `UnknownOperation`: INSERT/MODIFY/REMOVE以外のeventName
/// - `MissingImage`: INSERT/MODIFYでNewImageが空
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DecodeError {
    /// キーが欠損しています
    #[error("キーが欠損しています: {0}")]
    MissingKey(String),

    /// 未対応の型タグ
    #[error("未対応の型タグです: field={field}, tag={tag}")]
    UnsupportedType { field: String, tag: String },

    /// 数値として不正
    #[error("数値として解釈できません: field={field}, value={value}")]
    InvalidNumber { field: String, value: String },

    /// 未知のイベントタイプ
    #[error("未知のイベントタイプです: {0}")]
    UnknownOperation(String),

    /// イメージが欠損しています
    #[error("NewImageが欠損しています: {0}")]
    MissingImage(Operation),
}

/// ストリームエントリのデコーダー
///
/// キーフィールド名だけを設定として持つ。
#[derive(Debug, Clone)]
pub struct RecordDecoder {
    key_field: String,
}

impl RecordDecoder {
    /// 新しいRecordDecoderを作成
    ///
    /// # 引数
    /// * `key_field` - エンティティの自然キーとなるフィールド名（例: "order_id"）
    pub fn new(key_field: impl Into<String>) -> Self {
        Self {
            key_field: key_field.into(),
        }
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    /// ストリームエントリをChangeRecordに変換
    ///
    /// キーの探索順:
    /// 1. INSERT/MODIFY: NewImage → Keys
    /// 2. REMOVE: Keys → OldImage
    ///
    /// # Returns
    /// * `Ok(ChangeRecord)` - 正規化済みレコード
    /// * `Err(DecodeError)` - 変換できないエントリ
    pub fn decode(&self, entry: &EventRecord) -> Result<ChangeRecord, DecodeError> {
        let operation = Operation::from_event_name(&entry.event_name)
            .ok_or_else(|| DecodeError::UnknownOperation(entry.event_name.clone()))?;
        let change = &entry.change;

        match operation {
            Operation::Insert | Operation::Modify => {
                let after = Self::unwrap_image(&change.new_image)?;
                if after.is_empty() {
                    return Err(DecodeError::MissingImage(operation));
                }

                let key = match self.key_from_image(&after) {
                    Some(key) => key,
                    None => self.key_from_keys(&change.keys)?.ok_or_else(|| {
                        DecodeError::MissingKey(format!(
                            "NewImageとKeysの両方に{}がありません",
                            self.key_field
                        ))
                    })?,
                };

                if operation == Operation::Insert {
                    Ok(ChangeRecord::insert(key, after))
                } else {
                    let before = Self::unwrap_image(&change.old_image)?;
                    Ok(ChangeRecord::modify(key, after, before))
                }
            }
            Operation::Remove => {
                let before = Self::unwrap_image(&change.old_image)?;

                let key = match self.key_from_keys(&change.keys)? {
                    Some(key) => key,
                    None => self.key_from_image(&before).ok_or_else(|| {
                        DecodeError::MissingKey(format!(
                            "KeysとOldImageの両方に{}がありません",
                            self.key_field
                        ))
                    })?,
                };

                Ok(ChangeRecord::remove(key, before))
            }
        }
    }

    /// 展開済みイメージからキーを取得
    fn key_from_image(&self, image: &FieldMap) -> Option<String> {
        image
            .get(&self.key_field)
            .and_then(ScalarValue::as_key)
            .map(str::to_string)
    }

    /// ストリームレコードのKeysからキーを取得
    fn key_from_keys(&self, keys: &Item) -> Result<Option<String>, DecodeError> {
        match keys.get(&self.key_field) {
            Some(attr) => {
                let value = Self::unwrap_value(&self.key_field, attr)?;
                Ok(value.as_key().map(str::to_string))
            }
            None => Ok(None),
        }
    }

    /// DynamoDB Itemの全フィールドを展開
    ///
    /// エラー報告を決定的にするため、フィールド名順に処理する。
    fn unwrap_image(image: &Item) -> Result<FieldMap, DecodeError> {
        let mut names: Vec<&String> = image.keys().collect();
        names.sort();

        let mut fields = FieldMap::new();
        for name in names {
            if let Some(attr) = image.get(name) {
                fields.insert(name.clone(), Self::unwrap_value(name, attr)?);
            }
        }
        Ok(fields)
    }

    /// 型タグ付きの値をスカラー値に展開
    fn unwrap_value(field: &str, attr: &AttributeValue) -> Result<ScalarValue, DecodeError> {
        match attr {
            AttributeValue::S(s) => Ok(ScalarValue::String(s.clone())),
            AttributeValue::N(n) => {
                if n.trim().parse::<f64>().is_ok_and(f64::is_finite) {
                    Ok(ScalarValue::Number(n.trim().to_string()))
                } else {
                    Err(DecodeError::InvalidNumber {
                        field: field.to_string(),
                        value: n.clone(),
                    })
                }
            }
            AttributeValue::Bool(b) => Ok(ScalarValue::Bool(*b)),
            other => Err(DecodeError::UnsupportedType {
                field: field.to_string(),
                tag: Self::tag_name(other).to_string(),
            }),
        }
    }

    /// DynamoDB JSONの型タグ名
    fn tag_name(attr: &AttributeValue) -> &'static str {
        match attr {
            AttributeValue::N(_) => "N",
            AttributeValue::S(_) => "S",
            AttributeValue::Bool(_) => "BOOL",
            AttributeValue::B(_) => "B",
            AttributeValue::Null(_) => "NULL",
            AttributeValue::M(_) => "M",
            AttributeValue::L(_) => "L",
            AttributeValue::Ss(_) => "SS",
            AttributeValue::Ns(_) => "NS",
            AttributeValue::Bs(_) => "BS",
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use aws_lambda_events::event::dynamodb::StreamRecord;
    use std::collections::HashMap;

    // ==================== ヘルパー関数 ====================

    /// テスト用のDynamoDB Itemを作成
    pub(crate) fn create_item(attrs: Vec<(&str, AttributeValue)>) -> Item {
        let mut map: HashMap<String, AttributeValue> = HashMap::new();
        for (key, value) in attrs {
            map.insert(key.to_string(), value);
        }
        Item::from(map)
    }

    /// テスト用の文字列AttributeValueを作成
    pub(crate) fn string_attr(value: &str) -> AttributeValue {
        AttributeValue::S(value.to_string())
    }

    /// テスト用の数値AttributeValueを作成
    pub(crate) fn number_attr(value: &str) -> AttributeValue {
        AttributeValue::N(value.to_string())
    }

    /// テスト用のデフォルトStreamRecordを作成
    pub(crate) fn create_default_stream_record() -> StreamRecord {
        use chrono::{TimeZone, Utc};
        StreamRecord {
            approximate_creation_date_time: Utc.timestamp_opt(0, 0).unwrap(),
            keys: Item::from(HashMap::new()),
            new_image: Item::from(HashMap::new()),
            old_image: Item::from(HashMap::new()),
            sequence_number: None,
            size_bytes: 0,
            stream_view_type: None,
        }
    }

    /// テスト用のデフォルトEventRecordを作成
    pub(crate) fn create_default_event_record() -> EventRecord {
        EventRecord {
            aws_region: String::new(),
            change: create_default_stream_record(),
            event_id: String::new(),
            event_name: String::new(),
            event_source: None,
            event_source_arn: None,
            event_version: None,
            user_identity: None,
            record_format: None,
            table_name: None,
        }
    }

    /// イメージを指定してストリームエントリを作成
    pub(crate) fn stream_entry(event_name: &str, new_image: Item, old_image: Item) -> EventRecord {
        EventRecord {
            event_name: event_name.to_string(),
            change: StreamRecord {
                new_image,
                old_image,
                ..create_default_stream_record()
            },
            ..create_default_event_record()
        }
    }

    /// 注文のINSERTエントリを作成
    pub(crate) fn insert_entry(order_id: &str, customer_name: &str, amount: &str) -> EventRecord {
        stream_entry(
            "INSERT",
            create_item(vec![
                ("order_id", string_attr(order_id)),
                ("customer_name", string_attr(customer_name)),
                ("amount", number_attr(amount)),
            ]),
            Item::from(HashMap::new()),
        )
    }

    /// 注文のMODIFYエントリを作成（金額のみ変更）
    pub(crate) fn modify_amount_entry(order_id: &str, amount: &str) -> EventRecord {
        stream_entry(
            "MODIFY",
            create_item(vec![
                ("order_id", string_attr(order_id)),
                ("amount", number_attr(amount)),
            ]),
            create_item(vec![("order_id", string_attr(order_id))]),
        )
    }

    /// 注文のREMOVEエントリを作成
    pub(crate) fn remove_entry(order_id: &str) -> EventRecord {
        stream_entry(
            "REMOVE",
            Item::from(HashMap::new()),
            create_item(vec![("order_id", string_attr(order_id))]),
        )
    }

    fn decoder() -> RecordDecoder {
        RecordDecoder::new("order_id")
    }

    // ==================== decode テスト ====================

    #[test]
    fn test_decode_insert() {
        let record = decoder()
            .decode(&insert_entry("123", "Alice", "99.99"))
            .expect("デコードに失敗");

        assert_eq!(record.operation(), Operation::Insert);
        assert_eq!(record.key(), "123");
        assert_eq!(
            record.after().get("customer_name"),
            Some(&ScalarValue::String("Alice".to_string()))
        );
        assert_eq!(
            record.after().get("amount"),
            Some(&ScalarValue::Number("99.99".to_string()))
        );
        assert!(record.before().is_empty());
    }

    #[test]
    fn test_decode_modify_keeps_before() {
        let record = decoder()
            .decode(&modify_amount_entry("123", "10"))
            .expect("デコードに失敗");

        assert_eq!(record.operation(), Operation::Modify);
        assert_eq!(record.key(), "123");
        assert_eq!(record.before().len(), 1);
        assert_eq!(
            record.after().get("amount"),
            Some(&ScalarValue::Number("10".to_string()))
        );
    }

    #[test]
    fn test_decode_remove_from_old_image() {
        let record = decoder().decode(&remove_entry("123")).expect("デコードに失敗");

        assert_eq!(record.operation(), Operation::Remove);
        assert_eq!(record.key(), "123");
        assert!(record.after().is_empty());
    }

    #[test]
    fn test_decode_remove_from_keys() {
        // OldImageが空でもKeysからキーを復元できる
        let entry = EventRecord {
            event_name: "REMOVE".to_string(),
            change: StreamRecord {
                keys: create_item(vec![("order_id", string_attr("from_keys"))]),
                ..create_default_stream_record()
            },
            ..create_default_event_record()
        };

        let record = decoder().decode(&entry).expect("デコードに失敗");
        assert_eq!(record.key(), "from_keys");
    }

    #[test]
    fn test_decode_remove_missing_key() {
        let entry = stream_entry(
            "REMOVE",
            Item::from(HashMap::new()),
            Item::from(HashMap::new()),
        );

        let result = decoder().decode(&entry);
        match result.unwrap_err() {
            DecodeError::MissingKey(msg) => {
                assert!(msg.contains("order_id"));
            }
            other => panic!("予期しないエラー型: {:?}", other),
        }
    }

    #[test]
    fn test_decode_remove_empty_string_key_is_missing() {
        let entry = stream_entry(
            "REMOVE",
            Item::from(HashMap::new()),
            create_item(vec![("order_id", string_attr(""))]),
        );

        assert!(matches!(
            decoder().decode(&entry),
            Err(DecodeError::MissingKey(_))
        ));
    }

    #[test]
    fn test_decode_insert_missing_key() {
        let entry = stream_entry(
            "INSERT",
            create_item(vec![("customer_name", string_attr("Alice"))]),
            Item::from(HashMap::new()),
        );

        assert!(matches!(
            decoder().decode(&entry),
            Err(DecodeError::MissingKey(_))
        ));
    }

    #[test]
    fn test_decode_numeric_key() {
        let entry = stream_entry(
            "INSERT",
            create_item(vec![("order_id", number_attr("42"))]),
            Item::from(HashMap::new()),
        );

        let record = decoder().decode(&entry).expect("デコードに失敗");
        assert_eq!(record.key(), "42");
    }

    #[test]
    fn test_decode_insert_without_new_image() {
        let entry = stream_entry(
            "INSERT",
            Item::from(HashMap::new()),
            Item::from(HashMap::new()),
        );

        assert_eq!(
            decoder().decode(&entry).unwrap_err(),
            DecodeError::MissingImage(Operation::Insert)
        );
    }

    #[test]
    fn test_decode_unsupported_type() {
        let entry = stream_entry(
            "INSERT",
            create_item(vec![
                ("order_id", string_attr("1")),
                ("tags", AttributeValue::Ss(vec!["a".to_string()])),
            ]),
            Item::from(HashMap::new()),
        );

        match decoder().decode(&entry).unwrap_err() {
            DecodeError::UnsupportedType { field, tag } => {
                assert_eq!(field, "tags");
                assert_eq!(tag, "SS");
            }
            other => panic!("予期しないエラー型: {:?}", other),
        }
    }

    #[test]
    fn test_decode_null_is_unsupported() {
        let entry = stream_entry(
            "MODIFY",
            create_item(vec![
                ("order_id", string_attr("1")),
                ("customer_name", AttributeValue::Null(true)),
            ]),
            Item::from(HashMap::new()),
        );

        assert!(matches!(
            decoder().decode(&entry),
            Err(DecodeError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn test_decode_invalid_number() {
        let entry = stream_entry(
            "INSERT",
            create_item(vec![
                ("order_id", string_attr("1")),
                ("amount", number_attr("12abc")),
            ]),
            Item::from(HashMap::new()),
        );

        assert_eq!(
            decoder().decode(&entry).unwrap_err(),
            DecodeError::InvalidNumber {
                field: "amount".to_string(),
                value: "12abc".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_bool() {
        let entry = stream_entry(
            "INSERT",
            create_item(vec![
                ("order_id", string_attr("1")),
                ("paid", AttributeValue::Bool(true)),
            ]),
            Item::from(HashMap::new()),
        );

        let record = decoder().decode(&entry).expect("デコードに失敗");
        assert_eq!(record.after().get("paid"), Some(&ScalarValue::Bool(true)));
    }

    #[test]
    fn test_decode_unknown_operation() {
        let entry = stream_entry(
            "TRUNCATE",
            Item::from(HashMap::new()),
            Item::from(HashMap::new()),
        );

        assert_eq!(
            decoder().decode(&entry).unwrap_err(),
            DecodeError::UnknownOperation("TRUNCATE".to_string())
        );
    }

    #[test]
    fn test_decode_is_deterministic() {
        // 同じエントリを2回デコードすると同一のChangeRecordになる
        let entries = vec![
            insert_entry("123", "Alice", "99.99"),
            modify_amount_entry("123", "10"),
            remove_entry("123"),
        ];

        for entry in &entries {
            assert_eq!(decoder().decode(entry), decoder().decode(entry));
        }
    }

    #[test]
    fn test_decode_error_is_deterministic_with_multiple_bad_fields() {
        let entry = stream_entry(
            "INSERT",
            create_item(vec![
                ("order_id", string_attr("1")),
                ("z_list", AttributeValue::L(vec![])),
                ("a_map", AttributeValue::M(HashMap::new())),
            ]),
            Item::from(HashMap::new()),
        );

        // フィールド名順で最初に見つかるエラーを報告する
        for _ in 0..5 {
            match decoder().decode(&entry).unwrap_err() {
                DecodeError::UnsupportedType { field, .. } => assert_eq!(field, "a_map"),
                other => panic!("予期しないエラー型: {:?}", other),
            }
        }
    }

    // ==================== エラー型テスト ====================

    #[test]
    fn test_error_display_missing_key() {
        let error = DecodeError::MissingKey("テスト".to_string());
        assert!(error.to_string().contains("キー"));
        assert!(error.to_string().contains("欠損"));
    }

    #[test]
    fn test_error_serialization() {
        let error = DecodeError::UnsupportedType {
            field: "tags".to_string(),
            tag: "SS".to_string(),
        };
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["kind"], "unsupported_type");
        assert_eq!(json["detail"]["tag"], "SS");
    }
}
