// SQL文の生成
//
// ChangeRecordを方言ごとの冪等な書き込みに変換する。
// - INSERT: 既存キーなら何もしない
// - MODIFY: キーでupsert
// - REMOVE: 存在すれば削除
// 識別子は検証してからクォートし、値は必ずバインドパラメータにする。

use crate::domain::{AdapterError, ChangeRecord, Operation, ScalarValue, TableMapping};
use bigdecimal::BigDecimal;
use std::str::FromStr;

/// SQL方言
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Postgres,
}

impl Dialect {
    /// 識別子をクォート
    fn quote(&self, ident: &str) -> String {
        match self {
            Self::MySql => format!("`{}`", ident),
            Self::Postgres => format!("\"{}\"", ident),
        }
    }

    /// n番目（1始まり）のプレースホルダー
    fn placeholder(&self, n: usize) -> String {
        match self {
            Self::MySql => "?".to_string(),
            Self::Postgres => format!("${}", n),
        }
    }
}

/// バインドする値
///
/// 数値は`i64`に収まる整数以外を`BigDecimal`で渡し、DECIMAL列に誤差なく書き込む。
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Int(i64),
    Decimal(BigDecimal),
    Bool(bool),
}

impl From<&ScalarValue> for SqlValue {
    fn from(value: &ScalarValue) -> Self {
        match value {
            ScalarValue::String(s) => Self::Text(s.clone()),
            ScalarValue::Number(n) => {
                if let Ok(i) = n.parse::<i64>() {
                    Self::Int(i)
                } else if let Ok(d) = BigDecimal::from_str(n) {
                    Self::Decimal(d)
                } else {
                    Self::Text(n.clone())
                }
            }
            ScalarValue::Bool(b) => Self::Bool(*b),
        }
    }
}

/// パラメータ付きSQL文
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// SQL識別子として使えるか（英字または_で始まり、英数字と_のみ）
pub fn is_valid_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn checked(ident: &str) -> Result<&str, AdapterError> {
    if is_valid_identifier(ident) {
        Ok(ident)
    } else {
        Err(AdapterError::InvalidMapping(format!(
            "SQL識別子として使えません: {:?}",
            ident
        )))
    }
}

/// レコードに対応するSQL文を生成
///
/// # Returns
/// * `Ok(SqlStatement)` - 実行可能なSQL文とパラメータ
/// * `Err(AdapterError::InvalidMapping)` - テーブル名・列名が不正
pub fn build_statement(
    dialect: Dialect,
    mapping: &TableMapping,
    record: &ChangeRecord,
) -> Result<SqlStatement, AdapterError> {
    let table = dialect.quote(checked(mapping.table())?);
    let key = dialect.quote(checked(mapping.key_field())?);

    if record.operation() == Operation::Remove {
        return Ok(SqlStatement {
            sql: format!(
                "DELETE FROM {} WHERE {} = {}",
                table,
                key,
                dialect.placeholder(1)
            ),
            params: vec![SqlValue::Text(record.key().to_string())],
        });
    }

    let mut columns = vec![key.clone()];
    let mut values = vec![dialect.placeholder(1)];
    let mut params = vec![SqlValue::Text(record.key().to_string())];
    for (column, value) in mapping.project(record) {
        columns.push(dialect.quote(checked(column)?));
        match value {
            Some(value) => {
                params.push(SqlValue::from(value));
                values.push(dialect.placeholder(params.len()));
            }
            // 型付きパラメータにすると列の型と衝突するためリテラルで書く
            None => values.push("NULL".to_string()),
        }
    }

    let insert = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        values.join(", ")
    );

    // キー以外の列
    let value_columns = &columns[1..];
    let sql = match (dialect, record.operation()) {
        (Dialect::MySql, Operation::Modify) if !value_columns.is_empty() => {
            let updates: Vec<String> = value_columns
                .iter()
                .map(|c| format!("{} = VALUES({})", c, c))
                .collect();
            format!("{} ON DUPLICATE KEY UPDATE {}", insert, updates.join(", "))
        }
        (Dialect::MySql, _) => {
            format!("{} ON DUPLICATE KEY UPDATE {} = {}", insert, key, key)
        }
        (Dialect::Postgres, Operation::Modify) if !value_columns.is_empty() => {
            let updates: Vec<String> = value_columns
                .iter()
                .map(|c| format!("{} = EXCLUDED.{}", c, c))
                .collect();
            format!(
                "{} ON CONFLICT ({}) DO UPDATE SET {}",
                insert,
                key,
                updates.join(", ")
            )
        }
        (Dialect::Postgres, _) => format!("{} ON CONFLICT ({}) DO NOTHING", insert, key),
    };

    Ok(SqlStatement { sql, params })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FieldMap;

    fn order_after(amount: &str) -> FieldMap {
        let mut after = FieldMap::new();
        after.insert("order_id".to_string(), ScalarValue::String("123".to_string()));
        after.insert("customer_name".to_string(), ScalarValue::String("Alice".to_string()));
        after.insert("amount".to_string(), ScalarValue::Number(amount.to_string()));
        after
    }

    #[test]
    fn test_mysql_insert_or_ignore() {
        let record = ChangeRecord::insert("123", order_after("99.99"));
        let stmt = build_statement(Dialect::MySql, &TableMapping::default(), &record).unwrap();

        assert_eq!(
            stmt.sql,
            "INSERT INTO `orders` (`order_id`, `customer_name`, `amount`) VALUES (?, ?, ?) \
             ON DUPLICATE KEY UPDATE `order_id` = `order_id`"
        );
        assert_eq!(
            stmt.params,
            vec![
                SqlValue::Text("123".to_string()),
                SqlValue::Text("Alice".to_string()),
                SqlValue::Decimal(BigDecimal::from_str("99.99").unwrap()),
            ]
        );
    }

    #[test]
    fn test_mysql_upsert() {
        let record = ChangeRecord::modify("123", order_after("10"), FieldMap::new());
        let stmt = build_statement(Dialect::MySql, &TableMapping::default(), &record).unwrap();

        assert_eq!(
            stmt.sql,
            "INSERT INTO `orders` (`order_id`, `customer_name`, `amount`) VALUES (?, ?, ?) \
             ON DUPLICATE KEY UPDATE `customer_name` = VALUES(`customer_name`), \
             `amount` = VALUES(`amount`)"
        );
        assert_eq!(stmt.params[2], SqlValue::Int(10));
    }

    #[test]
    fn test_mysql_delete() {
        let record = ChangeRecord::remove("123", FieldMap::new());
        let stmt = build_statement(Dialect::MySql, &TableMapping::default(), &record).unwrap();

        assert_eq!(stmt.sql, "DELETE FROM `orders` WHERE `order_id` = ?");
        assert_eq!(stmt.params, vec![SqlValue::Text("123".to_string())]);
    }

    #[test]
    fn test_postgres_insert_or_ignore() {
        let record = ChangeRecord::insert("123", order_after("99.99"));
        let stmt = build_statement(Dialect::Postgres, &TableMapping::default(), &record).unwrap();

        assert_eq!(
            stmt.sql,
            "INSERT INTO \"orders\" (\"order_id\", \"customer_name\", \"amount\") \
             VALUES ($1, $2, $3) ON CONFLICT (\"order_id\") DO NOTHING"
        );
    }

    #[test]
    fn test_postgres_upsert() {
        let record = ChangeRecord::modify("123", order_after("10"), FieldMap::new());
        let stmt = build_statement(Dialect::Postgres, &TableMapping::default(), &record).unwrap();

        assert_eq!(
            stmt.sql,
            "INSERT INTO \"orders\" (\"order_id\", \"customer_name\", \"amount\") \
             VALUES ($1, $2, $3) ON CONFLICT (\"order_id\") DO UPDATE SET \
             \"customer_name\" = EXCLUDED.\"customer_name\", \"amount\" = EXCLUDED.\"amount\""
        );
    }

    #[test]
    fn test_postgres_delete() {
        let record = ChangeRecord::remove("123", FieldMap::new());
        let stmt = build_statement(Dialect::Postgres, &TableMapping::default(), &record).unwrap();

        assert_eq!(stmt.sql, "DELETE FROM \"orders\" WHERE \"order_id\" = $1");
    }

    #[test]
    fn test_modify_with_only_key_does_nothing_on_conflict() {
        let mut after = FieldMap::new();
        after.insert("order_id".to_string(), ScalarValue::String("1".to_string()));
        let record = ChangeRecord::modify("1", after, FieldMap::new());

        let pg = build_statement(Dialect::Postgres, &TableMapping::default(), &record).unwrap();
        assert!(pg.sql.ends_with("ON CONFLICT (\"order_id\") DO NOTHING"));

        let my = build_statement(Dialect::MySql, &TableMapping::default(), &record).unwrap();
        assert!(my.sql.ends_with("ON DUPLICATE KEY UPDATE `order_id` = `order_id`"));
    }

    #[test]
    fn test_invalid_column_is_rejected() {
        let mut after = FieldMap::new();
        after.insert("bad name; DROP".to_string(), ScalarValue::Bool(true));
        let record = ChangeRecord::insert("1", after);

        let mapping = TableMapping::new("orders", "order_id");
        let result = build_statement(Dialect::Postgres, &mapping, &record);
        assert!(matches!(result, Err(AdapterError::InvalidMapping(_))));
    }

    #[test]
    fn test_invalid_table_is_rejected() {
        let record = ChangeRecord::remove("1", FieldMap::new());
        let mapping = TableMapping::new("orders`", "order_id");
        let result = build_statement(Dialect::MySql, &mapping, &record);
        assert!(matches!(result, Err(AdapterError::InvalidMapping(_))));
    }

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("order_id"));
        assert!(is_valid_identifier("_private"));
        assert!(is_valid_identifier("Amount2"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("2amount"));
        assert!(!is_valid_identifier("customer-name"));
        assert!(!is_valid_identifier("a\"b"));
    }

    #[test]
    fn test_sql_value_from_scalar() {
        assert_eq!(SqlValue::from(&ScalarValue::Number("7".to_string())), SqlValue::Int(7));
        assert_eq!(
            SqlValue::from(&ScalarValue::Number("0.5".to_string())),
            SqlValue::Decimal(BigDecimal::from_str("0.5").unwrap())
        );
        assert_eq!(SqlValue::from(&ScalarValue::Bool(false)), SqlValue::Bool(false));
        assert_eq!(
            SqlValue::from(&ScalarValue::String("x".to_string())),
            SqlValue::Text("x".to_string())
        );
    }

    #[test]
    fn test_numbers_beyond_f64_precision_are_exact() {
        for lexical in ["12345678901234567.89", "123456789012345678901", "0.1"] {
            match SqlValue::from(&ScalarValue::Number(lexical.to_string())) {
                SqlValue::Decimal(d) => assert_eq!(d.to_string(), lexical),
                other => panic!("予期しない値: {:?}", other),
            }
        }
    }

    #[test]
    fn test_missing_allowlisted_column_is_written_as_null() {
        let mut after = FieldMap::new();
        after.insert("order_id".to_string(), ScalarValue::String("123".to_string()));
        after.insert("amount".to_string(), ScalarValue::Number("5".to_string()));
        let record = ChangeRecord::modify("123", after, FieldMap::new());

        let pg = build_statement(Dialect::Postgres, &TableMapping::default(), &record).unwrap();
        assert_eq!(
            pg.sql,
            "INSERT INTO \"orders\" (\"order_id\", \"customer_name\", \"amount\") \
             VALUES ($1, NULL, $2) ON CONFLICT (\"order_id\") DO UPDATE SET \
             \"customer_name\" = EXCLUDED.\"customer_name\", \"amount\" = EXCLUDED.\"amount\""
        );
        assert_eq!(pg.params, vec![SqlValue::Text("123".to_string()), SqlValue::Int(5)]);

        let my = build_statement(Dialect::MySql, &TableMapping::default(), &record).unwrap();
        assert!(my.sql.contains("VALUES (?, NULL, ?)"));
        assert!(my.sql.contains("`customer_name` = VALUES(`customer_name`)"));
    }
}
