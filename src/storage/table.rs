//! Table schemas and the schema change language.
//!
//! ```text
//! create NAME (COLUMN, ...) [key(COLUMN, ...)]
//! destroy NAME
//! ```
use std::collections::BTreeMap;

use bincode::{Decode, Encode};

use crate::database::{DbError, DbResult};

use super::{
    query::{Token, Tokens},
    record::Record,
};

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Schema {
    pub name: String,
    pub columns: Vec<String>,
    /// Unique key columns. Empty means no uniqueness constraint.
    pub key: Vec<String>,
}

impl Schema {
    pub fn column(&self, name: &str) -> DbResult<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| DbError::UnknownColumn {
                table: self.name.clone(),
                column: name.to_string(),
            })
    }

    /// Unpacks `bytes` and checks it has one field per column.
    pub fn validate(&self, bytes: &[u8]) -> DbResult<Record> {
        let record = Record::unpack(bytes)?;
        if record.len() != self.columns.len() {
            return Err(DbError::InvalidRecord(format!(
                "{} has {} columns, record has {} fields",
                self.name,
                self.columns.len(),
                record.len()
            )));
        }
        Ok(record)
    }

    /// Key fields of `record`, or `None` for a table without a key.
    pub fn key_of(&self, record: &Record) -> Option<Vec<Vec<u8>>> {
        if self.key.is_empty() {
            return None;
        }
        Some(
            self.key
                .iter()
                .filter_map(|k| self.columns.iter().position(|c| c == k))
                .map(|i| record.get(i).unwrap_or_default().to_vec())
                .collect(),
        )
    }
}

pub(crate) fn display_key(key: &[Vec<u8>]) -> String {
    key.iter()
        .map(|f| String::from_utf8_lossy(f).into_owned())
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Clone)]
pub(crate) struct Table {
    pub schema: Schema,
    pub rows: BTreeMap<i64, Vec<u8>>,
}

impl Table {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ddl {
    Create(Schema),
    Destroy(String),
}

impl Ddl {
    pub fn parse(text: &str) -> DbResult<Ddl> {
        let mut tokens = Tokens::new(text)?;
        let ddl = match tokens.ident()?.as_str() {
            "create" => {
                let name = tokens.ident()?;
                let columns = column_list(&mut tokens)?;
                let key = if tokens.keyword("key") {
                    column_list(&mut tokens)?
                } else {
                    Vec::new()
                };
                for k in &key {
                    if !columns.contains(k) {
                        return Err(DbError::UnknownColumn {
                            table: name,
                            column: k.clone(),
                        });
                    }
                }
                Ddl::Create(Schema { name, columns, key })
            }
            "destroy" => Ddl::Destroy(tokens.ident()?),
            other => return Err(DbError::Syntax(format!("unknown request: {other}"))),
        };
        tokens.finish()?;
        Ok(ddl)
    }
}

fn column_list(tokens: &mut Tokens) -> DbResult<Vec<String>> {
    tokens.symbol('(')?;
    let mut columns: Vec<String> = Vec::new();
    loop {
        let column = tokens.ident()?;
        if columns.contains(&column) {
            return Err(DbError::Syntax(format!("duplicate column: {column}")));
        }
        columns.push(column);
        match tokens.advance() {
            Some(Token::Symbol(',')) => continue,
            Some(Token::Symbol(')')) => return Ok(columns),
            other => return Err(DbError::Syntax(format!("expected , or ) but got {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_create() {
        let ddl = Ddl::parse("create items (name, qty) key(name)").unwrap();
        assert_eq!(
            ddl,
            Ddl::Create(Schema {
                name: "items".into(),
                columns: vec!["name".into(), "qty".into()],
                key: vec!["name".into()],
            })
        );
        assert!(matches!(
            Ddl::parse("create log (text)").unwrap(),
            Ddl::Create(Schema { key, .. }) if key.is_empty()
        ));
    }

    #[test]
    fn parse_destroy() {
        assert_eq!(
            Ddl::parse("destroy items").unwrap(),
            Ddl::Destroy("items".into())
        );
    }

    #[test]
    fn syntax_errors() {
        for bad in [
            "",
            "drop items",
            "create items",
            "create items (name,",
            "create items (name, name)",
            "destroy items now",
        ] {
            assert!(
                matches!(Ddl::parse(bad), Err(DbError::Syntax(_))),
                "{bad:?} should not parse"
            );
        }
        assert!(matches!(
            Ddl::parse("create items (name) key(id)"),
            Err(DbError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn keys_and_validation() {
        let Ddl::Create(schema) = Ddl::parse("create items (name, qty) key(name)").unwrap() else {
            unreachable!()
        };
        let record = Record::from(vec!["apple", "3"]);
        assert_eq!(schema.key_of(&record), Some(vec![b"apple".to_vec()]));
        assert_eq!(schema.column("qty").unwrap(), 1);
        assert!(schema.column("price").is_err());

        assert!(schema.validate(&record.pack().unwrap()).is_ok());
        assert!(matches!(
            schema.validate(&Record::from(vec!["apple"]).pack().unwrap()),
            Err(DbError::InvalidRecord(_))
        ));
    }
}
