//! Query language of the in-memory engine.
//!
//! ```text
//! TABLE [where COLUMN = VALUE] [sort COLUMN]
//! ```
//!
//! `VALUE` is a double-quoted string or a bare word. Rows come back in address
//! order unless a sort column is given, in which case ties are broken by address.
use crate::database::{DbError, DbResult, Dir, Query, Row, Transaction};

use super::{record::Record, table::Schema};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(String),
    Str(String),
    Symbol(char),
}

/// Cursor over the tokens of one request.
pub struct Tokens {
    tokens: Vec<Token>,
    pos: usize,
}

impl Tokens {
    pub fn new(text: &str) -> DbResult<Self> {
        let mut tokens = Vec::new();
        let mut chars = text.chars().peekable();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                chars.next();
            } else if c.is_ascii_alphanumeric() || c == '_' {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if !(c.is_ascii_alphanumeric() || c == '_') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            } else if c == '"' {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c) => s.push(c),
                            None => return Err(DbError::Syntax("unterminated string".into())),
                        },
                        Some(c) => s.push(c),
                        None => return Err(DbError::Syntax("unterminated string".into())),
                    }
                }
                tokens.push(Token::Str(s));
            } else if "(),=".contains(c) {
                chars.next();
                tokens.push(Token::Symbol(c));
            } else {
                return Err(DbError::Syntax(format!("unexpected character {c:?}")));
            }
        }
        Ok(Self { tokens, pos: 0 })
    }

    pub fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    pub fn ident(&mut self) -> DbResult<String> {
        match self.advance() {
            Some(Token::Word(word)) => Ok(word),
            other => Err(DbError::Syntax(format!("expected a name but got {other:?}"))),
        }
    }

    pub fn symbol(&mut self, symbol: char) -> DbResult<()> {
        match self.advance() {
            Some(Token::Symbol(c)) if c == symbol => Ok(()),
            other => Err(DbError::Syntax(format!(
                "expected {symbol} but got {other:?}"
            ))),
        }
    }

    /// Consumes `keyword` if it is the next token.
    pub fn keyword(&mut self, keyword: &str) -> bool {
        match self.tokens.get(self.pos) {
            Some(Token::Word(word)) if word == keyword => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    pub fn finish(&self) -> DbResult<()> {
        match self.tokens.get(self.pos) {
            None => Ok(()),
            Some(token) => Err(DbError::Syntax(format!("unexpected {token:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    pub table: String,
    pub filter: Option<(String, String)>,
    pub sort: Option<String>,
}

impl QuerySpec {
    pub fn parse(text: &str) -> DbResult<QuerySpec> {
        let mut tokens = Tokens::new(text)?;
        let spec = Self::parse_tokens(&mut tokens)?;
        tokens.finish()?;
        Ok(spec)
    }

    pub fn parse_tokens(tokens: &mut Tokens) -> DbResult<QuerySpec> {
        let table = tokens.ident()?;
        let filter = if tokens.keyword("where") {
            let column = tokens.ident()?;
            tokens.symbol('=')?;
            let value = match tokens.advance() {
                Some(Token::Str(s) | Token::Word(s)) => s,
                other => {
                    return Err(DbError::Syntax(format!(
                        "expected a value but got {other:?}"
                    )));
                }
            };
            Some((column, value))
        } else {
            None
        };
        let sort = if tokens.keyword("sort") {
            Some(tokens.ident()?)
        } else {
            None
        };
        Ok(QuerySpec {
            table,
            filter,
            sort,
        })
    }
}

/// Position of a row in query order.
type SortKey = (Vec<u8>, i64);

pub struct MemoryQuery {
    spec: QuerySpec,
    schema: Schema,
    filter: Option<(usize, Vec<u8>)>,
    sort: Option<usize>,
    position: Option<SortKey>,
}

impl MemoryQuery {
    pub fn compile(spec: QuerySpec, schema: Schema) -> DbResult<Self> {
        let filter = match &spec.filter {
            Some((column, value)) => Some((schema.column(column)?, value.as_bytes().to_vec())),
            None => None,
        };
        let sort = spec.sort.as_deref().map(|c| schema.column(c)).transpose()?;
        Ok(Self {
            spec,
            schema,
            filter,
            sort,
            position: None,
        })
    }

    pub fn table(&self) -> &str {
        &self.spec.table
    }

    /// Every matching row visible to `tran`, in query order.
    pub fn matching(&self, tran: &mut dyn Transaction) -> DbResult<Vec<(SortKey, Row)>> {
        let mut rows = Vec::new();
        for row in tran.visible_rows(&self.spec.table)? {
            let record = Record::unpack(&row.record)?;
            if let Some((column, value)) = &self.filter {
                if record.get(*column) != Some(value.as_slice()) {
                    continue;
                }
            }
            let sort = self
                .sort
                .and_then(|column| record.get(column))
                .unwrap_or_default()
                .to_vec();
            rows.push(((sort, row.address), row));
        }
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rows)
    }
}

impl Query for MemoryQuery {
    fn header(&self) -> Vec<String> {
        self.schema.columns.clone()
    }

    fn keys(&self) -> Vec<Vec<String>> {
        if self.schema.key.is_empty() {
            Vec::new()
        } else {
            vec![self.schema.key.clone()]
        }
    }

    fn ordering(&self) -> Vec<String> {
        self.spec.sort.iter().cloned().collect()
    }

    fn rewind(&mut self) {
        self.position = None;
    }

    fn get(&mut self, tran: &mut dyn Transaction, dir: Dir) -> DbResult<Option<Row>> {
        let rows = self.matching(tran)?;
        let found = match (dir, &self.position) {
            (Dir::Next, None) => rows.into_iter().next(),
            (Dir::Next, Some(pos)) => rows.into_iter().find(|(key, _)| key > pos),
            (Dir::Prev, None) => rows.into_iter().next_back(),
            (Dir::Prev, Some(pos)) => rows.into_iter().rev().find(|(key, _)| key < pos),
        };
        Ok(match found {
            Some((key, row)) => {
                self.position = Some(key);
                Some(row)
            }
            None => {
                self.position = None;
                None
            }
        })
    }

    fn output(&mut self, tran: &mut dyn Transaction, record: &[u8]) -> DbResult<()> {
        tran.output(&self.spec.table, record)?;
        Ok(())
    }

    fn explain(&self) -> String {
        let mut plan = format!("{} scan", self.spec.table);
        if let Some((column, value)) = &self.spec.filter {
            plan.push_str(&format!(" where {column} = {value:?}"));
        }
        if let Some(column) = &self.spec.sort {
            plan.push_str(&format!(" sort {column}"));
        }
        plan
    }

    fn close(&mut self) {
        self.position = None;
    }
}

#[cfg(test)]
mod tests {
    use crate::{database::Database, storage::MemoryDatabase};

    use super::*;

    fn database() -> MemoryDatabase {
        let db = MemoryDatabase::default();
        db.admin("create fruit (name, color) key(name)").unwrap();
        let mut tran = db.transaction(true).unwrap();
        for (name, color) in [("plum", "purple"), ("apple", "red"), ("cherry", "red")] {
            tran.output("fruit", &Record::from(vec![name, color]).pack().unwrap())
                .unwrap();
        }
        assert_eq!(tran.complete().unwrap(), None);
        db
    }

    fn names(query: &mut dyn Query, tran: &mut dyn Transaction, dir: Dir) -> Vec<String> {
        let mut names = Vec::new();
        while let Some(row) = query.get(tran, dir).unwrap() {
            let record = Record::unpack(&row.record).unwrap();
            names.push(String::from_utf8(record.get(0).unwrap().to_vec()).unwrap());
        }
        names
    }

    #[test]
    fn tokens() {
        let mut tokens = Tokens::new(r#"fruit where name = "a \"b\"" sort"#).unwrap();
        assert_eq!(tokens.ident().unwrap(), "fruit");
        assert!(tokens.keyword("where"));
        assert_eq!(tokens.advance(), Some(Token::Word("name".into())));
        tokens.symbol('=').unwrap();
        assert_eq!(tokens.advance(), Some(Token::Str("a \"b\"".into())));
        assert!(!tokens.keyword("where"));
        assert!(tokens.finish().is_err());

        assert!(Tokens::new("fruit where name = \"open").is_err());
        assert!(Tokens::new("fruit; destroy fruit").is_err());
    }

    #[test]
    fn parse_spec() {
        assert_eq!(
            QuerySpec::parse("fruit where color = red sort name").unwrap(),
            QuerySpec {
                table: "fruit".into(),
                filter: Some(("color".into(), "red".into())),
                sort: Some("name".into()),
            }
        );
        assert!(QuerySpec::parse("fruit where color").is_err());
        assert!(QuerySpec::parse("fruit sort").is_err());
    }

    #[test]
    fn iterates_both_directions() {
        let db = database();
        let mut tran = db.transaction(false).unwrap();
        let mut query = tran.query("fruit").unwrap();

        assert_eq!(
            names(query.as_mut(), tran.as_mut(), Dir::Next),
            vec!["plum", "apple", "cherry"]
        );
        assert_eq!(
            names(query.as_mut(), tran.as_mut(), Dir::Prev),
            vec!["cherry", "apple", "plum"]
        );
    }

    #[test]
    fn changing_direction_mid_scan() {
        let db = database();
        let mut tran = db.transaction(false).unwrap();
        let mut query = tran.query("fruit sort name").unwrap();

        let mut step = |dir| {
            query
                .get(tran.as_mut(), dir)
                .unwrap()
                .map(|row| Record::unpack(&row.record).unwrap())
        };
        assert_eq!(step(Dir::Next), Some(Record::from(vec!["apple", "red"])));
        assert_eq!(step(Dir::Next), Some(Record::from(vec!["cherry", "red"])));
        assert_eq!(step(Dir::Prev), Some(Record::from(vec!["apple", "red"])));
        assert_eq!(step(Dir::Prev), None);
        assert_eq!(step(Dir::Prev), Some(Record::from(vec!["plum", "purple"])));
    }

    #[test]
    fn filter_and_introspection() {
        let db = database();
        let mut tran = db.transaction(false).unwrap();
        let mut query = tran.query("fruit where color = \"red\" sort name").unwrap();

        assert_eq!(
            names(query.as_mut(), tran.as_mut(), Dir::Next),
            vec!["apple", "cherry"]
        );
        assert_eq!(query.header(), vec!["name", "color"]);
        assert_eq!(query.keys(), vec![vec!["name".to_string()]]);
        assert_eq!(query.ordering(), vec!["name"]);
        assert_eq!(query.explain(), "fruit scan where color = \"red\" sort name");
    }

    #[test]
    fn unknown_names() {
        let db = database();
        let mut tran = db.transaction(false).unwrap();

        assert!(matches!(
            tran.query("vegetables"),
            Err(DbError::UnknownTable(_))
        ));
        assert!(matches!(
            tran.query("fruit where size = \"big\""),
            Err(DbError::UnknownColumn { .. })
        ));
    }
}
