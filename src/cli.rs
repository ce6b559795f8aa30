//! CLI utilities for Rime.
//!
//! Turns lines typed at an interactive prompt into protocol requests. A line is a
//! command name (case-insensitive) followed by its arguments separated by spaces:
//!
//! ```text
//! > transaction update
//! > query 0 items where name = "apple"
//! > get next q0
//! > output c1 2 pear 3
//! > get1 one - items
//! ```
//!
//! Queries are referenced as `qN`, cursors as `cN`. Where a transaction is
//! optional, `-` stands for none. Record arguments are whitespace separated
//! fields.
use std::io::{BufRead, Write};

use crate::{
    database::Dir,
    protocol::{
        Command, Request,
        request::{Get1Dir, QueryRef},
    },
    storage::record::Record,
};

/// Possible inputs from a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Line {
    /// Exit command `.exit`, or end of input
    Exit,
    /// `.login USER PASSWORD`, challenge-response authentication
    Login { user: String, password: String },
    /// A protocol request
    Request(Request),
}

/// Prompt user for a valid Rime command.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Line, String>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ").map_err(|e| format!("failed to write prompt: {e}"))?;

    let read = reader
        .read_line(&mut s)
        .map_err(|e| format!("failed to read input: {e}"))?;
    if read == 0 {
        return Ok(Line::Exit);
    }
    parse_line(&s)
}

pub fn parse_line(line: &str) -> Result<Line, String> {
    let line = line.trim();
    let (word, rest) = split_word(line);

    match word {
        ".exit" => return Ok(Line::Exit),
        ".login" => {
            let (user, password) = split_word(rest);
            if user.is_empty() {
                return Err("usage: .login USER PASSWORD".to_string());
            }
            return Ok(Line::Login {
                user: user.to_string(),
                password: password.to_string(),
            });
        }
        w if w.starts_with('.') => return Err(format!("unrecognized command '{w}'")),
        _ => {}
    }

    let command = Command::ALL
        .into_iter()
        .find(|c| c.name().eq_ignore_ascii_case(word))
        .ok_or_else(|| format!("unrecognized command '{word}'"))?;
    let mut args = Args { command, rest };

    let request = match command {
        Command::Abort => Request::Abort { tn: args.tn()? },
        Command::Admin => Request::Admin {
            request: args.text(),
        },
        Command::Auth => Request::Auth {
            data: hex(&args.text())?,
        },
        Command::Check => Request::Check,
        Command::Close => Request::Close {
            query: args.query_ref()?,
        },
        Command::Commit => Request::Commit { tn: args.tn()? },
        Command::Connections => Request::Connections,
        Command::Cursor => Request::Cursor { query: args.text() },
        Command::Cursors => Request::Cursors,
        Command::Dump => Request::Dump { table: args.text() },
        Command::Erase => Request::Erase {
            tn: args.tn()?,
            address: args.int()?,
        },
        Command::Explain => Request::Explain {
            query: args.query_ref()?,
        },
        Command::Get => Request::Get {
            dir: args.dir()?,
            query: args.query_ref()?,
            tn: args.optional_tn()?,
        },
        Command::Get1 => Request::Get1 {
            dir: args.get1_dir()?,
            tn: args.optional_tn()?,
            query: args.text(),
        },
        Command::Header => Request::Header {
            query: args.query_ref()?,
        },
        Command::Keys => Request::Keys {
            query: args.query_ref()?,
        },
        Command::Kill => Request::Kill {
            session_id: args.text(),
        },
        Command::LibGet => Request::LibGet { name: args.text() },
        Command::Libraries => Request::Libraries,
        Command::Load => Request::Load { table: args.text() },
        Command::Log => Request::Log { text: args.text() },
        Command::Nonce => Request::Nonce,
        Command::Order => Request::Order {
            query: args.query_ref()?,
        },
        Command::Output => Request::Output {
            query: args.query_ref()?,
            tn: args.optional_tn()?,
            record: args.record()?,
        },
        Command::Query => Request::Query {
            tn: args.tn()?,
            query: args.text(),
        },
        Command::ReadCount => Request::ReadCount { tn: args.tn()? },
        Command::Request => Request::Request {
            tn: args.tn()?,
            action: args.text(),
        },
        Command::Rewind => Request::Rewind {
            query: args.query_ref()?,
        },
        Command::SessionId => Request::SessionId {
            session_id: args.text(),
        },
        Command::Size => Request::Size,
        Command::Timestamp => Request::Timestamp,
        Command::Token => Request::Token,
        Command::Transaction => Request::Transaction {
            update: match args.word() {
                "" | "read" => false,
                "update" => true,
                other => {
                    let message = format!("expected 'read' or 'update', got '{other}'");
                    return Err(args.error(message));
                }
            },
        },
        Command::Transactions => Request::Transactions,
        Command::Unuse => Request::Unuse {
            library: args.text(),
        },
        Command::Update => Request::Update {
            tn: args.tn()?,
            address: args.int()?,
            record: args.record()?,
        },
        Command::Use => Request::Use {
            library: args.text(),
        },
        Command::WriteCount => Request::WriteCount { tn: args.tn()? },
    };
    Ok(Line::Request(request))
}

fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (s, ""),
    }
}

/// Remaining arguments of one command line.
struct Args<'a> {
    command: Command,
    rest: &'a str,
}

impl<'a> Args<'a> {
    fn error(&self, message: String) -> String {
        format!("{}: {message}", self.command.name().to_lowercase())
    }

    fn word(&mut self) -> &'a str {
        let (word, rest) = split_word(self.rest);
        self.rest = rest;
        word
    }

    fn text(&mut self) -> String {
        std::mem::take(&mut self.rest).trim().to_string()
    }

    fn int(&mut self) -> Result<i64, String> {
        let word = self.word();
        word.parse()
            .map_err(|_| self.error(format!("expected a number, got '{word}'")))
    }

    fn tn(&mut self) -> Result<i32, String> {
        let word = self.word();
        word.parse()
            .map_err(|_| self.error(format!("expected a transaction number, got '{word}'")))
    }

    /// A transaction number, or `-`/nothing for none.
    fn optional_tn(&mut self) -> Result<Option<i32>, String> {
        let (word, rest) = split_word(self.rest);
        if word.is_empty() || word == "-" {
            self.rest = rest;
            return Ok(None);
        }
        self.tn().map(Some)
    }

    fn query_ref(&mut self) -> Result<QueryRef, String> {
        let word = self.word();
        let parsed = match word.split_at_checked(1) {
            Some(("q", n)) => n.parse().ok().map(QueryRef::Query),
            Some(("c", n)) => n.parse().ok().map(QueryRef::Cursor),
            _ => None,
        };
        parsed.ok_or_else(|| self.error(format!("expected qN or cN, got '{word}'")))
    }

    fn dir(&mut self) -> Result<Dir, String> {
        match self.word() {
            "next" => Ok(Dir::Next),
            "prev" => Ok(Dir::Prev),
            other => Err(self.error(format!("expected 'next' or 'prev', got '{other}'"))),
        }
    }

    fn get1_dir(&mut self) -> Result<Get1Dir, String> {
        match self.word() {
            "first" => Ok(Get1Dir::First),
            "last" => Ok(Get1Dir::Last),
            "one" => Ok(Get1Dir::One),
            other => Err(self.error(format!(
                "expected 'first', 'last' or 'one', got '{other}'"
            ))),
        }
    }

    fn record(&mut self) -> Result<Vec<u8>, String> {
        let text = self.text();
        Record::from(text.split_whitespace().collect::<Vec<_>>())
            .pack()
            .map_err(|e| self.error(e.to_string()))
    }
}

fn hex(s: &str) -> Result<Vec<u8>, String> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return Err(format!("invalid hex '{s}'"));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| format!("invalid hex '{s}'"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(line: &str) -> Request {
        match parse_line(line).unwrap() {
            Line::Request(request) => request,
            other => panic!("not a request: {other:?}"),
        }
    }

    #[test]
    fn prompt_prints_correctly() {
        let input = b".exit\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();

        let output = String::from_utf8(output).expect("not valid UTF-8");
        assert_eq!("> ", output);
    }

    #[test]
    fn prompt_exits_at_end_of_input() {
        let mut output = Vec::new();
        assert_eq!(prompt(&b""[..], &mut output).unwrap(), Line::Exit);
    }

    #[test]
    fn login() {
        assert_eq!(
            parse_line(".login admin se cret\n").unwrap(),
            Line::Login {
                user: "admin".into(),
                password: "se cret".into()
            }
        );
    }

    #[test]
    fn requests() {
        assert_eq!(
            request("TRANSACTION update"),
            Request::Transaction { update: true }
        );
        assert_eq!(request("transaction"), Request::Transaction { update: false });
        assert_eq!(
            request("query 3 items where name = \"a b\""),
            Request::Query {
                tn: 3,
                query: "items where name = \"a b\"".into()
            }
        );
        assert_eq!(
            request("get prev c2 4"),
            Request::Get {
                dir: Dir::Prev,
                query: QueryRef::Cursor(2),
                tn: Some(4)
            }
        );
        assert_eq!(
            request("get next q0"),
            Request::Get {
                dir: Dir::Next,
                query: QueryRef::Query(0),
                tn: None
            }
        );
        assert_eq!(
            request("get1 one - items"),
            Request::Get1 {
                dir: Get1Dir::One,
                tn: None,
                query: "items".into()
            }
        );
        assert_eq!(
            request("output q1 - pear 3"),
            Request::Output {
                query: QueryRef::Query(1),
                tn: None,
                record: Record::from(vec!["pear", "3"]).pack().unwrap()
            }
        );
        assert_eq!(request("auth 00ff"), Request::Auth { data: vec![0, 255] });
        assert_eq!(
            request("sessionid"),
            Request::SessionId {
                session_id: String::new()
            }
        );
    }

    #[test]
    fn bad_arguments() {
        assert!(parse_line("commit x").is_err());
        assert!(parse_line("close 3").is_err());
        assert!(parse_line("get sideways q0").is_err());
        assert!(parse_line("auth abc").is_err());
        assert!(parse_line("transaction maybe").is_err());
    }

    #[test]
    #[should_panic(expected = "unrecognized command '.something_wrong'")]
    fn prompt_unrecognized_command() {
        let input = b".something_wrong\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();
    }

    #[test]
    #[should_panic(expected = "unrecognized command 'frobnicate'")]
    fn unknown_request() {
        parse_line("frobnicate 1").unwrap();
    }
}
