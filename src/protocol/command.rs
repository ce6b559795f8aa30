//! Command identifiers shared by client and server.
//!
//! A request starts with one byte naming the command. The byte values are assigned by
//! [`Command::to_byte`] and that mapping, not the order the variants are declared in,
//! is the wire contract. Changing an existing assignment is a breaking change and must
//! come with a bump of [`PROTOCOL_VERSION`].
use std::fmt;

/// Version of the command table, announced in the connection banner.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Abort,
    Admin,
    Auth,
    Check,
    Close,
    Commit,
    Connections,
    Cursor,
    Cursors,
    Dump,
    Erase,
    Explain,
    Get,
    Get1,
    Header,
    Keys,
    Kill,
    LibGet,
    Libraries,
    Load,
    Log,
    Nonce,
    Order,
    Output,
    Query,
    ReadCount,
    Request,
    Rewind,
    SessionId,
    Size,
    Timestamp,
    Token,
    Transaction,
    Transactions,
    Unuse,
    Update,
    Use,
    WriteCount,
}

impl Command {
    pub const ALL: [Command; 38] = [
        Command::Abort,
        Command::Admin,
        Command::Auth,
        Command::Check,
        Command::Close,
        Command::Commit,
        Command::Connections,
        Command::Cursor,
        Command::Cursors,
        Command::Dump,
        Command::Erase,
        Command::Explain,
        Command::Get,
        Command::Get1,
        Command::Header,
        Command::Keys,
        Command::Kill,
        Command::LibGet,
        Command::Libraries,
        Command::Load,
        Command::Log,
        Command::Nonce,
        Command::Order,
        Command::Output,
        Command::Query,
        Command::ReadCount,
        Command::Request,
        Command::Rewind,
        Command::SessionId,
        Command::Size,
        Command::Timestamp,
        Command::Token,
        Command::Transaction,
        Command::Transactions,
        Command::Unuse,
        Command::Update,
        Command::Use,
        Command::WriteCount,
    ];

    /// Wire identifier of the command.
    pub fn to_byte(self) -> u8 {
        match self {
            Command::Abort => 0,
            Command::Admin => 1,
            Command::Auth => 2,
            Command::Check => 3,
            Command::Close => 4,
            Command::Commit => 5,
            Command::Connections => 6,
            Command::Cursor => 7,
            Command::Cursors => 8,
            Command::Dump => 9,
            Command::Erase => 10,
            Command::Explain => 11,
            Command::Get => 12,
            Command::Get1 => 13,
            Command::Header => 14,
            Command::Keys => 15,
            Command::Kill => 16,
            Command::LibGet => 17,
            Command::Libraries => 18,
            Command::Load => 19,
            Command::Log => 20,
            Command::Nonce => 21,
            Command::Order => 22,
            Command::Output => 23,
            Command::Query => 24,
            Command::ReadCount => 25,
            Command::Request => 26,
            Command::Rewind => 27,
            Command::SessionId => 28,
            Command::Size => 29,
            Command::Timestamp => 30,
            Command::Token => 31,
            Command::Transaction => 32,
            Command::Transactions => 33,
            Command::Unuse => 34,
            Command::Update => 35,
            Command::Use => 36,
            Command::WriteCount => 37,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Command> {
        Command::ALL.into_iter().find(|c| c.to_byte() == byte)
    }

    /// Commands a session may run before it has authenticated.
    pub fn allowed_unauthenticated(self) -> bool {
        matches!(
            self,
            Command::SessionId
                | Command::Libraries
                | Command::Use
                | Command::LibGet
                | Command::Nonce
                | Command::Auth
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::Abort => "ABORT",
            Command::Admin => "ADMIN",
            Command::Auth => "AUTH",
            Command::Check => "CHECK",
            Command::Close => "CLOSE",
            Command::Commit => "COMMIT",
            Command::Connections => "CONNECTIONS",
            Command::Cursor => "CURSOR",
            Command::Cursors => "CURSORS",
            Command::Dump => "DUMP",
            Command::Erase => "ERASE",
            Command::Explain => "EXPLAIN",
            Command::Get => "GET",
            Command::Get1 => "GET1",
            Command::Header => "HEADER",
            Command::Keys => "KEYS",
            Command::Kill => "KILL",
            Command::LibGet => "LIBGET",
            Command::Libraries => "LIBRARIES",
            Command::Load => "LOAD",
            Command::Log => "LOG",
            Command::Nonce => "NONCE",
            Command::Order => "ORDER",
            Command::Output => "OUTPUT",
            Command::Query => "QUERY",
            Command::ReadCount => "READCOUNT",
            Command::Request => "REQUEST",
            Command::Rewind => "REWIND",
            Command::SessionId => "SESSIONID",
            Command::Size => "SIZE",
            Command::Timestamp => "TIMESTAMP",
            Command::Token => "TOKEN",
            Command::Transaction => "TRANSACTION",
            Command::Transactions => "TRANSACTIONS",
            Command::Unuse => "UNUSE",
            Command::Update => "UPDATE",
            Command::Use => "USE",
            Command::WriteCount => "WRITECOUNT",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn bytes_are_unique_and_dense() {
        let bytes: HashSet<u8> = Command::ALL.iter().map(|c| c.to_byte()).collect();
        assert_eq!(bytes.len(), Command::ALL.len());
        assert!(bytes.iter().all(|b| (*b as usize) < Command::ALL.len()));
    }

    #[test]
    fn byte_mapping_is_stable() {
        assert_eq!(Command::Abort.to_byte(), 0);
        assert_eq!(Command::Commit.to_byte(), 5);
        assert_eq!(Command::Get1.to_byte(), 13);
        assert_eq!(Command::Nonce.to_byte(), 21);
        assert_eq!(Command::Token.to_byte(), 31);
        assert_eq!(Command::WriteCount.to_byte(), 37);
    }

    #[test]
    fn from_byte_inverts_to_byte() {
        for command in Command::ALL {
            assert_eq!(Command::from_byte(command.to_byte()), Some(command));
        }
        assert_eq!(Command::from_byte(38), None);
        assert_eq!(Command::from_byte(255), None);
    }

    #[test]
    fn unauthenticated_allow_list() {
        let allowed: Vec<Command> = Command::ALL
            .into_iter()
            .filter(|c| c.allowed_unauthenticated())
            .collect();
        assert_eq!(
            allowed,
            vec![
                Command::Auth,
                Command::LibGet,
                Command::Libraries,
                Command::Nonce,
                Command::SessionId,
                Command::Use
            ]
        );
    }
}
