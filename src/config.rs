//! Server configuration.
use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1:3147";
pub const DEFAULT_WORKERS: usize = 15;
pub const DEFAULT_IDLE_TIMEOUT: u64 = 3600;

/// A user created at startup, given as `NAME:PASSWORD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSeed {
    pub name: String,
    pub password: String,
}

impl FromStr for UserSeed {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((name, password)) if !name.is_empty() => Ok(Self {
                name: name.to_string(),
                password: password.to_string(),
            }),
            _ => Err(format!("expected NAME:PASSWORD, got '{s}'")),
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Rime database server", long_about = None)]
pub struct ServerConfig {
    /// Listen for new connections at address
    #[arg(default_value = DEFAULT_ADDRESS)]
    pub address: SocketAddr,

    /// Directory for DUMP and LOAD files
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,

    /// Number of workers executing requests
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Seconds a connection may sit idle before it is closed (0 disables)
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT)]
    pub idle_timeout: u64,

    /// Create a user at startup, as NAME:PASSWORD (repeatable)
    #[arg(long = "user", value_name = "NAME:PASSWORD")]
    pub users: Vec<UserSeed>,

    /// Table to put in use as a library at startup (repeatable)
    #[arg(long = "library", value_name = "NAME")]
    pub libraries: Vec<String>,
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([127, 0, 0, 1], 3147)),
            dir: PathBuf::from("."),
            workers: DEFAULT_WORKERS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            users: Vec::new(),
            libraries: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::try_parse_from(["rime_server"]).unwrap();
        assert_eq!(config.address, ServerConfig::default().address);
        assert_eq!(config.workers, 15);
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn users_and_libraries() {
        let config = ServerConfig::try_parse_from([
            "rime_server",
            "0.0.0.0:4000",
            "--user",
            "admin:se:cret",
            "--user",
            "guest:",
            "--library",
            "stdlib",
            "--idle-timeout",
            "0",
        ])
        .unwrap();

        assert_eq!(config.address.port(), 4000);
        assert_eq!(
            config.users,
            vec![
                UserSeed {
                    name: "admin".into(),
                    password: "se:cret".into()
                },
                UserSeed {
                    name: "guest".into(),
                    password: String::new()
                },
            ]
        );
        assert_eq!(config.libraries, vec!["stdlib"]);
        assert_eq!(config.idle_timeout(), None);
    }

    #[test]
    fn bad_user() {
        assert!(ServerConfig::try_parse_from(["rime_server", "--user", "nobody"]).is_err());
        assert!(ServerConfig::try_parse_from(["rime_server", "--user", ":pw"]).is_err());
    }
}
