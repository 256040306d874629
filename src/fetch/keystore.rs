use crate::error::{LookupError, Result};
use crate::types::TermValue;
use redis::ErrorKind;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::time::Instant;

/// Read-only, list-returning commands a lookup may issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyStoreCommand {
    LRange,
    SMembers,
    SInter,
    SUnion,
    ZRange,
    ZRangeByScore,
    ZRevRange,
    ZRevRangeByScore,
}

impl KeyStoreCommand {
    pub const ALL: [KeyStoreCommand; 8] = [
        KeyStoreCommand::LRange,
        KeyStoreCommand::SMembers,
        KeyStoreCommand::SInter,
        KeyStoreCommand::SUnion,
        KeyStoreCommand::ZRange,
        KeyStoreCommand::ZRangeByScore,
        KeyStoreCommand::ZRevRange,
        KeyStoreCommand::ZRevRangeByScore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStoreCommand::LRange => "LRANGE",
            KeyStoreCommand::SMembers => "SMEMBERS",
            KeyStoreCommand::SInter => "SINTER",
            KeyStoreCommand::SUnion => "SUNION",
            KeyStoreCommand::ZRange => "ZRANGE",
            KeyStoreCommand::ZRangeByScore => "ZRANGEBYSCORE",
            KeyStoreCommand::ZRevRange => "ZREVRANGE",
            KeyStoreCommand::ZRevRangeByScore => "ZREVRANGEBYSCORE",
        }
    }
}

impl FromStr for KeyStoreCommand {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        KeyStoreCommand::ALL
            .into_iter()
            .find(|cmd| cmd.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| LookupError::Config(format!("command [{}] not supported", wanted)))
    }
}

impl fmt::Display for KeyStoreCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terms returned by a single key/list-store command.
#[derive(Debug, Clone)]
pub struct KeyStoreCommandSource {
    url: String,
    command: KeyStoreCommand,
    args: Vec<String>,
    client: redis::Client,
}

impl KeyStoreCommandSource {
    /// Rejects unknown commands, empty argument lists and malformed endpoints
    /// here, before anything touches the network.
    pub fn new(url: &str, command: &str, args: Vec<String>) -> Result<Self> {
        let command: KeyStoreCommand = command.parse()?;
        if args.is_empty() {
            return Err(LookupError::Config(format!(
                "command [{}] requires a non-empty [args] array",
                command
            )));
        }
        let client = redis::Client::open(url).map_err(|e| {
            LookupError::Config(format!("invalid key store url [{}]: {}", url, e))
        })?;

        Ok(KeyStoreCommandSource {
            url: url.to_string(),
            command,
            args,
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn command(&self) -> KeyStoreCommand {
        self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub async fn fetch(&self) -> Result<Vec<TermValue>> {
        let start = Instant::now();

        // A connection per fetch; it closes when `conn` drops.
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| self.classify(e))?;

        let mut cmd = redis::cmd(self.command.as_str());
        for arg in &self.args {
            cmd.arg(arg.as_str());
        }
        let reply: Vec<String> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| self.classify(e))?;

        tracing::debug!(
            "[KEYSTORE] {} returned {} terms from {} in {:?}",
            self.command,
            reply.len(),
            self.url,
            start.elapsed()
        );
        Ok(reply.into_iter().map(TermValue::Text).collect())
    }

    fn classify(&self, e: redis::RedisError) -> LookupError {
        match e.kind() {
            ErrorKind::TypeError => LookupError::Format(format!(
                "{} on [{}] did not return a list: {}",
                self.command, self.url, e
            )),
            ErrorKind::ResponseError | ErrorKind::ExtensionError => LookupError::Query(format!(
                "{} on [{}] was rejected: {}",
                self.command, self.url, e
            )),
            _ => LookupError::Transport(format!(
                "error running {} on [{}]: {}",
                self.command, self.url, e
            )),
        }
    }
}

impl PartialEq for KeyStoreCommandSource {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url && self.command == other.command && self.args == other.args
    }
}

impl Eq for KeyStoreCommandSource {}

impl Hash for KeyStoreCommandSource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
        self.command.hash(state);
        self.args.hash(state);
    }
}
