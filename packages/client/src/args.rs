//! Command line arguments.

use std::time::Duration;

use chatlink_session::{BackoffPolicy, SessionConfig};
use clap::Parser;

/// Chatlink terminal client
#[derive(Parser, Debug, Clone)]
#[command(name = "chatlink-client")]
#[command(about = "Terminal client for Chatlink realtime rooms")]
#[command(version)]
pub struct Args {
    /// WebSocket endpoint of the chat server
    #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
    pub url: String,

    /// User id presented when connecting
    #[arg(short, long)]
    pub user_id: String,

    /// Log level for the client and the session layer (RUST_LOG overrides)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Seconds to wait for a message_ack before a send fails
    #[arg(long, default_value_t = 8)]
    pub ack_timeout_secs: u64,

    /// Seconds to wait for the connection on startup
    #[arg(long, default_value_t = 20)]
    pub connect_timeout_secs: u64,

    /// Reconnect attempts before giving up
    #[arg(long, default_value_t = 5)]
    pub max_reconnect_attempts: u32,
}

impl Args {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default()
            .with_ack_timeout(Duration::from_secs(self.ack_timeout_secs))
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_backoff(BackoffPolicy::default().with_max_attempts(self.max_reconnect_attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        // テスト項目: 省略した引数はデフォルト値になる
        // when (操作):
        let args = Args::try_parse_from(["chatlink-client", "--user-id", "alice"]).unwrap();
        let config = args.session_config();

        // then (期待する結果):
        assert_eq!(args.url, "ws://127.0.0.1:8080/ws");
        assert_eq!(config.ack_timeout, Duration::from_secs(8));
        assert_eq!(config.connect_timeout, Duration::from_secs(20));
        assert_eq!(config.backoff.max_attempts(), 5);
    }

    #[test]
    fn test_overrides_map_onto_session_config() {
        // テスト項目: 引数の指定が SessionConfig に反映される
        // when (操作):
        let args = Args::try_parse_from([
            "chatlink-client",
            "-u",
            "bob",
            "--url",
            "ws://chat.example:9000/ws",
            "--ack-timeout-secs",
            "3",
            "--connect-timeout-secs",
            "60",
            "--max-reconnect-attempts",
            "10",
        ])
        .unwrap();
        let config = args.session_config();

        // then (期待する結果):
        assert_eq!(args.user_id, "bob");
        assert_eq!(config.ack_timeout, Duration::from_secs(3));
        assert_eq!(config.connect_timeout, Duration::from_secs(60));
        assert_eq!(config.backoff.max_attempts(), 10);
    }

    #[test]
    fn test_user_id_is_required() {
        // テスト項目: --user-id は必須
        assert!(Args::try_parse_from(["chatlink-client"]).is_err());
    }
}
