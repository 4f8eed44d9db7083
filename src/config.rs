//! Configuration inputs for the websocket notification and RPC subsystem.
//!
//! Mirrors the teacher's `connection::ConnConfig`: a plain struct with a
//! `Default` impl, loadable either programmatically or from environment
//! variables, with on-disk credential resolution falling back to the
//! app-data directory.
use {
    crate::appdir,
    std::{env, fs, path::PathBuf},
};

/// Default number of elements a client's synchronous send channel can queue
/// before backpressuring the reader (spec.md §6).
pub const DEFAULT_SEND_BUFFER_SIZE: usize = 50;

#[derive(Clone, Debug)]
pub struct RpcServerConfig {
    /// Maximum number of concurrently connected websocket clients.
    pub rpc_max_websockets: usize,

    /// SHA-256 hash (lowercase hex) of `"Basic " + base64(user:pass)` for the
    /// full-admin credential. `None` disables admin login entirely.
    pub admin_hash: Option<[u8; 32]>,

    /// Same shape as `admin_hash`, for the limited/non-admin credential.
    pub limited_hash: Option<[u8; 32]>,

    /// Capacity of each client's bounded synchronous send channel.
    pub send_buffer_size: usize,

    /// Name used to resolve the on-disk app-data directory for credential
    /// and certificate files (e.g. "mynode").
    pub app_name: String,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        RpcServerConfig {
            rpc_max_websockets: 25,
            admin_hash: None,
            limited_hash: None,
            send_buffer_size: DEFAULT_SEND_BUFFER_SIZE,
            app_name: "nodewsrpc".to_string(),
        }
    }
}

impl RpcServerConfig {
    /// Loads configuration from environment variables, falling back to
    /// `Default::default()` values for anything unset.
    ///
    /// Recognized variables: `RPC_MAX_WEBSOCKETS`, `RPC_ADMIN_HASH`,
    /// `RPC_LIMITED_HASH` (both 64-char lowercase hex SHA-256 digests),
    /// `RPC_SEND_BUFFER_SIZE`.
    pub fn from_env() -> Self {
        let mut cfg = RpcServerConfig::default();

        if let Ok(v) = env::var("RPC_MAX_WEBSOCKETS") {
            if let Ok(parsed) = v.parse() {
                cfg.rpc_max_websockets = parsed;
            }
        }

        if let Ok(v) = env::var("RPC_SEND_BUFFER_SIZE") {
            if let Ok(parsed) = v.parse() {
                cfg.send_buffer_size = parsed;
            }
        }

        if let Ok(v) = env::var("RPC_ADMIN_HASH") {
            cfg.admin_hash = parse_hash_hex(&v);
        }

        if let Ok(v) = env::var("RPC_LIMITED_HASH") {
            cfg.limited_hash = parse_hash_hex(&v);
        }

        cfg
    }

    /// Resolves the app-data directory for this daemon, falling back to the
    /// current directory when the OS home directory can't be determined.
    pub fn app_data_dir(&self) -> PathBuf {
        appdir::get_app_data_dir(&self.app_name, false).unwrap_or_else(|| PathBuf::from("."))
    }

    /// Reads a file relative to the app-data directory, such as a TLS
    /// certificate used by the transport layer.
    pub fn read_app_file(&self, name: &str) -> std::io::Result<String> {
        fs::read_to_string(self.app_data_dir().join(name))
    }
}

fn parse_hash_hex(s: &str) -> Option<[u8; 32]> {
    let mut buf = [0u8; 32];
    hex::decode_to_slice(s.trim(), &mut buf).ok()?;
    Some(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = RpcServerConfig::default();
        assert_eq!(cfg.send_buffer_size, 50);
        assert!(cfg.admin_hash.is_none());
    }

    #[test]
    fn parses_hash_hex() {
        let hex_str = "00".repeat(32);
        assert_eq!(parse_hash_hex(&hex_str), Some([0u8; 32]));
        assert_eq!(parse_hash_hex("not-hex"), None);
    }
}
