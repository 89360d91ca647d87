// Network configuration.
//
// `NetConfig` is loaded from JSON at startup (every field optional, missing
// fields take the defaults below) and then handed to `NetSession`. Nothing in
// the session layer reads process-wide state; the master server address and
// ports only ever come from here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::NetResult;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Hostname of the master directory service. Empty disables registration.
    pub masterserver_name: String,
    pub masterserver_port: u16,
    /// Port hosts listen on for discovery commands and joiners. 0 lets the OS
    /// pick one (useful in tests).
    pub gameserver_port: u16,
    /// Upper bound for each blocking wait in discovery and the client side of
    /// the join handshake.
    pub handshake_timeout_ms: u64,
    /// How long a host keeps a transient socket that has not finished its
    /// command exchange.
    pub transient_timeout_ms: u64,
    /// How long a send may wait for space in a full kernel buffer before the
    /// connection is given up.
    pub send_timeout_ms: u64,
    /// Root directory for files moved by file transfer.
    pub storage_root: PathBuf,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            masterserver_name: String::new(),
            masterserver_port: 9998,
            gameserver_port: 9999,
            handshake_timeout_ms: 1000,
            transient_timeout_ms: 1000,
            send_timeout_ms: 1000,
            storage_root: PathBuf::from("."),
        }
    }
}

impl NetConfig {
    pub fn from_json(json: &str) -> NetResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> NetResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn transient_timeout(&self) -> Duration {
        Duration::from_millis(self.transient_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn has_masterserver(&self) -> bool {
        !self.masterserver_name.is_empty()
    }
}
