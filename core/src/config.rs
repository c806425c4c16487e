//! Configuration types for BALLOTBOX

use crate::error::TallyError;
use crate::traits::TallyResult;
use crate::types::{Ballot, PeerNode, VoteOption};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name for logging
    pub name: String,

    /// Ballot definition file, reread on every request
    pub ballot_path: PathBuf,

    /// This host's address as listed in the ballot's servers
    pub self_addr: Option<Ipv4Addr>,

    /// Local tally store configuration
    pub store: StoreConfig,

    /// Peer exchange configuration
    pub peer: PeerConfig,

    /// API configuration
    pub api: ApiConfig,

    /// Logging level
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "ballotbox-node".to_string(),
            ballot_path: PathBuf::from("./vote-config.json"),
            self_addr: None,
            store: StoreConfig::default(),
            peer: PeerConfig::default(),
            api: ApiConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    pub fn load(path: impl AsRef<Path>) -> TallyResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TallyError::Config(format!("cannot read node config {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Address excluded from aggregation.
    ///
    /// Falls back to the API listen address when it names a concrete IPv4 host.
    pub fn self_addr(&self) -> Option<Ipv4Addr> {
        if self.self_addr.is_some() {
            return self.self_addr;
        }
        match self.api.listen_addr.parse::<SocketAddr>() {
            Ok(SocketAddr::V4(addr)) if !addr.ip().is_unspecified() => Some(*addr.ip()),
            _ => None,
        }
    }

    pub fn ballot_source(&self) -> BallotSource {
        BallotSource::new(&self.ballot_path)
    }
}

/// Which local tally store backs the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process memory only, lost on exit
    Memory,
    /// sled database, one process per directory
    Sled,
    /// Memory mapped file shared by every process on the host
    Mapped,
}

/// Local tally store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Directory holding the store files
    pub dir: PathBuf,

    /// Give up acquiring the store lock after this long; wait forever if unset
    pub lock_timeout_ms: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Mapped,
            dir: default_store_dir(),
            lock_timeout_ms: None,
        }
    }
}

impl StoreConfig {
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }
}

fn default_store_dir() -> PathBuf {
    let shm = PathBuf::from("/dev/shm");
    if shm.is_dir() {
        shm
    } else {
        std::env::temp_dir()
    }
}

/// Peer exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Enable the results listener
    pub enabled: bool,

    /// Listen address for the results listener; its port is also the one
    /// dialed on every peer
    pub listen_addr: String,

    /// Skip servers whose address belongs to this host
    pub exclude_local_addrs: bool,

    /// Per-peer round trip timeout; none if unset
    pub timeout_ms: Option<u64>,

    /// Extra attempts per peer after a failure
    pub retries: u32,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "0.0.0.0:9001".to_string(),
            exclude_local_addrs: true,
            timeout_ms: None,
            retries: 0,
        }
    }
}

impl PeerConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Port every host listens on, taken from `listen_addr`
    pub fn port(&self) -> TallyResult<u16> {
        self.listen_addr
            .parse::<SocketAddr>()
            .map(|addr| addr.port())
            .map_err(|e| {
                TallyError::Config(format!("invalid peer listen address {:?}: {}", self.listen_addr, e))
            })
    }
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Enable HTTP API
    pub enabled: bool,

    /// API listen address
    pub listen_addr: String,

    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "0.0.0.0:8080".to_string(),
            enable_cors: false,
        }
    }
}

/// Ballot file as written by operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BallotConfig {
    pub title: String,
    pub options: Vec<String>,
    pub servers: Vec<String>,
}

impl BallotConfig {
    pub fn sample() -> Self {
        Self {
            title: "Which team wins?".to_string(),
            options: vec![
                "Red Team".to_string(),
                "Blue Team".to_string(),
                "Green Team".to_string(),
            ],
            servers: vec![],
        }
    }

    pub fn into_ballot(self) -> TallyResult<Ballot> {
        if self.title.is_empty() {
            return Err(invalid("title must be non-empty"));
        }
        if self.options.iter().any(String::is_empty) {
            return Err(invalid("options must be non-empty strings"));
        }
        let peers = self
            .servers
            .iter()
            .map(|s| s.parse::<PeerNode>())
            .collect::<TallyResult<Vec<_>>>()?;
        let options = self
            .options
            .into_iter()
            .map(VoteOption::new)
            .collect::<TallyResult<Vec<_>>>()?;
        Ballot::new(self.title, options, peers).map_err(|e| match e {
            TallyError::Validation(msg) => invalid(&msg),
            other => other,
        })
    }
}

fn invalid(reason: &str) -> TallyError {
    TallyError::Config(format!("Invalid vote config: {reason}"))
}

/// Durable source of the ballot, read fresh on each use
#[derive(Debug, Clone)]
pub struct BallotSource {
    path: PathBuf,
}

impl BallotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> TallyResult<Ballot> {
        let path = &self.path;
        if path.as_os_str().is_empty() {
            return Err(TallyError::Config("vote config filename must be non-empty".into()));
        }
        if !path.is_file() {
            return Err(TallyError::Config(format!(
                "vote config file not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            TallyError::Config(format!("error reading vote config file {}: {}", path.display(), e))
        })?;
        if content.trim().is_empty() {
            return Err(TallyError::Config(format!(
                "vote config file is empty: {}",
                path.display()
            )));
        }
        let config: BallotConfig = serde_json::from_str(&content)
            .map_err(|e| invalid(&e.to_string()))?;
        config.into_ballot()
    }
}
