//! Core types for BALLOTBOX
//!
//! Defines the ballot, its options and the identifiers shared between hosts.

use crate::error::TallyError;
use crate::traits::TallyResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Checksum identifying a vote option across processes and hosts.
///
/// The value is the CRC-32 (IEEE) of the option name, so two hosts loading
/// the same ballot always agree on it. Collisions between distinct names are
/// not detected.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OptionId(pub u32);

impl OptionId {
    pub fn from_name(name: &str) -> Self {
        OptionId(crc32fast::hash(name.as_bytes()))
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for OptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for OptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OptionId({})", self.0)
    }
}

impl FromStr for OptionId {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .map(OptionId)
            .map_err(|_| TallyError::Validation(format!("not an option id: {s:?}")))
    }
}

/// Point-in-time counts keyed by option
pub type TallySnapshot = BTreeMap<OptionId, u64>;

/// A named ballot option with an informational count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteOption {
    name: String,
    count: u64,
}

impl VoteOption {
    pub fn new(name: impl Into<String>) -> TallyResult<Self> {
        Self::with_count(name, 0)
    }

    pub fn with_count(name: impl Into<String>, count: u64) -> TallyResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(TallyError::Validation("vote option name must be non-empty".into()));
        }
        Ok(Self { name, count })
    }

    /// Build an option from a signed count, as found in external sources
    pub fn try_from_signed(name: impl Into<String>, count: i64) -> TallyResult<Self> {
        let count = u64::try_from(count).map_err(|_| {
            TallyError::Validation("vote option count cannot be negative".into())
        })?;
        Self::with_count(name, count)
    }

    pub fn id(&self) -> OptionId {
        OptionId::from_name(&self.name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Address of another host running the tally service
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerNode(pub Ipv4Addr);

impl PeerNode {
    pub fn new(addr: Ipv4Addr) -> Self {
        PeerNode(addr)
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.0
    }
}

impl FromStr for PeerNode {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Ipv4Addr>()
            .map(PeerNode)
            .map_err(|_| TallyError::Config(format!("invalid server address: {s}")))
    }
}

impl fmt::Display for PeerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PeerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerNode({})", self.0)
    }
}

/// Immutable ballot definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ballot {
    title: String,
    options: Vec<VoteOption>,
    peers: Vec<PeerNode>,
}

impl Ballot {
    pub fn new(title: impl Into<String>, options: Vec<VoteOption>, peers: Vec<PeerNode>) -> TallyResult<Self> {
        let title = title.into();
        if title.is_empty() {
            return Err(TallyError::Validation("vote title must be non-empty".into()));
        }
        if options.len() < 2 {
            return Err(TallyError::Validation("ballot must contain at least 2 options".into()));
        }
        for (i, option) in options.iter().enumerate() {
            if options[..i].iter().any(|o| o.name() == option.name()) {
                return Err(TallyError::Validation(format!(
                    "duplicate vote option: {}",
                    option.name()
                )));
            }
        }
        Ok(Self { title, options, peers })
    }

    /// Build a ballot from plain option names
    pub fn from_names<S: AsRef<str>>(title: &str, names: &[S], peers: Vec<PeerNode>) -> TallyResult<Self> {
        let options = names
            .iter()
            .map(|n| VoteOption::new(n.as_ref()))
            .collect::<TallyResult<Vec<_>>>()?;
        Self::new(title, options, peers)
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn options(&self) -> &[VoteOption] {
        &self.options
    }

    pub fn peers(&self) -> &[PeerNode] {
        &self.peers
    }

    pub fn option_ids(&self) -> Vec<OptionId> {
        self.options.iter().map(VoteOption::id).collect()
    }

    pub fn find_option(&self, id: OptionId) -> Option<&VoteOption> {
        self.options.iter().find(|o| o.id() == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&VoteOption> {
        self.options.iter().find(|o| o.name() == name)
    }
}

/// Identifier of the one counter store shared by every process on a host.
///
/// Derived from a constant, never from ballot content, so all ballots on a
/// host share a single namespace partitioned by [`OptionId`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TallyKey(pub u32);

impl TallyKey {
    /// 'v' project id folded into the key, as with System V `ftok`
    pub const DEFAULT: TallyKey = TallyKey(0x7600_b0b0);

    /// File name used by file backed stores
    pub fn file_name(&self) -> String {
        format!("ballotbox-{:08x}.tally", self.0)
    }

    /// Tree name used by the sled store
    pub fn tree_name(&self) -> String {
        format!("tally-{:08x}", self.0)
    }
}

impl Default for TallyKey {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Debug for TallyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TallyKey({:#010x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_id_deterministic() {
        let a = OptionId::from_name("Red Team");
        let b = OptionId::from_name("Red Team");

        assert_eq!(a, b);
        assert_ne!(a, OptionId::from_name("Blue Team"));
    }

    #[test]
    fn test_option_id_matches_crc32() {
        // Values other hosts compute for the same names
        assert_eq!(OptionId::from_name("Red Team").0, 3164470501);
        assert_eq!(OptionId::from_name("Blue Team").0, 4078375559);
        assert_eq!(OptionId::from_name("Green Team").0, 3063268722);
    }

    #[test]
    fn test_option_id_parse() {
        let id: OptionId = " 3164470501 ".parse().unwrap();
        assert_eq!(id, OptionId::from_name("Red Team"));

        assert!("red".parse::<OptionId>().is_err());
        assert!("-1".parse::<OptionId>().is_err());
    }

    #[test]
    fn test_vote_option_validation() {
        assert!(VoteOption::new("").is_err());
        assert!(VoteOption::try_from_signed("Red Team", -1).is_err());

        let option = VoteOption::try_from_signed("Red Team", 4).unwrap();
        assert_eq!(option.count(), 4);
        assert_eq!(option.name(), "Red Team");
        assert_eq!(option.id(), OptionId::from_name("Red Team"));
    }

    #[test]
    fn test_ballot_validation() {
        let peers = vec![];

        assert!(Ballot::from_names("", &["A", "B"], peers.clone()).is_err());
        assert!(Ballot::from_names("Vote", &["A"], peers.clone()).is_err());
        assert!(Ballot::from_names("Vote", &["A", "A"], peers.clone()).is_err());

        let ballot = Ballot::from_names("Vote", &["A", "B", "C"], peers).unwrap();
        assert_eq!(ballot.options().len(), 3);
        assert_eq!(ballot.option_ids()[1], OptionId::from_name("B"));
        assert!(ballot.find_option(OptionId::from_name("C")).is_some());
        assert!(ballot.find_option(OptionId::from_name("D")).is_none());
    }

    #[test]
    fn test_peer_node_parse() {
        let peer: PeerNode = "10.0.0.2".parse().unwrap();
        assert_eq!(peer.addr(), Ipv4Addr::new(10, 0, 0, 2));

        assert!("10.0.0".parse::<PeerNode>().is_err());
        assert!("host.local".parse::<PeerNode>().is_err());
    }

    #[test]
    fn test_tally_key_is_constant() {
        assert_eq!(TallyKey::default(), TallyKey::DEFAULT);
        assert_eq!(TallyKey::DEFAULT.file_name(), "ballotbox-7600b0b0.tally");
    }
}
