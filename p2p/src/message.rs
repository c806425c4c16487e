//! Peer wire protocol for BALLOTBOX
//!
//! One request/response exchange per connection. Both directions use frames
//! of a 4 byte big-endian length followed by the payload. The request payload
//! is the fixed `get-results` token; the response is the bincode encoding of
//! the peer's `(OptionId, count)` pairs.

use ballotbox_core::{OptionId, TallyResult, TallySnapshot};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Port peers listen on unless configured otherwise
pub const DEFAULT_PEER_PORT: u16 = 9001;

/// The only command a peer answers
pub const GET_RESULTS: &[u8] = b"get-results";

/// Largest frame accepted from the wire
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Results carried in a response frame
pub type PeerResults = Vec<(OptionId, u64)>;

pub fn snapshot_to_results(snapshot: &TallySnapshot) -> PeerResults {
    snapshot.iter().map(|(id, count)| (*id, *count)).collect()
}

pub fn encode_results(results: &[(OptionId, u64)]) -> TallyResult<Vec<u8>> {
    Ok(bincode::serialize(results)?)
}

pub fn decode_results(bytes: &[u8]) -> TallyResult<PeerResults> {
    Ok(bincode::deserialize(bytes)?)
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds limit", payload.len()),
        ));
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit"),
        ));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}
