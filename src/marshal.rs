//! Bulk memory transfer over the scratch-array choreography
//!
//! OpenOCD stages block transfers through named TCL array variables: a read
//! converts target memory into an array and echoes it back; a write
//! populates an array and converts it into target memory. The server arrays
//! are append-only across calls, so every transfer unsets its scratch array
//! first to avoid stale elements from an earlier, longer transfer.

use crate::codec::{self, WordLen};
use crate::error::{Result, RpcError};
use crate::transport::TclTransport;

/// Scratch array staging reads (`mem2array` destination)
pub const READ_SCRATCH: &str = "output";
/// Scratch array staging writes (`array2mem` source)
pub const WRITE_SCRATCH: &str = "myArray";

/// Read `count` words of `word_len` bytes starting at `address`.
///
/// All-or-nothing: any command failure aborts the transfer, and a reply with
/// the wrong number of values is a protocol error.
pub async fn read_block(
    transport: &mut TclTransport,
    word_len: WordLen,
    address: u32,
    count: usize,
) -> Result<Vec<u32>> {
    transport.send(&codec::array_unset_command(READ_SCRATCH)).await?;
    transport
        .send(&codec::mem_to_array_command(READ_SCRATCH, word_len, address, count))
        .await?;

    if count == 0 {
        // A zero-length conversion leaves the variable unset; echoing it
        // would be a TCL error, and the result is known.
        return Ok(Vec::new());
    }

    let reply = transport.send(&codec::array_echo_command(READ_SCRATCH)).await?;
    let values = codec::parse_array_echo(&reply)?;
    if values.len() != count {
        return Err(RpcError::Protocol(format!(
            "block read returned {} words, expected {}",
            values.len(),
            count
        )));
    }
    Ok(values)
}

/// Write `data` as words of `word_len` bytes starting at `address`.
///
/// No read-back verification is performed here; callers wanting verification
/// read the block back and compare.
pub async fn write_block(
    transport: &mut TclTransport,
    word_len: WordLen,
    address: u32,
    data: &[u32],
) -> Result<()> {
    transport.send(&codec::array_unset_command(WRITE_SCRATCH)).await?;
    transport
        .send(&codec::array_set_command(WRITE_SCRATCH, data))
        .await?;
    transport
        .send(&codec::array_to_mem_command(WRITE_SCRATCH, word_len, address, data.len()))
        .await?;
    Ok(())
}
