use std::io::{ErrorKind, Read};

use log::warn;

use crate::script::{CallOutcome, ScriptHost};
use crate::statesnap::END_OF_BLOCK;

const READ_CHUNK: usize = 1024;

/// Incremental consumer for the `#ENDBLOCK`-framed state-dump protocol.
/// Feeds each complete block to the stream-side `sample(...)` function.
/// Reads are non-blocking: partial blocks stay buffered across polls and a
/// `WouldBlock` simply ends the poll.
pub struct StateMonitor {
    buf: Vec<u8>,
}

impl StateMonitor {
    pub fn new() -> Self {
        StateMonitor { buf: Vec::with_capacity(READ_CHUNK) }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drain whatever the source has ready and dispatch every complete block.
    /// Returns the number of blocks consumed this poll.
    pub fn poll<R: Read>(&mut self, src: &mut R, host: &mut ScriptHost) -> std::io::Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match src.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(self.consume_blocks(host))
    }

    fn consume_blocks(&mut self, host: &mut ScriptHost) -> usize {
        let marker = format!("\n{END_OF_BLOCK}\n");
        let mut consumed = 0;
        while let Some(pos) = find(&self.buf, marker.as_bytes()) {
            let block: Vec<u8> = self.buf.drain(..pos + marker.len()).collect();
            let text = String::from_utf8_lossy(&block[..pos + 1]);
            match host.feed_sample(&text) {
                Ok(CallOutcome::Called) => consumed += 1,
                Ok(CallOutcome::Missing) => {
                    warn!("no 'sample' function in debug script, state block ignored");
                }
                Err(fault) => {
                    warn!("state sample rejected: {fault}");
                }
            }
        }
        consumed
    }
}

impl Default for StateMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}
