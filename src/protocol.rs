// Wire framing for `/xelvra/1.0.0`.
//
// Grounded on `networking/protocol/{codec,handshake}.rs`'s length-prefixed
// framing style, reduced to the exact contract of spec §6: a 32-bit
// big-endian length prefix, the raw payload, and an ASCII `ACK` response —
// the teacher's bincode/compression/checksum machinery does not apply here.

use crate::error::{NodeError, Result};
use crate::net::transport::Stream;

pub const PROTOCOL_ID: &str = "/xelvra/1.0.0";
pub const ACK: &[u8] = b"ACK";

/// Write a single length-prefixed message and close the stream for write,
/// per spec: "each stream carries a single application message followed by
/// stream close."
pub async fn write_message(stream: &mut dyn Stream, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| NodeError::Transport("message too large for 32-bit length prefix".into()))?;
    stream.write(&len.to_be_bytes()).await?;
    stream.write(payload).await?;
    stream.close().await
}

/// Read a single length-prefixed message from an inbound stream.
pub async fn read_message(stream: &mut dyn Stream) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    read_exact(stream, &mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    read_exact(stream, &mut payload).await?;
    Ok(payload)
}

/// Acknowledge receipt with the ASCII bytes `ACK` and close the stream.
pub async fn send_ack(stream: &mut dyn Stream) -> Result<()> {
    stream.write(ACK).await?;
    stream.close().await
}

async fn read_exact(stream: &mut dyn Stream, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(NodeError::Transport("stream closed before message complete".into()));
        }
        filled += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// An in-memory loopback stream used to exercise the framing logic
    /// without a real transport.
    struct LoopbackStream {
        inbound: Mutex<VecDeque<u8>>,
        outbound: Mutex<Vec<u8>>,
    }

    #[async_trait]
    impl Stream for LoopbackStream {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let mut inbound = self.inbound.lock().await;
            let n = buf.len().min(inbound.len());
            for slot in buf.iter_mut().take(n) {
                *slot = inbound.pop_front().unwrap();
            }
            Ok(n)
        }
        async fn write(&mut self, buf: &[u8]) -> Result<()> {
            self.outbound.lock().await.extend_from_slice(buf);
            Ok(())
        }
        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
        fn set_deadline(&mut self, _deadline: Option<Duration>) {}
    }

    #[tokio::test]
    async fn round_trips_a_message() {
        let payload = b"hello".to_vec();
        let mut writer = LoopbackStream {
            inbound: Mutex::new(VecDeque::new()),
            outbound: Mutex::new(Vec::new()),
        };
        write_message(&mut writer, &payload).await.unwrap();

        let bytes = writer.outbound.into_inner();
        let mut reader = LoopbackStream {
            inbound: Mutex::new(bytes.into_iter().collect()),
            outbound: Mutex::new(Vec::new()),
        };
        let received = read_message(&mut reader).await.unwrap();
        assert_eq!(received, payload);
    }
}
