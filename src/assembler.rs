//! Stream assembler: orders chunked output for delivery
//!
//! Synthesis calls for consecutive text units run concurrently and may
//! finish out of order. Each chunk carries a per-turn sequence number;
//! the assembler withholds chunk N+1 until chunk N has been delivered,
//! up to a bounded reorder window. When the window expires the pending
//! chunks are delivered best-effort with a reordering warning flag set.
//!
//! Delivery goes through a bounded channel, so a slow consumer blocks
//! upstream synthesis instead of growing memory unbounded.

use crate::config::AssemblerConfig;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One ordered fragment of turn output
#[derive(Debug, Clone)]
pub struct OutputChunk {
    /// Monotonically increasing per-turn sequence number
    pub seq: u64,

    /// Text this audio was synthesized from (empty for the final marker)
    pub text: String,

    pub audio: Vec<u8>,

    /// Set on the last chunk of the turn
    pub is_final: bool,

    /// Set when this chunk was delivered past the reorder window
    pub reorder_warned: bool,
}

impl OutputChunk {
    pub fn new(seq: u64, text: String, audio: Vec<u8>) -> Self {
        Self {
            seq,
            text,
            audio,
            is_final: false,
            reorder_warned: false,
        }
    }

    /// Zero-payload end-of-turn marker
    pub fn final_marker(seq: u64) -> Self {
        Self {
            seq,
            text: String::new(),
            audio: Vec::new(),
            is_final: true,
            reorder_warned: false,
        }
    }
}

pub struct StreamAssembler;

impl StreamAssembler {
    /// Spawn the per-turn assembly task. Returns the input sender for
    /// synthesis results, the ordered delivery receiver, and the task
    /// handle. Closing the input sender flushes and ends the task.
    pub fn spawn(
        config: AssemblerConfig,
        cancel: CancellationToken,
    ) -> (
        mpsc::Sender<OutputChunk>,
        mpsc::Receiver<OutputChunk>,
        JoinHandle<()>,
    ) {
        let (in_tx, in_rx) = mpsc::channel(config.buffer_depth);
        let (out_tx, out_rx) = mpsc::channel(config.buffer_depth);
        let handle = tokio::spawn(run(config, in_rx, out_tx, cancel));
        (in_tx, out_rx, handle)
    }
}

async fn run(
    config: AssemblerConfig,
    mut rx: mpsc::Receiver<OutputChunk>,
    tx: mpsc::Sender<OutputChunk>,
    cancel: CancellationToken,
) {
    let mut next_seq: u64 = 0;
    let mut pending: BTreeMap<u64, OutputChunk> = BTreeMap::new();
    let mut gap_since: Option<Instant> = None;

    loop {
        let deadline = gap_since.map(|t| t + config.reorder_window);

        tokio::select! {
            () = cancel.cancelled() => {
                debug!("assembly cancelled, {} pending chunks discarded", pending.len());
                return;
            }
            () = async { tokio::time::sleep_until(deadline.unwrap()).await },
                if deadline.is_some() =>
            {
                warn!(
                    next_seq,
                    held = pending.len(),
                    "reorder window expired, delivering best-effort"
                );
                for (_, mut chunk) in std::mem::take(&mut pending) {
                    chunk.reorder_warned = true;
                    next_seq = chunk.seq + 1;
                    if tx.send(chunk).await.is_err() {
                        return;
                    }
                }
                gap_since = None;
            }
            chunk = rx.recv() => match chunk {
                Some(chunk) if chunk.seq < next_seq => {
                    warn!(seq = chunk.seq, next_seq, "discarding late duplicate chunk");
                }
                Some(chunk) if chunk.seq == next_seq => {
                    next_seq += 1;
                    if tx.send(chunk).await.is_err() {
                        return;
                    }
                    // Drain whatever became consecutive
                    while let Some(ready) = pending.remove(&next_seq) {
                        next_seq += 1;
                        if tx.send(ready).await.is_err() {
                            return;
                        }
                    }
                    gap_since = if pending.is_empty() {
                        None
                    } else {
                        Some(Instant::now())
                    };
                }
                Some(chunk) => {
                    pending.insert(chunk.seq, chunk);
                    gap_since.get_or_insert_with(Instant::now);
                }
                None => break,
            }
        }
    }

    // Input closed: flush everything still held, flagging any gap
    let had_gap = pending.keys().next().is_some_and(|&seq| seq != next_seq);
    for (_, mut chunk) in pending {
        chunk.reorder_warned = had_gap;
        if tx.send(chunk).await.is_err() {
            return;
        }
    }
}
