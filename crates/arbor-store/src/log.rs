//! CRC-framed append log of committed checkpoints.
//!
//! On-disk format, one frame per checkpoint:
//! ```text
//! [4 bytes: payload length (little-endian u32)]
//! [4 bytes: CRC32 of length bytes + payload (little-endian u32)]
//! [N bytes: payload (bincode-serialized Checkpoint)]
//! ```
//!
//! The CRC covers the length field, so a damaged length is detected instead
//! of being trusted to find the next frame.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use arbor_types::Checkpoint;
use tracing::{debug, error, warn};

use crate::config::SyncMode;
use crate::error::{StoreError, StoreResult};

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: u64 = 8;

/// Result of replaying a log file.
#[derive(Debug, Default)]
pub struct Recovery {
    /// Checkpoints from every intact frame, in append order.
    pub checkpoints: Vec<Checkpoint>,
    /// Damaged regions skipped because of a CRC or decode failure.
    pub skipped: usize,
    /// Byte length of the log up to the end of the last complete frame.
    /// Anything past it is a torn tail with no intact frame after it.
    pub valid_len: u64,
}

/// What sits at a given offset of the log.
#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Intact { len: usize },
    /// Complete but failing its CRC.
    Damaged { len: usize },
    /// Header or payload runs past the end of the file.
    Incomplete,
}

struct LogWriter {
    writer: BufWriter<File>,
    offset: u64,
    /// Set when a failed append could not be rolled back.
    needs_recovery: Option<String>,
    #[cfg(test)]
    fail_after: Option<usize>,
}

/// Append-only checkpoint log.
///
/// Damaged frames are skipped on recovery and replay resumes at the next
/// intact frame. A torn tail (a frame cut short by a crash) ends recovery
/// and is truncated away by [`truncate_to`](CheckpointLog::truncate_to)
/// before new frames are written. A failed append truncates its partial
/// frame so later frames stay reachable.
pub struct CheckpointLog {
    path: PathBuf,
    writer: Mutex<LogWriter>,
    sync_mode: SyncMode,
}

impl CheckpointLog {
    /// Open (or create) the log file at `path`.
    pub fn open(path: &Path, sync_mode: SyncMode) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let offset = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(LogWriter {
                writer: BufWriter::new(file),
                offset,
                needs_recovery: None,
                #[cfg(test)]
                fail_after: None,
            }),
            sync_mode,
        })
    }

    /// Append one checkpoint. Returns the byte offset of its frame.
    ///
    /// On failure the file is cut back to the frame's start offset.
    pub fn append(&self, checkpoint: &Checkpoint) -> StoreResult<u64> {
        let frame = encode_frame(checkpoint)?;

        let mut w = self.lock()?;
        if let Some(reason) = &w.needs_recovery {
            return Err(StoreError::LogNeedsRecovery {
                offset: w.offset,
                reason: reason.clone(),
            });
        }
        let frame_offset = w.offset;

        if let Err(err) = self.write_frame(&mut w, &frame) {
            warn!(offset = frame_offset, error = %err, "checkpoint log append failed; rolling back");
            if let Err(rollback) = self.reset_writer(&mut w, frame_offset) {
                error!(offset = frame_offset, error = %rollback, "checkpoint log rollback failed");
                w.needs_recovery = Some(rollback.to_string());
            }
            return Err(err.into());
        }

        w.offset += frame.len() as u64;
        debug!(offset = frame_offset, len = frame.len(), "checkpoint log append");
        Ok(frame_offset)
    }

    /// Replay every intact frame from the start of the file.
    pub fn recover(&self) -> StoreResult<Recovery> {
        let buf = fs::read(&self.path)?;
        let mut recovery = Recovery::default();
        let mut offset = 0usize;

        while offset < buf.len() {
            let frame = frame_at(&buf, offset);
            if let Frame::Intact { len } = frame {
                let start = offset + HEADER_SIZE as usize;
                match bincode::deserialize::<Checkpoint>(&buf[start..start + len]) {
                    Ok(checkpoint) => recovery.checkpoints.push(checkpoint),
                    Err(e) => {
                        warn!(offset, error = %e, "undecodable checkpoint frame; skipping");
                        recovery.skipped += 1;
                    }
                }
                offset = start + len;
                recovery.valid_len = offset as u64;
                continue;
            }

            match (next_intact(&buf, offset + 1), frame) {
                (Some(next), _) => {
                    warn!(offset, resume = next, "damaged checkpoint log region; skipping");
                    recovery.skipped += 1;
                    offset = next;
                }
                (None, Frame::Damaged { len }) => {
                    warn!(offset, len, "CRC mismatch; skipping checkpoint frame");
                    recovery.skipped += 1;
                    offset += HEADER_SIZE as usize + len;
                    recovery.valid_len = offset as u64;
                }
                (None, _) => {
                    warn!(offset, file_len = buf.len(), "torn checkpoint log frame; stopping recovery");
                    break;
                }
            }
        }

        debug!(
            recovered = recovery.checkpoints.len(),
            skipped = recovery.skipped,
            "checkpoint log recovery complete"
        );
        Ok(recovery)
    }

    /// Cut the file back to `len` bytes, dropping a torn tail.
    pub fn truncate_to(&self, len: u64) -> StoreResult<()> {
        let mut w = self.lock()?;
        w.writer.flush()?;
        self.reset_writer(&mut w, len)?;
        w.needs_recovery = None;
        debug!(len, "checkpoint log truncated");
        Ok(())
    }

    /// Flush buffered frames and fsync the file.
    pub fn flush(&self) -> StoreResult<()> {
        let mut w = self.lock()?;
        w.writer.flush()?;
        w.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Current write offset (file length as seen by this log).
    pub fn offset(&self) -> StoreResult<u64> {
        Ok(self.lock()?.offset)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, LogWriter>> {
        self.writer.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn write_frame(&self, w: &mut LogWriter, frame: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        if let Some(limit) = w.fail_after.take() {
            w.writer.write_all(&frame[..limit.min(frame.len())])?;
            w.writer.flush()?;
            return Err(io::Error::other("simulated write failure"));
        }

        w.writer.write_all(frame)?;
        w.writer.flush()?;
        if self.sync_mode == SyncMode::EveryWrite {
            w.writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Truncate the file to `len` and reopen the writer there. Bytes still
    /// buffered in the old writer are discarded, not flushed.
    fn reset_writer(&self, w: &mut LogWriter, len: u64) -> io::Result<()> {
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(len)?;
        file.sync_all()?;

        let reopened = OpenOptions::new().read(true).append(true).open(&self.path)?;
        let stale = mem::replace(&mut w.writer, BufWriter::new(reopened));
        let (_file, _discarded) = stale.into_parts();
        w.offset = len;
        Ok(())
    }
}

fn encode_frame(checkpoint: &Checkpoint) -> StoreResult<Vec<u8>> {
    let payload =
        bincode::serialize(checkpoint).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let length = u32::try_from(payload.len())
        .map_err(|_| StoreError::Serialization(format!("checkpoint {} too large", checkpoint.id)))?
        .to_le_bytes();

    let mut frame = Vec::with_capacity(HEADER_SIZE as usize + payload.len());
    frame.extend_from_slice(&length);
    frame.extend_from_slice(&frame_crc(length, &payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn frame_crc(length: [u8; 4], payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&length);
    hasher.update(payload);
    hasher.finalize()
}

fn frame_at(buf: &[u8], offset: usize) -> Frame {
    let header_end = offset + HEADER_SIZE as usize;
    let Some(header) = buf.get(offset..header_end) else {
        return Frame::Incomplete;
    };
    let length = [header[0], header[1], header[2], header[3]];
    let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    let len = u32::from_le_bytes(length) as usize;
    if len == 0 {
        return Frame::Incomplete;
    }
    let Some(payload) = buf.get(header_end..header_end + len) else {
        return Frame::Incomplete;
    };
    if frame_crc(length, payload) == expected_crc {
        Frame::Intact { len }
    } else {
        Frame::Damaged { len }
    }
}

/// Offset of the first intact frame at or after `from`.
fn next_intact(buf: &[u8], from: usize) -> Option<usize> {
    (from..buf.len()).find(|&offset| matches!(frame_at(buf, offset), Frame::Intact { .. }))
}

impl std::fmt::Debug for CheckpointLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointLog")
            .field("path", &self.path)
            .field("sync_mode", &self.sync_mode)
            .finish()
    }
}
