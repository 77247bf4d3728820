//! Segmented link log
//!
//! Links are appended to numbered segment files (`links-000001.seg`, ...).
//! A segment holds at most `segment_capacity` records; once full it is
//! sealed and never written again, and the next append opens a new one.
//!
//! The whole listing is kept in memory, rebuilt by replaying every segment
//! in index order at open. One `RwLock` guards it: appends take the write
//! side so identifier allocation and the file write happen together, and
//! readers only hold the read side long enough to clone the listing.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use viewswap_core::{Link, LinkId, NewLink, normalize_url};

use crate::LinkLedger;
use crate::error::StorageError;

/// Default number of links per segment
pub const DEFAULT_SEGMENT_CAPACITY: usize = 10_000;

/// Upper bound for a single encoded record accepted by `submit`
pub const MAX_RECORD_LEN: usize = 64 * 1024;

const SEGMENT_PREFIX: &str = "links-";
const SEGMENT_SUFFIX: &str = ".seg";

/// Configuration for the link log
#[derive(Debug, Clone)]
pub struct LinkLogConfig {
    /// Directory holding the segment files
    pub base_dir: PathBuf,
    /// Maximum number of links per segment
    pub segment_capacity: usize,
    /// Whether to sync writes to disk immediately
    pub sync_on_write: bool,
}

impl Default for LinkLogConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./data/links"),
            segment_capacity: DEFAULT_SEGMENT_CAPACITY,
            sync_on_write: true,
        }
    }
}

/// File name of the segment with the given index
pub fn segment_file_name(index: u32) -> String {
    format!("{SEGMENT_PREFIX}{index:06}{SEGMENT_SUFFIX}")
}

fn parse_segment_index(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?
        .parse()
        .ok()
}

/// Metadata about one segment file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub index: u32,
    pub path: PathBuf,
    /// Number of records in the segment
    pub len: usize,
    /// Byte length of the valid records
    pub size: u64,
}

impl SegmentInfo {
    pub fn file_name(&self) -> String {
        segment_file_name(self.index)
    }
}

struct LogState {
    /// Every link, in append order
    links: Vec<Link>,
    /// Segments in creation order; the last one is open for appends
    segments: Vec<SegmentInfo>,
    /// Handle to the open segment
    writer: Option<File>,
}

impl LogState {
    fn last_id(&self) -> Option<&LinkId> {
        self.links.last().map(|l| &l.id)
    }
}

/// Append-only, segmented link ledger
pub struct SegmentedLinkLog {
    config: LinkLogConfig,
    state: RwLock<LogState>,
}

impl SegmentedLinkLog {
    /// Open the log, replaying all existing segments
    #[instrument(skip_all, fields(dir = %config.base_dir.display()))]
    pub async fn open(config: LinkLogConfig) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(&config.base_dir).await?;

        let mut indices = Vec::new();
        let mut entries = tokio::fs::read_dir(&config.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(index) = entry.file_name().to_str().and_then(parse_segment_index) {
                indices.push(index);
            }
        }
        indices.sort_unstable();

        let mut links = Vec::new();
        let mut segments = Vec::with_capacity(indices.len());
        let last = indices.len().saturating_sub(1);
        for (position, index) in indices.into_iter().enumerate() {
            let path = config.base_dir.join(segment_file_name(index));
            let (records, size) = replay_segment(&path).await?;
            if position != last && records.len() < config.segment_capacity {
                warn!(segment = index, len = records.len(), "Sealed segment is short");
            }
            segments.push(SegmentInfo {
                index,
                path,
                len: records.len(),
                size,
            });
            links.extend(records);
        }

        // Drop any torn tail so new appends start at a record boundary
        let writer = match segments.last() {
            Some(open) => {
                let file = OpenOptions::new().write(true).open(&open.path).await?;
                let on_disk = file.metadata().await?.len();
                if on_disk > open.size {
                    warn!(
                        segment = open.index,
                        valid = open.size,
                        on_disk,
                        "Truncating torn segment tail"
                    );
                    file.set_len(open.size).await?;
                }
                Some(file)
            }
            None => None,
        };

        info!(
            links = links.len(),
            segments = segments.len(),
            "Link log opened"
        );

        Ok(Self {
            config,
            state: RwLock::new(LogState {
                links,
                segments,
                writer,
            }),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &LinkLogConfig {
        &self.config
    }

    /// Snapshot of segment metadata
    pub async fn segments(&self) -> Vec<SegmentInfo> {
        self.state.read().await.segments.clone()
    }

    /// Copy every segment into `dest_dir`, returning the copies
    ///
    /// Sealed segments never change and are copied without holding the lock.
    /// The open segment is copied under the read lock so the copy never ends
    /// in the middle of a record.
    #[instrument(skip(self, dest_dir))]
    pub async fn copy_segments_to(&self, dest_dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
        tokio::fs::create_dir_all(dest_dir).await?;

        let segments = self.segments().await;
        let Some((open, sealed)) = segments.split_last() else {
            return Ok(Vec::new());
        };

        let mut copies = Vec::with_capacity(segments.len());
        for segment in sealed {
            let dest = dest_dir.join(segment.file_name());
            tokio::fs::copy(&segment.path, &dest).await?;
            copies.push(dest);
        }

        let dest = dest_dir.join(open.file_name());
        {
            let _guard = self.state.read().await;
            tokio::fs::copy(&open.path, &dest).await?;
        }
        copies.push(dest);

        debug!(files = copies.len(), "Copied link segments");
        Ok(copies)
    }

    async fn open_segment(&self, index: u32) -> Result<(File, SegmentInfo), StorageError> {
        let path = self.config.base_dir.join(segment_file_name(index));
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;
        let size = file.metadata().await?.len();
        info!(segment = index, "Opened new link segment");
        Ok((
            file,
            SegmentInfo {
                index,
                path,
                len: 0,
                size,
            },
        ))
    }
}

/// Read every complete record from a segment file
///
/// Returns the records and the byte length they occupy. Only a record that
/// runs past the end of the file counts as a torn tail and ends the replay.
/// A complete record that fails to decode is an error.
async fn replay_segment(path: &Path) -> Result<(Vec<Link>, u64), StorageError> {
    let file = File::open(path).await?;
    let file_size = file.metadata().await?.len();
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut offset = 0u64;

    let corrupt = |offset: u64, reason: String| StorageError::CorruptSegment {
        segment: path.display().to_string(),
        reason: format!("{reason} at offset {offset}"),
    };

    while offset < file_size {
        let remaining = file_size - offset;
        if remaining < 4 {
            warn!(path = %path.display(), offset, "Truncated record header, stopping replay");
            break;
        }

        // Read length prefix (4 bytes)
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let record_len = u64::from(u32::from_be_bytes(len_buf));
        if record_len == 0 {
            return Err(corrupt(offset, "zero-length record".into()));
        }
        if record_len > remaining - 4 {
            warn!(path = %path.display(), offset, len = record_len, "Truncated record, stopping replay");
            break;
        }
        if record_len > MAX_RECORD_LEN as u64 {
            warn!(path = %path.display(), offset, len = record_len, "Replaying oversized record");
        }

        let mut record_buf = vec![0u8; record_len as usize];
        reader.read_exact(&mut record_buf).await?;

        let link = postcard::from_bytes::<Link>(&record_buf)
            .map_err(|e| corrupt(offset, format!("undecodable record: {e}")))?;
        records.push(link);

        offset += 4 + record_len;
    }

    Ok((records, offset))
}

#[async_trait]
impl LinkLedger for SegmentedLinkLog {
    #[instrument(skip(self, link), fields(submitter = %link.submitter))]
    async fn submit(&self, link: NewLink) -> Result<Link, StorageError> {
        let mut state = self.state.write().await;

        let id = match state.last_id() {
            Some(last) => {
                if !last.is_well_formed() {
                    warn!(last_id = %last, "Corrupted link id, restarting sequence");
                }
                last.next()
            }
            None => LinkId::first(),
        };

        let record = Link {
            id,
            url: normalize_url(&link.url),
            submitter: link.submitter,
            submitted_at_millis: chrono::Utc::now().timestamp_millis(),
            privileged_origin: link.privileged_origin,
        };
        let serialized = postcard::to_allocvec(&record)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        if serialized.len() > MAX_RECORD_LEN {
            return Err(StorageError::RecordTooLarge {
                len: serialized.len(),
                max: MAX_RECORD_LEN,
            });
        }

        // Seal the open segment when it is full
        let needs_segment = state
            .segments
            .last()
            .is_none_or(|s| s.len >= self.config.segment_capacity);
        if needs_segment {
            if let Some(mut sealed) = state.writer.take() {
                sealed.flush().await?;
                sealed.sync_all().await?;
            }
            let next_index = state.segments.last().map_or(1, |s| s.index + 1);
            let (file, info) = self.open_segment(next_index).await?;
            state.writer = Some(file);
            state.segments.push(info);
        }

        let sync = self.config.sync_on_write;
        let LogState {
            writer, segments, ..
        } = &mut *state;
        let file = writer
            .as_mut()
            .ok_or_else(|| StorageError::Io("Link segment not open".into()))?;
        let segment = segments
            .last_mut()
            .ok_or_else(|| StorageError::Io("No open link segment".into()))?;

        let offset = segment.size;
        let written = write_record(file, offset, &serialized, sync).await;
        if let Err(e) = written {
            // Roll the file back so the next append starts on a boundary
            if let Err(truncate_err) = file.set_len(offset).await {
                warn!(error = %truncate_err, "Failed to roll back partial record");
            }
            return Err(e);
        }

        segment.len += 1;
        segment.size = offset + 4 + serialized.len() as u64;
        debug!(link_id = %record.id, segment = segment.index, "Appended link");

        state.links.push(record.clone());
        Ok(record)
    }

    async fn list_all(&self) -> Result<Vec<Link>, StorageError> {
        Ok(self.state.read().await.links.clone())
    }

    async fn count(&self) -> Result<usize, StorageError> {
        Ok(self.state.read().await.links.len())
    }
}

async fn write_record(
    file: &mut File,
    offset: u64,
    serialized: &[u8],
    sync: bool,
) -> Result<(), StorageError> {
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(&(serialized.len() as u32).to_be_bytes())
        .await?;
    file.write_all(serialized).await?;
    file.flush().await?;
    if sync {
        file.sync_data().await?;
    }
    Ok(())
}
