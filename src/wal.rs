//! Append-only event log backing the booking store.
//!
//! Each frame is `[u32 len][bincode payload][u32 crc32]`, little endian.
//! The log only ever grows by whole, fsynced batches. Bytes past the last
//! fsynced batch (a torn write from a crash, or a batch whose write or fsync
//! failed) are cut off before anything else is appended, so an event that
//! was refused never resurfaces and an acknowledged one is never stranded
//! behind garbage.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Largest payload a frame may carry. A length word above this on disk is
/// garbage, not an allocation request.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Frame header (length) plus trailer (crc).
const FRAME_OVERHEAD: u64 = 8;

fn encode_frame(buf: &mut Vec<u8>, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("event of {} bytes exceeds WAL frame limit", payload.len()),
        ));
    }
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(())
}

/// Fill `buf` completely. `Ok(false)` means the file ended first.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact frame and its size on disk, or `None` at end of file or at
/// the first torn/corrupt frame.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut word = [0u8; 4];
    if !read_full(reader, &mut word)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_FRAME_BYTES {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? || !read_full(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, len as u64 + FRAME_OVERHEAD)))
}

struct Scan {
    events: Vec<Event>,
    /// Length of the prefix made of intact frames.
    intact_len: u64,
    file_len: u64,
}

fn scan(path: &Path) -> io::Result<Scan> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(Scan {
                events: Vec::new(),
                intact_len: 0,
                file_len: 0,
            });
        }
        Err(e) => return Err(e),
    };
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut intact_len = 0;
    while let Some((event, size)) = read_frame(&mut reader)? {
        events.push(event);
        intact_len += size;
    }
    Ok(Scan {
        events,
        intact_len,
        file_len,
    })
}

pub struct Wal {
    file: File,
    path: PathBuf,
    /// Everything before this offset is fsynced and acknowledged.
    durable_len: u64,
    /// The file may hold bytes past `durable_len`, or `file` may no longer
    /// be the file at `path`. Cleared by `restore_durable_tail`.
    dirty: bool,
    appends_since_compact: u64,
    batch: Vec<u8>,
}

impl Wal {
    /// Open the log for appending and return the events already in it.
    /// A torn or corrupt tail is truncated away first.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let Scan {
            events,
            intact_len,
            file_len,
        } = scan(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if intact_len < file_len {
            tracing::warn!(
                path = %path.display(),
                discarded = file_len - intact_len,
                "truncating torn WAL tail"
            );
            file.set_len(intact_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            file,
            path: path.to_path_buf(),
            durable_len: intact_len,
            dirty: false,
            appends_since_compact: 0,
            batch: Vec::new(),
        };
        Ok((wal, events))
    }

    /// Write `events` as one batch and fsync. On error none of them are in
    /// the log, now or after a restart.
    pub fn commit<'a>(&mut self, events: impl IntoIterator<Item = &'a Event>) -> io::Result<()> {
        if self.dirty {
            self.restore_durable_tail()?;
        }
        self.batch.clear();
        let mut count = 0;
        for event in events {
            encode_frame(&mut self.batch, event)?;
            count += 1;
        }

        let written = self
            .file
            .write_all(&self.batch)
            .and_then(|()| self.file.sync_all());
        if let Err(e) = written {
            self.dirty = true;
            if let Err(undo) = self.restore_durable_tail() {
                tracing::error!("WAL tail rollback failed, retrying on next commit: {undo}");
            }
            return Err(e);
        }
        self.durable_len += self.batch.len() as u64;
        self.appends_since_compact += count;
        Ok(())
    }

    /// Reopen the log and cut it back to the last acknowledged batch.
    fn restore_durable_tail(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        file.set_len(self.durable_len)?;
        file.sync_all()?;
        self.file = file;
        self.dirty = false;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the log with `events`: written to a side file, fsynced, then
    /// renamed over the log.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let mut image = Vec::new();
        for event in events {
            encode_frame(&mut image, event)?;
        }
        let tmp = self.path.with_extension("wal.tmp");
        {
            let mut side = File::create(&tmp)?;
            side.write_all(&image)?;
            side.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        self.durable_len = image.len() as u64;
        self.appends_since_compact = 0;
        // Our handle still points at the replaced file.
        self.dirty = true;
        self.restore_durable_tail()
    }

    /// All intact events in the log, oldest first. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(scan(path)?.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Booking, BookingStatus, DateRange};
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("spotbook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn spot_created() -> Event {
        Event::SpotCreated {
            id: Ulid::new(),
            owner_id: Ulid::new(),
            name: Some("Cabin".into()),
        }
    }

    fn booking_created(spot_id: Ulid) -> Event {
        let d = |day| NaiveDate::from_ymd_opt(2024, 5, day).unwrap();
        Event::BookingCreated {
            booking: Booking {
                id: Ulid::new(),
                spot_id,
                user_id: Ulid::new(),
                range: DateRange::new(d(1), d(4)).unwrap(),
                status: BookingStatus::Confirmed,
                created_at: 1,
                updated_at: 1,
            },
        }
    }

    fn append_raw(path: &Path, bytes: &[u8]) {
        let mut f = OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(bytes).unwrap();
    }

    #[test]
    fn commit_and_replay() {
        let path = tmp_path("commit_and_replay.wal");
        let events = vec![spot_created(), booking_created(Ulid::new())];
        {
            let (mut wal, existing) = Wal::open(&path).unwrap();
            assert!(existing.is_empty());
            wal.commit(&events).unwrap();
            assert_eq!(wal.appends_since_compact(), 2);
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);

        let (_, reopened) = Wal::open(&path).unwrap();
        assert_eq!(reopened, events);
    }

    #[test]
    fn replay_stops_at_torn_tail() {
        let path = tmp_path("torn_tail.wal");
        let event = spot_created();
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            wal.commit([&event]).unwrap();
        }
        // Half of a second frame
        append_raw(&path, &[40, 0, 0, 0, 1, 2]);
        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
    }

    #[test]
    fn reopen_truncates_torn_tail_before_appending() {
        let path = tmp_path("torn_then_append.wal");
        let first = spot_created();
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            wal.commit([&first]).unwrap();
        }
        let intact = fs::metadata(&path).unwrap().len();
        append_raw(&path, &[40, 0, 0, 0, 1, 2]);

        let second = spot_created();
        {
            let (mut wal, existing) = Wal::open(&path).unwrap();
            assert_eq!(existing, vec![first.clone()]);
            assert_eq!(fs::metadata(&path).unwrap().len(), intact);
            wal.commit([&second]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("bad_crc.wal");
        let good = spot_created();
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            wal.commit([&good]).unwrap();
        }
        let payload = bincode::serialize(&Event::SpotDeleted { id: Ulid::new() }).unwrap();
        let mut frame = (payload.len() as u32).to_le_bytes().to_vec();
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        append_raw(&path, &frame);

        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
    }

    #[test]
    fn oversized_length_word_is_a_torn_tail() {
        let path = tmp_path("huge_len.wal");
        let good = spot_created();
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            wal.commit([&good]).unwrap();
        }
        append_raw(&path, &[0xF0, 0xFF, 0xFF, 0xFF, 7, 7, 7, 7]);

        assert_eq!(Wal::replay(&path).unwrap(), vec![good.clone()]);
        let (_, existing) = Wal::open(&path).unwrap();
        assert_eq!(existing, vec![good]);
    }

    #[test]
    fn oversized_event_is_refused_without_touching_log() {
        let path = tmp_path("oversized_event.wal");
        let good = spot_created();
        let huge = Event::SpotCreated {
            id: Ulid::new(),
            owner_id: Ulid::new(),
            name: Some("x".repeat(MAX_FRAME_BYTES + 1)),
        };
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            let err = wal.commit([&good, &huge]).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidData);
            wal.commit([&good]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
    }

    #[test]
    fn failed_commit_leaves_no_trace() {
        let path = tmp_path("failed_commit.wal");
        let kept = spot_created();
        let refused = spot_created();
        let next = spot_created();
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            wal.commit([&kept]).unwrap();

            // The refused batch reached the disk but its fsync "failed": a
            // read-only handle makes the write error out.
            let mut landed = Vec::new();
            encode_frame(&mut landed, &refused).unwrap();
            append_raw(&path, &landed);
            wal.file = File::open(&path).unwrap();
            assert!(wal.commit([&refused]).is_err());
            assert!(!wal.dirty);

            wal.commit([&next]).unwrap();
            assert_eq!(wal.appends_since_compact(), 2);
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, next]);
    }

    #[test]
    fn dirty_log_is_rolled_back_before_next_commit() {
        let path = tmp_path("dirty_rollback.wal");
        let kept = spot_created();
        let next = spot_created();
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            wal.commit([&kept]).unwrap();
            let mut leftover = Vec::new();
            encode_frame(&mut leftover, &spot_created()).unwrap();
            append_raw(&path, &leftover);
            wal.dirty = true;

            wal.commit([&next]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, next]);
    }

    #[test]
    fn compact_shrinks_log() {
        let path = tmp_path("compact_shrinks.wal");
        let spot = spot_created();
        let Event::SpotCreated { id: spot_id, .. } = spot else { unreachable!() };
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            wal.commit([&spot]).unwrap();
            for _ in 0..10 {
                let created = booking_created(spot_id);
                let Event::BookingCreated { booking } = &created else { unreachable!() };
                let cancelled = Event::BookingCancelled {
                    id: booking.id,
                    spot_id,
                    updated_at: 2,
                };
                wal.commit([&created, &cancelled]).unwrap();
            }
        }
        let before = fs::metadata(&path).unwrap().len();

        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            wal.compact(std::slice::from_ref(&spot)).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "{after} should be < {before}");
        assert_eq!(Wal::replay(&path).unwrap(), vec![spot]);
    }

    #[test]
    fn commit_after_compact_lands_after_snapshot() {
        let path = tmp_path("commit_after_compact.wal");
        let spot = spot_created();
        let Event::SpotCreated { id: spot_id, .. } = spot else { unreachable!() };
        let next = booking_created(spot_id);
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            wal.commit([&spot, &spot]).unwrap();
            wal.compact(std::slice::from_ref(&spot)).unwrap();
            wal.commit([&next]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![spot, next]);
    }
}
