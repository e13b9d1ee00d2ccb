use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::model::StoreEvent;

/// File signature; bump the trailing digit on an incompatible record change.
const MAGIC: [u8; 4] = *b"SBK1";
const HEADER_LEN: u64 = MAGIC.len() as u64;
/// Anything longer is a corrupt length prefix, not a real booking event.
const MAX_RECORD_LEN: usize = 16 << 20;

/// Result of reading a log from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<StoreEvent>,
    /// Bytes up to the end of the last intact record.
    pub valid_len: u64,
    pub file_len: u64,
}

impl Replay {
    /// Bytes after the last intact record: a crash mid-append or corruption.
    pub fn torn_bytes(&self) -> u64 {
        self.file_len.saturating_sub(self.valid_len)
    }
}

/// Append-only write-ahead log of store mutations, one file per business.
///
/// Layout: the 4-byte `MAGIC`, then records of
/// `[u32 len][u32 crc32(payload)][bincode StoreEvent]`, little endian.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

fn write_record(writer: &mut impl Write, event: &StoreEvent) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "record too large"))?;
    let mut head = [0u8; 8];
    head[..4].copy_from_slice(&len.to_le_bytes());
    head[4..].copy_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    writer.write_all(&head)?;
    writer.write_all(&payload)
}

/// Pull the next intact payload. `None` at end of log or at the first torn
/// or corrupt record.
fn read_record(reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut head = [0u8; 8];
    if !fill(reader, &mut head)? {
        return Ok(None);
    }
    let [l0, l1, l2, l3, c0, c1, c2, c3] = head;
    let len = u32::from_le_bytes([l0, l1, l2, l3]) as usize;
    let crc = u32::from_le_bytes([c0, c1, c2, c3]);
    if len > MAX_RECORD_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !fill(reader, &mut payload)? || crc32fast::hash(&payload) != crc {
        return Ok(None);
    }
    Ok(Some(payload))
}

fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn snapshot_path(path: &Path) -> PathBuf {
    path.with_extension("wal.snap")
}

impl Wal {
    /// Read the log at `path`, cut off any torn tail so new appends land
    /// right after the last intact record, and open it for appending.
    pub fn recover(path: &Path) -> io::Result<(Wal, Replay)> {
        let replay = Self::read(path)?;
        let file = OpenOptions::new().create(true).read(true).write(true).open(path)?;
        if replay.valid_len < HEADER_LEN {
            file.set_len(0)?;
            (&file).write_all(&MAGIC)?;
            file.sync_all()?;
        } else if replay.torn_bytes() > 0 {
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        let mut file = file;
        file.seek(SeekFrom::End(0))?;
        let wal = Wal {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        };
        Ok((wal, replay))
    }

    /// All intact events in `path`. A missing file is an empty log; a file
    /// with the wrong signature is refused.
    pub fn read(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let file_len = file.metadata()?.len();
        if file_len == 0 {
            return Ok(Replay::default());
        }

        let mut reader = BufReader::new(file);
        let mut magic = [0u8; 4];
        if !fill(&mut reader, &mut magic)? {
            // Crashed while writing the signature.
            return Ok(Replay {
                events: Vec::new(),
                valid_len: 0,
                file_len,
            });
        }
        if magic != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not a slotbook log", path.display()),
            ));
        }

        let mut replay = Replay {
            events: Vec::new(),
            valid_len: HEADER_LEN,
            file_len,
        };
        while let Some(payload) = read_record(&mut reader)? {
            let Ok(event) = bincode::deserialize::<StoreEvent>(&payload) else {
                break;
            };
            replay.valid_len += 8 + payload.len() as u64;
            replay.events.push(event);
        }
        Ok(replay)
    }

    /// Buffer one event. Nothing is durable until `commit`.
    pub fn push(&mut self, event: &StoreEvent) -> io::Result<()> {
        write_record(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush buffered events and fsync.
    pub fn commit(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &StoreEvent) -> io::Result<()> {
        self.push(event)?;
        self.commit()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write a complete log holding `events` next to `path`, fsynced.
    pub fn write_snapshot(path: &Path, events: &[StoreEvent]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(snapshot_path(path))?);
        writer.write_all(&MAGIC)?;
        for event in events {
            write_record(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Move the snapshot over the live log and continue appending to it.
    pub fn install_snapshot(&mut self) -> io::Result<()> {
        self.commit()?;
        fs::rename(snapshot_path(&self.path), &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Consultant, ConsultantStatus, YearCounter};
    use chrono::Utc;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotbook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn counter(year: i32, counter: u32) -> StoreEvent {
        StoreEvent::CounterWritten(YearCounter {
            year,
            counter,
            last_updated: Utc::now(),
        })
    }

    fn consultant(id: &str) -> StoreEvent {
        StoreEvent::ConsultantPut(Consultant {
            id: id.into(),
            name: "Meera".into(),
            email: "meera@example.com".into(),
            status: ConsultantStatus::Active,
            unavailable_slots: vec![],
        })
    }

    #[test]
    fn fresh_log_gets_signature() {
        let path = tmp_path("signature.wal");
        let (_wal, replay) = Wal::recover(&path).unwrap();
        assert!(replay.events.is_empty());
        assert_eq!(fs::read(&path).unwrap(), MAGIC.to_vec());
    }

    #[test]
    fn events_come_back_in_order() {
        let path = tmp_path("in_order.wal");
        let events = vec![consultant("c1"), counter(2025, 1), counter(2025, 2)];
        {
            let (mut wal, _) = Wal::recover(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 3);
        }
        let replay = Wal::read(&path).unwrap();
        assert_eq!(replay.events, events);
        assert_eq!(replay.torn_bytes(), 0);
    }

    #[test]
    fn torn_tail_is_cut_before_new_appends() {
        let path = tmp_path("torn_tail.wal");
        {
            let (mut wal, _) = Wal::recover(&path).unwrap();
            wal.append(&counter(2025, 3)).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 6]).unwrap();
        }
        {
            let (mut wal, replay) = Wal::recover(&path).unwrap();
            assert_eq!(replay.torn_bytes(), 6);
            wal.append(&counter(2025, 4)).unwrap();
        }
        let replay = Wal::read(&path).unwrap();
        let counters: Vec<u32> = replay
            .events
            .iter()
            .map(|e| match e {
                StoreEvent::CounterWritten(c) => c.counter,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(counters, vec![3, 4]);
        assert_eq!(replay.torn_bytes(), 0);
    }

    #[test]
    fn bad_checksum_ends_replay() {
        let path = tmp_path("bad_crc.wal");
        {
            let (mut wal, _) = Wal::recover(&path).unwrap();
            wal.append(&counter(2025, 9)).unwrap();
            wal.append(&counter(2025, 10)).unwrap();
        }
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let replay = Wal::read(&path).unwrap();
        assert_eq!(replay.events.len(), 1);
        assert!(replay.torn_bytes() > 0);
    }

    #[test]
    fn absurd_length_prefix_is_treated_as_torn() {
        let path = tmp_path("huge_len.wal");
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        fs::write(&path, &bytes).unwrap();
        let replay = Wal::read(&path).unwrap();
        assert!(replay.events.is_empty());
        assert_eq!(replay.valid_len, HEADER_LEN);
    }

    #[test]
    fn foreign_file_is_refused() {
        let path = tmp_path("foreign.wal");
        fs::write(&path, b"PGDMP....").unwrap();
        let err = Wal::read(&path).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn torn_signature_is_rewritten() {
        let path = tmp_path("torn_signature.wal");
        fs::write(&path, &MAGIC[..2]).unwrap();
        {
            let (mut wal, replay) = Wal::recover(&path).unwrap();
            assert_eq!(replay.torn_bytes(), 2);
            wal.append(&consultant("c9")).unwrap();
        }
        assert_eq!(Wal::read(&path).unwrap().events, vec![consultant("c9")]);
    }

    #[test]
    fn missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        assert!(Wal::read(&path).unwrap().events.is_empty());
    }

    #[test]
    fn snapshot_replaces_history() {
        let path = tmp_path("snapshot.wal");
        let snapshot = vec![consultant("c1"), counter(2025, 40)];
        let next = counter(2025, 41);
        {
            let (mut wal, _) = Wal::recover(&path).unwrap();
            for n in 1..=40 {
                wal.append(&counter(2025, n)).unwrap();
            }
            let before = fs::metadata(&path).unwrap().len();
            Wal::write_snapshot(wal.path(), &snapshot).unwrap();
            wal.install_snapshot().unwrap();
            assert!(fs::metadata(&path).unwrap().len() < before);
            assert_eq!(wal.appends_since_compact(), 0);
            wal.append(&next).unwrap();
        }
        let mut expected = snapshot;
        expected.push(next);
        assert_eq!(Wal::read(&path).unwrap().events, expected);
    }
}
