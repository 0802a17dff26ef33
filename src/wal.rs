use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::limits::MAX_WAL_RECORD_BYTES;
use crate::model::Event;

/// Length prefix plus trailing checksum.
const FRAME_OVERHEAD: u64 = 8;

/// Append-only log of salon events.
///
/// Each record is framed as `[u32 le: payload len][bincode Event][u32 le: crc32 of payload]`.
/// On startup [`Wal::recover`] cuts the file back to the last intact record,
/// so a record torn by a crash never hides records written after restart.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

/// Why a scan stopped short of the end of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TornTail {
    /// The file ends inside a record.
    Truncated,
    /// The length prefix exceeds `MAX_WAL_RECORD_BYTES`.
    Oversized(u32),
    BadChecksum,
    Undecodable,
}

/// Result of reading a log from the start.
#[derive(Debug)]
pub struct Scan {
    pub events: Vec<Event>,
    /// Byte length of the intact prefix.
    pub valid_len: u64,
    pub torn: Option<TornTail>,
}

enum Frame {
    Record(Event, u64),
    End,
    Torn(TornTail),
}

fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_WAL_RECORD_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("event of {} bytes exceeds WAL record limit", payload.len()),
        ));
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

/// Read until `buf` is full or the reader is exhausted; returns bytes read.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_frame(reader: &mut impl Read) -> io::Result<Frame> {
    let mut len_buf = [0u8; 4];
    match fill(reader, &mut len_buf)? {
        0 => return Ok(Frame::End),
        4 => {}
        _ => return Ok(Frame::Torn(TornTail::Truncated)),
    }
    let len = u32::from_le_bytes(len_buf);
    // Checked before allocating: a garbage prefix must not size the buffer.
    if len as usize > MAX_WAL_RECORD_BYTES {
        return Ok(Frame::Torn(TornTail::Oversized(len)));
    }

    let mut body = vec![0u8; len as usize + 4];
    if fill(reader, &mut body)? < body.len() {
        return Ok(Frame::Torn(TornTail::Truncated));
    }
    let (payload, crc) = body.split_at(len as usize);
    if crc != crc32fast::hash(payload).to_le_bytes() {
        return Ok(Frame::Torn(TornTail::BadChecksum));
    }
    Ok(match bincode::deserialize::<Event>(payload) {
        Ok(event) => Frame::Record(event, FRAME_OVERHEAD + len as u64),
        Err(_) => Frame::Torn(TornTail::Undecodable),
    })
}

impl Wal {
    /// Open (or create) the log for appending without inspecting its contents.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Read every intact record. A missing file scans as empty.
    pub fn scan(path: &Path) -> io::Result<Scan> {
        let mut scan = Scan {
            events: Vec::new(),
            valid_len: 0,
            torn: None,
        };
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(scan),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        loop {
            match read_frame(&mut reader)? {
                Frame::Record(event, size) => {
                    scan.events.push(event);
                    scan.valid_len += size;
                }
                Frame::End => break,
                Frame::Torn(reason) => {
                    warn!(
                        path = %path.display(),
                        offset = scan.valid_len,
                        ?reason,
                        "WAL tail is damaged, ignoring the rest of the file"
                    );
                    scan.torn = Some(reason);
                    break;
                }
            }
        }
        Ok(scan)
    }

    /// Scan the log, drop any damaged tail from disk, and open it for appending.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let scan = Self::scan(path)?;
        if scan.torn.is_some() {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(scan.valid_len)?;
            file.sync_all()?;
            warn!(
                path = %path.display(),
                valid_len = scan.valid_len,
                "truncated WAL to its last intact record"
            );
        }
        Ok((Self::open(path)?, scan.events))
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one record. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_frame(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Replace the whole log with `events`. The snapshot is written and
    /// synced beside the log, then renamed over it.
    pub fn rewrite(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                write_frame(&mut tmp, event)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        self.writer.flush()?;
        fs::rename(&tmp_path, &self.path)?;
        *self = Self::open(&self.path)?;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BusinessHours, DayOfWeek};
    use ulid::Ulid;

    fn salon_created(id: Ulid) -> Event {
        Event::SalonCreated {
            id,
            owner_id: "owner".into(),
            name: "Shear Bliss".into(),
            address: None,
            hours: BusinessHours::uniform(
                &[DayOfWeek::Monday],
                "09:00".parse().unwrap(),
                "17:00".parse().unwrap(),
            ),
            created_at: 0,
        }
    }

    fn service_added(salon_id: Ulid) -> Event {
        Event::ServiceAdded {
            id: Ulid::new(),
            salon_id,
            name: "Haircut".into(),
            duration_minutes: 30,
            price: 50_000,
        }
    }

    fn append_raw(path: &Path, bytes: &[u8]) {
        let mut f = OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(bytes).unwrap();
    }

    #[test]
    fn append_and_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("salond.wal");
        let sid = Ulid::new();
        let events = vec![salon_created(sid), service_added(sid)];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        let scan = Wal::scan(&path).unwrap();
        assert_eq!(scan.events, events);
        assert_eq!(scan.torn, None);
        assert_eq!(scan.valid_len, fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn missing_file_scans_empty() {
        let dir = tempfile::tempdir().unwrap();
        let scan = Wal::scan(&dir.path().join("missing.wal")).unwrap();
        assert!(scan.events.is_empty());
        assert_eq!(scan.valid_len, 0);
    }

    #[test]
    fn partial_record_is_a_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("salond.wal");
        let event = salon_created(Ulid::new());
        Wal::open(&path).unwrap().append(&event).unwrap();
        let intact = fs::metadata(&path).unwrap().len();

        append_raw(&path, &[0u8; 6]);

        let scan = Wal::scan(&path).unwrap();
        assert_eq!(scan.events, vec![event]);
        assert_eq!(scan.valid_len, intact);
        assert_eq!(scan.torn, Some(TornTail::Truncated));
    }

    #[test]
    fn checksum_mismatch_stops_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("salond.wal");
        let payload = bincode::serialize(&Event::SalonDeleted { id: Ulid::new() }).unwrap();
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        let scan = Wal::scan(&path).unwrap();
        assert!(scan.events.is_empty());
        assert_eq!(scan.torn, Some(TornTail::BadChecksum));
    }

    #[test]
    fn oversized_length_prefix_is_rejected_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("salond.wal");
        let event = salon_created(Ulid::new());
        Wal::open(&path).unwrap().append(&event).unwrap();
        let intact = fs::metadata(&path).unwrap().len();

        append_raw(&path, &u32::MAX.to_le_bytes());
        append_raw(&path, b"not a record");

        let scan = Wal::scan(&path).unwrap();
        assert_eq!(scan.events, vec![event.clone()]);
        assert_eq!(scan.torn, Some(TornTail::Oversized(u32::MAX)));

        let (_, events) = Wal::recover(&path).unwrap();
        assert_eq!(events, vec![event]);
        assert_eq!(fs::metadata(&path).unwrap().len(), intact);
    }

    #[test]
    fn writes_after_recovering_a_torn_tail_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("salond.wal");
        let first = salon_created(Ulid::new());
        Wal::open(&path).unwrap().append(&first).unwrap();
        append_raw(&path, &[7u8; 6]);

        let second = salon_created(Ulid::new());
        {
            let (mut wal, events) = Wal::recover(&path).unwrap();
            assert_eq!(events, vec![first.clone()]);
            wal.append(&second).unwrap();
        }

        let (_, events) = Wal::recover(&path).unwrap();
        assert_eq!(events, vec![first, second]);
    }

    #[test]
    fn rewrite_then_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("salond.wal");
        let sid = Ulid::new();
        let snapshot = vec![salon_created(sid)];
        let later = service_added(sid);

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&snapshot[0]).unwrap();
            for _ in 0..10 {
                wal.append(&service_added(sid)).unwrap();
            }
            let before = fs::metadata(&path).unwrap().len();
            wal.rewrite(&snapshot).unwrap();
            let after = fs::metadata(&path).unwrap().len();
            assert!(after < before, "rewritten WAL should shrink: {after} < {before}");
            assert_eq!(wal.appends_since_compact(), 0);
            assert!(!path.with_extension("wal.tmp").exists());
            wal.append(&later).unwrap();
        }

        assert_eq!(Wal::scan(&path).unwrap().events, vec![snapshot[0].clone(), later]);
    }

    #[test]
    fn buffered_appends_are_durable_after_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("salond.wal");
        let events: Vec<Event> = (0..5).map(|_| salon_created(Ulid::new())).collect();

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }

        assert_eq!(Wal::scan(&path).unwrap().events, events);
    }
}
