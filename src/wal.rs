use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::store::StoreEvent;

/// First bytes of every log file.
const MAGIC: [u8; 4] = *b"AVBL";
const FRAME_HEADER: usize = 8;

/// One `insert_many`, `create_index` or drop: every event of a store call
/// lands in a single frame, so a crash loses whole batches or nothing.
#[derive(Serialize)]
struct CommitRef<'a> {
    seq: u64,
    events: &'a [StoreEvent],
}

#[derive(Deserialize)]
struct Commit {
    seq: u64,
    events: Vec<StoreEvent>,
}

/// What `Wal::open` found on disk.
#[derive(Debug, Default)]
pub struct Recovered {
    pub events: Vec<StoreEvent>,
    pub commits: u64,
    /// Bytes cut off the end: a torn or corrupt final frame.
    pub discarded_bytes: u64,
}

/// Commit log for the embedded store.
///
/// Layout: `AVBL` magic, then frames of `[u32 len][u32 crc32][bincode Commit]`.
/// Commit sequence numbers increase by one; a frame that breaks the sequence,
/// fails its checksum or does not decode ends the valid log. Everything past
/// that point is truncated on open so new frames are never written behind
/// garbage.
pub struct Wal {
    file: File,
    path: PathBuf,
    len: u64,
    next_seq: u64,
}

fn frame(seq: u64, events: &[StoreEvent]) -> io::Result<Vec<u8>> {
    let payload = bincode::serialize(&CommitRef { seq, events })
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut buf = Vec::with_capacity(FRAME_HEADER + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Read frames until the first one that is short, corrupt or out of
/// sequence. Returns the commits and the byte offset where they end.
fn read_commits(reader: &mut impl Read) -> io::Result<(Vec<Commit>, u64)> {
    let mut commits: Vec<Commit> = Vec::new();
    let mut valid_end = MAGIC.len() as u64;
    loop {
        let mut header = [0u8; FRAME_HEADER];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        let mut payload = vec![0u8; len];
        match reader.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
        if crc32fast::hash(&payload) != crc {
            break;
        }
        let Ok(commit) = bincode::deserialize::<Commit>(&payload) else { break };
        if commits.last().is_some_and(|prev| commit.seq != prev.seq + 1) {
            break;
        }
        valid_end += (FRAME_HEADER + len) as u64;
        commits.push(commit);
    }
    Ok((commits, valid_end))
}

impl Wal {
    /// Open or create the log at `path` and recover its commits. A torn
    /// tail is cut off; a file that is not a commit log is an error.
    pub fn open(path: &Path) -> io::Result<(Self, Recovered)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let file_len = file.metadata()?.len();

        if file_len == 0 {
            file.write_all(&MAGIC)?;
            file.sync_data()?;
            let wal = Self {
                file,
                path: path.to_path_buf(),
                len: MAGIC.len() as u64,
                next_seq: 0,
            };
            return Ok((wal, Recovered::default()));
        }

        let mut reader = BufReader::new(&file);
        let mut magic = [0u8; 4];
        if reader.read_exact(&mut magic).is_err() || magic != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not an availbench commit log", path.display()),
            ));
        }
        let (commits, valid_end) = read_commits(&mut reader)?;
        drop(reader);

        let discarded_bytes = file_len - valid_end;
        if discarded_bytes > 0 {
            tracing::warn!(
                "{}: discarding {discarded_bytes} bytes after the last good commit",
                path.display()
            );
            file.set_len(valid_end)?;
            file.sync_data()?;
        }
        file.seek(SeekFrom::Start(valid_end))?;

        let next_seq = commits.last().map_or(0, |c| c.seq + 1);
        let recovered = Recovered {
            commits: commits.len() as u64,
            events: commits.into_iter().flat_map(|c| c.events).collect(),
            discarded_bytes,
        };
        let wal = Self {
            file,
            path: path.to_path_buf(),
            len: valid_end,
            next_seq,
        };
        Ok((wal, recovered))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `events` as one frame and fsync. On a failed write the file
    /// is cut back so the next commit starts on a frame boundary.
    pub fn commit(&mut self, events: &[StoreEvent]) -> io::Result<u64> {
        let seq = self.next_seq;
        let buf = frame(seq, events)?;
        let written = self
            .file
            .write_all(&buf)
            .and_then(|()| self.file.sync_data());
        if let Err(e) = written {
            self.file.set_len(self.len)?;
            self.file.seek(SeekFrom::Start(self.len))?;
            return Err(e);
        }
        self.len += buf.len() as u64;
        self.next_seq += 1;
        Ok(seq)
    }

    /// Replace the whole log with a single commit holding `events`: write a
    /// temp file, fsync, rename it over the log.
    pub fn rewrite(&mut self, events: &[StoreEvent]) -> io::Result<()> {
        let seq = self.next_seq;
        let buf = frame(seq, events)?;
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&MAGIC)?;
            tmp.write_all(&buf)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.len = (MAGIC.len() + buf.len()) as u64;
        self.file.seek(SeekFrom::Start(self.len))?;
        self.next_seq = seq + 1;
        Ok(())
    }
}
