//! §4.3 Log Sink — per-job, per-stream append-only log files with a byte
//! cap, a truncation flag, and a small rolling tail buffer for previews.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::schema::LogPage;

/// Hard ceiling on a single log-read request, independent of the caller's
/// `limit` (spec §4.3: "capped at 1 MiB").
pub const MAX_READ_LIMIT: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn as_str(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }

    fn filename(self, job_id: &str) -> String {
        match self {
            Stream::Stdout => format!("{job_id}.stdout.log"),
            Stream::Stderr => format!("{job_id}.stderr.log"),
        }
    }

    pub fn parse(s: &str) -> Option<Stream> {
        match s {
            "stdout" => Some(Stream::Stdout),
            "stderr" => Some(Stream::Stderr),
            _ => None,
        }
    }
}

/// Overwrite-on-append ring buffer, pre-sized to its capacity so a long
/// run never reallocates or does a naive concatenate-then-slice.
struct TailRing {
    cap: usize,
    buf: std::collections::VecDeque<u8>,
}

impl TailRing {
    fn new(cap: usize) -> Self {
        TailRing {
            cap,
            buf: std::collections::VecDeque::with_capacity(cap),
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        if self.cap == 0 {
            return;
        }
        if chunk.len() >= self.cap {
            self.buf.clear();
            self.buf.extend(&chunk[chunk.len() - self.cap..]);
            return;
        }
        let overflow = (self.buf.len() + chunk.len()).saturating_sub(self.cap);
        for _ in 0..overflow.min(self.buf.len()) {
            self.buf.pop_front();
        }
        self.buf.extend(chunk);
    }

    fn decode(&self) -> String {
        let bytes: Vec<u8> = self.buf.iter().copied().collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// One stream's write-side state, owned by the Executor for the lifetime of
/// a running job.
pub struct StreamWriter {
    file: File,
    cap: u64,
    written: u64,
    truncated: bool,
    tail: TailRing,
}

impl StreamWriter {
    fn create(path: &Path, cap: u64, preview_max_bytes: u64) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(StreamWriter {
            file,
            cap,
            written: 0,
            truncated: false,
            tail: TailRing::new(preview_max_bytes as usize),
        })
    }

    /// Append `chunk`, applying the per-stream byte cap and feeding the
    /// rolling preview buffer. Steps follow spec §4.3 exactly.
    pub fn write_chunk(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.tail.push(chunk);

        if self.written >= self.cap {
            self.truncated = true;
            return Ok(());
        }
        let room = (self.cap - self.written) as usize;
        let to_write = chunk.len().min(room);
        if to_write < chunk.len() {
            self.truncated = true;
        }
        if to_write > 0 {
            self.file.write_all(&chunk[..to_write])?;
            self.written += to_write as u64;
        }
        Ok(())
    }

    pub fn size(&self) -> u64 {
        self.written
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Decode the rolling tail buffer to UTF-8 on terminal transition.
    pub fn finalize_preview(&mut self) -> String {
        let _ = self.file.flush();
        self.tail.decode()
    }
}

/// Read-side access to a job's log files (spec §4.3 random-access read).
pub struct LogSink {
    logs_dir: PathBuf,
}

impl LogSink {
    pub fn new(logs_dir: PathBuf) -> Self {
        LogSink { logs_dir }
    }

    pub fn path_for(&self, job_id: &str, stream: Stream) -> PathBuf {
        self.logs_dir.join(stream.filename(job_id))
    }

    /// Open write handles for a newly-admitted job. Creates `logs_dir` on
    /// demand.
    pub fn open_writers(
        &self,
        job_id: &str,
        cap: u64,
        preview_max_bytes: u64,
    ) -> std::io::Result<(StreamWriter, StreamWriter)> {
        std::fs::create_dir_all(&self.logs_dir)?;
        let stdout = StreamWriter::create(&self.path_for(job_id, Stream::Stdout), cap, preview_max_bytes)?;
        let stderr = StreamWriter::create(&self.path_for(job_id, Stream::Stderr), cap, preview_max_bytes)?;
        Ok((stdout, stderr))
    }

    /// Random-access read for `/jobs/:id/logs` (spec §4.3). Missing files
    /// (job still queued, or never wrote to this stream) yield an empty
    /// page rather than an error.
    pub fn read_range(
        &self,
        job_id: &str,
        stream: Stream,
        offset: u64,
        limit: u64,
    ) -> std::io::Result<LogPage> {
        let limit = limit.min(MAX_READ_LIMIT);
        let path = self.path_for(job_id, stream);

        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LogPage {
                    job_id: job_id.to_string(),
                    stream: stream.as_str().to_string(),
                    offset,
                    next_offset: offset,
                    total_size: 0,
                    truncated: false,
                    data: String::new(),
                });
            }
            Err(e) => return Err(e),
        };

        let total_size = file.metadata()?.len();
        if offset >= total_size {
            return Ok(LogPage {
                job_id: job_id.to_string(),
                stream: stream.as_str().to_string(),
                offset,
                next_offset: offset,
                total_size,
                truncated: false,
                data: String::new(),
            });
        }

        file.seek(SeekFrom::Start(offset))?;
        let want = limit.min(total_size - offset);
        let mut buf = vec![0u8; want as usize];
        file.read_exact(&mut buf)?;
        let data = String::from_utf8_lossy(&buf).into_owned();

        Ok(LogPage {
            job_id: job_id.to_string(),
            stream: stream.as_str().to_string(),
            offset,
            next_offset: offset + want,
            total_size,
            truncated: offset + want < total_size,
            data,
        })
    }
}
