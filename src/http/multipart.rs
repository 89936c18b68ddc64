//! Streaming multipart/form-data parsing.
//!
//! # Responsibilities
//! - Frame a multipart body incrementally as chunks arrive
//! - Accumulate field parts in memory, stream file parts to temp files
//! - Enforce the per-file size ceiling and abort the whole parse on
//!   the first violation
//! - Schedule best-effort deferred deletion of temp files
//!
//! # Design Decisions
//! - Each file part is written by its own tokio task fed over a
//!   channel, so disk flushes overlap parsing of later parts
//! - Temp names are 16 random bytes, hex encoded; collisions are
//!   avoided by randomness, not by locking
//! - On the first failure every sibling writer is cancelled and every
//!   temp file created so far is removed
//! - The scan keeps a small tail of unconsumed bytes between chunks
//!   so a boundary split across chunk borders is still found

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use rand::RngCore;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::pipeline::error::EngineError;

/// Options governing file uploads.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Per-file size ceiling in bytes.
    pub limit: u64,
    /// Directory temp files are written into. Created on demand.
    pub temp_dir: PathBuf,
    /// Whether temp files are deleted after `remove_delay`.
    pub remove_temp_files: bool,
    /// Delay before deferred deletion.
    pub remove_delay: Duration,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            limit: u64::MAX,
            temp_dir: PathBuf::from("tmp"),
            remove_temp_files: false,
            remove_delay: Duration::from_secs(10 * 60),
        }
    }
}

/// Size of an uploaded file in several units.
#[derive(Debug, Clone, PartialEq)]
pub struct FileSizes {
    pub bytes: u64,
    pub kb: f64,
    pub mb: f64,
    pub gb: f64,
}

impl FileSizes {
    fn from_bytes(bytes: u64) -> Self {
        let kb = bytes as f64 / 1024.0;
        Self {
            bytes,
            kb,
            mb: kb / 1024.0,
            gb: kb / 1024.0 / 1024.0,
        }
    }
}

/// Metadata for one fully written file part.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Original filename as sent by the client.
    pub name: String,
    /// Declared content type of the part.
    pub mimetype: String,
    /// Extension derived from the content type.
    pub extension: String,
    /// Full path of the temp file.
    pub temp_path: PathBuf,
    /// Random temp file name.
    pub temp_name: String,
    pub size: u64,
    pub sizes: FileSizes,
}

impl UploadedFile {
    /// Remove the temp file now.
    pub async fn remove(&self) -> std::io::Result<()> {
        tokio::fs::remove_file(&self.temp_path).await
    }
}

/// Everything a multipart body decodes into.
#[derive(Debug, Default)]
pub struct MultipartPayload {
    pub fields: HashMap<String, String>,
    pub files: HashMap<String, Vec<UploadedFile>>,
}

/// Extract the boundary token from a `Content-Type` header value.
pub fn boundary(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("boundary="))
        .map(|token| token.trim_matches('"').to_string())
        .filter(|token| !token.is_empty())
}

enum PartSink {
    /// Bytes before the first boundary. Discarded.
    Preamble,
    Field { name: String, data: Vec<u8> },
    File { writer: usize },
}

enum ScanState {
    /// Inside part data (or the preamble), scanning for the delimiter.
    Data(PartSink),
    /// After a boundary line, reading the part header block.
    Headers,
    /// After the terminal boundary.
    Done,
}

struct ActiveWriter {
    tx: Option<mpsc::Sender<Bytes>>,
    handle: JoinHandle<Result<(String, UploadedFile), ()>>,
}

/// Incremental multipart parser.
///
/// Feed it chunks as they arrive, then call [`finish`](Self::finish)
/// once the stream ends.
pub struct MultipartParser {
    options: UploadOptions,
    /// Delimiter including the leading CRLF: `\r\n--{boundary}`.
    delimiter: Vec<u8>,
    buf: BytesMut,
    state: ScanState,
    fields: HashMap<String, String>,
    writers: Vec<ActiveWriter>,
    temp_paths: Vec<PathBuf>,
    failure: Arc<Mutex<Option<EngineError>>>,
    aborted: bool,
}

impl MultipartParser {
    pub fn new(boundary: &str, options: UploadOptions) -> Self {
        let mut delimiter = Vec::with_capacity(boundary.len() + 4);
        delimiter.extend_from_slice(b"\r\n--");
        delimiter.extend_from_slice(boundary.as_bytes());

        // Seed the buffer with a CRLF so the first boundary line is
        // found by the same delimiter scan as every later one.
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"\r\n");

        Self {
            options,
            delimiter,
            buf,
            state: ScanState::Data(PartSink::Preamble),
            fields: HashMap::new(),
            writers: Vec::new(),
            temp_paths: Vec::new(),
            failure: Arc::new(Mutex::new(None)),
            aborted: false,
        }
    }

    /// Feed one chunk of the body.
    ///
    /// Returns an error as soon as any writer has failed, which also
    /// cancels the siblings and removes every temp file.
    pub async fn feed(&mut self, chunk: &[u8]) -> Result<(), EngineError> {
        if self.aborted {
            return Err(EngineError::Multipart(
                "The multipart stream was already aborted.".to_string(),
            ));
        }

        if let Some(err) = self.take_failure() {
            self.abort().await;
            return Err(err);
        }

        self.buf.extend_from_slice(chunk);

        if let Err(err) = self.process().await {
            self.abort().await;
            return Err(err);
        }

        Ok(())
    }

    /// Consume the parser after the last chunk.
    ///
    /// Resolves once every file writer has completed, or rejects on
    /// the first failure.
    pub async fn finish(mut self) -> Result<MultipartPayload, EngineError> {
        let completed = matches!(self.state, ScanState::Done) && !self.aborted;

        // Close any still-open channel so writers see end of input.
        for writer in &mut self.writers {
            writer.tx = None;
        }

        if !completed {
            self.abort().await;
            return Err(EngineError::Multipart(
                "Unexpected end of multipart stream.".to_string(),
            ));
        }

        let mut files: HashMap<String, Vec<UploadedFile>> = HashMap::new();
        let mut failed = false;

        for writer in &mut self.writers {
            match (&mut writer.handle).await {
                Ok(Ok((field, file))) => files.entry(field).or_default().push(file),
                _ => failed = true,
            }
        }

        if failed {
            let err = self
                .take_failure()
                .unwrap_or_else(|| EngineError::Multipart("File upload failed.".to_string()));
            // Writers are already joined here; only the temp files remain.
            for path in &self.temp_paths {
                let _ = tokio::fs::remove_file(path).await;
            }
            return Err(err);
        }

        if self.options.remove_temp_files {
            for paths in files.values() {
                for file in paths {
                    schedule_removal(file.temp_path.clone(), self.options.remove_delay);
                }
            }
        }

        Ok(MultipartPayload {
            fields: std::mem::take(&mut self.fields),
            files,
        })
    }

    fn take_failure(&self) -> Option<EngineError> {
        match self.failure.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        }
    }

    /// Cancel every writer and remove every temp file created so far.
    /// Idempotent; a second call finds nothing left to clean.
    async fn abort(&mut self) {
        self.aborted = true;
        for mut writer in std::mem::take(&mut self.writers) {
            writer.tx = None;
            writer.handle.abort();
            let _ = writer.handle.await;
        }
        for path in std::mem::take(&mut self.temp_paths) {
            let _ = tokio::fs::remove_file(&path).await;
        }
    }

    async fn process(&mut self) -> Result<(), EngineError> {
        loop {
            if matches!(self.state, ScanState::Done) {
                self.buf.clear();
                return Ok(());
            }

            if matches!(self.state, ScanState::Headers) {
                match find(&self.buf, b"\r\n\r\n") {
                    None => {
                        if self.buf.len() > 16 * 1024 {
                            return Err(EngineError::Multipart(
                                "Multipart part headers are too large.".to_string(),
                            ));
                        }
                        return Ok(());
                    }
                    Some(end) => {
                        let block = self.buf.split_to(end + 4);
                        let headers = parse_part_headers(&block[..end]);
                        self.state = self.open_part(headers).await?;
                    }
                }
                continue;
            }

            if !self.scan_data().await? {
                return Ok(());
            }
        }
    }

    /// Scan for the next delimiter inside part data. Returns `true`
    /// when the state changed and the loop should continue.
    async fn scan_data(&mut self) -> Result<bool, EngineError> {
        match find(&self.buf, &self.delimiter) {
            Some(at) => {
                let after = at + self.delimiter.len();
                if self.buf.len() < after + 2 {
                    // Delimiter found but the 2 lookahead bytes are
                    // not here yet. Flush what precedes it and wait.
                    let data = self.buf.split_to(at).freeze();
                    self.emit(data).await?;
                    return Ok(false);
                }

                let data = self.buf.split_to(at).freeze();
                self.emit(data).await?;

                let tail = [self.buf[self.delimiter.len()], self.buf[self.delimiter.len() + 1]];
                match &tail {
                    b"--" => {
                        self.buf.advance(self.delimiter.len() + 2);
                        self.close_part();
                        self.state = ScanState::Done;
                    }
                    b"\r\n" => {
                        self.buf.advance(self.delimiter.len() + 2);
                        self.close_part();
                        self.state = ScanState::Headers;
                    }
                    _ => {
                        // The boundary token is a prefix of this data;
                        // emit one byte and realign.
                        let byte = self.buf.split_to(1).freeze();
                        self.emit(byte).await?;
                        return Ok(true);
                    }
                }
                Ok(true)
            }
            None => {
                // Keep a tail large enough to hold a partial
                // delimiter plus the lookahead.
                let keep = self.delimiter.len() + 3;
                if self.buf.len() > keep {
                    let flush = self.buf.len() - keep;
                    let data = self.buf.split_to(flush).freeze();
                    self.emit(data).await?;
                }
                Ok(false)
            }
        }
    }

    async fn emit(&mut self, data: Bytes) -> Result<(), EngineError> {
        if data.is_empty() {
            return Ok(());
        }

        let writer_index = match &mut self.state {
            ScanState::Data(PartSink::Preamble) => return Ok(()),
            ScanState::Data(PartSink::Field { data: collected, .. }) => {
                collected.extend_from_slice(&data);
                return Ok(());
            }
            ScanState::Data(PartSink::File { writer }) => *writer,
            _ => return Ok(()),
        };

        let Some(tx) = self.writers[writer_index].tx.clone() else {
            return Ok(());
        };

        if tx.send(data).await.is_err() {
            // The writer hung up: it failed.
            return Err(self.take_failure().unwrap_or_else(|| {
                EngineError::Multipart("File upload failed.".to_string())
            }));
        }

        Ok(())
    }

    fn close_part(&mut self) {
        let state = std::mem::replace(&mut self.state, ScanState::Headers);
        match state {
            ScanState::Data(PartSink::Field { name, data }) => {
                let value = String::from_utf8_lossy(&data).into_owned();
                // First value wins for repeated field names.
                self.fields.entry(name).or_insert(value);
            }
            ScanState::Data(PartSink::File { writer }) => {
                // Dropping the sender lets the writer task finish the
                // file while the scan moves on to the next part.
                self.writers[writer].tx = None;
            }
            _ => {}
        }
    }

    async fn open_part(&mut self, headers: PartHeaders) -> Result<ScanState, EngineError> {
        let name = headers.name.unwrap_or_default();

        match headers.filename {
            None => Ok(ScanState::Data(PartSink::Field {
                name,
                data: Vec::new(),
            })),
            Some(filename) => {
                let mimetype = headers
                    .content_type
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let index = self.spawn_writer(name, filename, mimetype).await?;
                Ok(ScanState::Data(PartSink::File { writer: index }))
            }
        }
    }

    async fn spawn_writer(
        &mut self,
        field: String,
        filename: String,
        mimetype: String,
    ) -> Result<usize, EngineError> {
        let _ = tokio::fs::create_dir_all(&self.options.temp_dir).await;

        let temp_name = random_temp_name();
        let temp_path = self.options.temp_dir.join(&temp_name);
        self.temp_paths.push(temp_path.clone());

        let (tx, rx) = mpsc::channel::<Bytes>(16);
        let limit = self.options.limit;
        let failure = Arc::clone(&self.failure);

        let handle = tokio::spawn(write_part(
            temp_path,
            temp_name,
            field,
            filename,
            mimetype,
            rx,
            limit,
            failure,
        ));

        self.writers.push(ActiveWriter {
            tx: Some(tx),
            handle,
        });
        Ok(self.writers.len() - 1)
    }
}

/// Parse the full multipart body of a request.
pub async fn parse_body<B>(
    body: B,
    content_type: &str,
    options: &UploadOptions,
) -> Result<MultipartPayload, EngineError>
where
    B: hyper::body::Body,
    B::Data: Buf,
    B::Error: std::fmt::Display,
{
    let boundary = boundary(content_type).ok_or_else(|| {
        EngineError::Multipart("The multipart boundary is missing from the content type.".to_string())
    })?;

    let mut parser = MultipartParser::new(&boundary, options.clone());

    let mut body = std::pin::pin!(body);
    while let Some(frame) = futures_util::future::poll_fn(|cx| body.as_mut().poll_frame(cx)).await {
        match frame {
            Ok(frame) => {
                if let Ok(mut data) = frame.into_data() {
                    let bytes = data.copy_to_bytes(data.remaining());
                    parser.feed(&bytes).await?;
                }
            }
            Err(err) => {
                parser.abort().await;
                return Err(EngineError::Stream(format!(
                    "Failed to read request body: {}",
                    err
                )));
            }
        }
    }

    parser.finish().await
}

struct PartHeaders {
    name: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
}

fn parse_part_headers(block: &[u8]) -> PartHeaders {
    let mut headers = PartHeaders {
        name: None,
        filename: None,
        content_type: None,
    };

    for line in String::from_utf8_lossy(block).split("\r\n") {
        let Some((header, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        if header.eq_ignore_ascii_case("content-disposition") {
            headers.name = disposition_param(value, "name");
            headers.filename = disposition_param(value, "filename");
        } else if header.eq_ignore_ascii_case("content-type") {
            headers.content_type = Some(value.to_string());
        }
    }

    headers
}

fn disposition_param(value: &str, param: &str) -> Option<String> {
    value.split(';').map(str::trim).find_map(|part| {
        let (key, raw) = part.split_once('=')?;
        if key.trim() != param {
            return None;
        }
        Some(raw.trim().trim_matches('"').to_string())
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn random_temp_name() -> String {
    let mut raw = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut raw);
    raw.iter().map(|byte| format!("{:02x}", byte)).collect()
}

/// Extension for a mime type, favoring the conventional short forms.
fn extension_for(mimetype: &str) -> String {
    match mimetype {
        "text/plain" => "txt".to_string(),
        "image/jpeg" => "jpg".to_string(),
        "image/svg+xml" => "svg".to_string(),
        "application/octet-stream" => "bin".to_string(),
        other => {
            let subtype = other.split('/').nth(1).unwrap_or("bin");
            subtype.split('+').next().unwrap_or("bin").to_string()
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn write_part(
    temp_path: PathBuf,
    temp_name: String,
    field: String,
    filename: String,
    mimetype: String,
    mut rx: mpsc::Receiver<Bytes>,
    limit: u64,
    failure: Arc<Mutex<Option<EngineError>>>,
) -> Result<(String, UploadedFile), ()> {
    match stream_to_file(&temp_path, &mut rx, limit, &field).await {
        Ok(size) => {
            let file = UploadedFile {
                name: filename,
                extension: extension_for(&mimetype),
                mimetype,
                temp_path,
                temp_name,
                size,
                sizes: FileSizes::from_bytes(size),
            };
            Ok((field, file))
        }
        Err(err) => {
            let _ = tokio::fs::remove_file(&temp_path).await;
            if let Ok(mut slot) = failure.lock() {
                slot.get_or_insert(err);
            }
            Err(())
        }
    }
}

async fn stream_to_file(
    path: &Path,
    rx: &mut mpsc::Receiver<Bytes>,
    limit: u64,
    field: &str,
) -> Result<u64, EngineError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|err| EngineError::Stream(format!("Failed to create temp file: {}", err)))?;

    let mut written: u64 = 0;

    while let Some(chunk) = rx.recv().await {
        written += chunk.len() as u64;
        if written > limit {
            return Err(EngineError::UploadTooLarge {
                field: field.to_string(),
                limit,
            });
        }
        file.write_all(&chunk)
            .await
            .map_err(|err| EngineError::Stream(format!("Failed to write temp file: {}", err)))?;
    }

    file.flush()
        .await
        .map_err(|err| EngineError::Stream(format!("Failed to flush temp file: {}", err)))?;

    Ok(written)
}

fn schedule_removal(path: PathBuf, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(err) = tokio::fs::remove_file(&path).await {
            tracing::debug!(path = %path.display(), error = %err, "deferred temp removal failed");
        }
    });
}
