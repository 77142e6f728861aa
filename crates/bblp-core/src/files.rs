//! FTPS side channel to the printer's storage.
//!
//! Implicit TLS on port 990, same account and access code as MQTT. The printer
//! answers PASV with an internal address that is not reachable from the
//! client, so data connections go to the control connection's host instead.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use suppaftp::types::FileType;
use suppaftp::{FtpError, NativeTlsConnector, NativeTlsFtpStream, Status};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::protocol::constants::{FTPS_PORT, USERNAME};

/// Names on the SD card that are printer-managed directories.
pub const HIDDEN_ENTRIES: [&str; 3] = ["cache", "ipcam", "timelapse"];

#[derive(Error, Debug)]
pub enum FileTransferError {
    #[error("FTP error: {0}")]
    Ftp(#[from] FtpError),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("File {0} already exists, not overwriting")]
    AlreadyExists(PathBuf),

    #[error("Failed to access {path}: {source}")]
    Local {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Not a file path: {0}")]
    InvalidPath(String),

    #[error("File transfer worker unavailable: {0}")]
    Worker(String),
}

/// Where passive-mode data connections are opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassiveAddress {
    /// Trust the address in the PASV reply.
    Advertised,
    /// Keep the advertised port but dial the control connection's host.
    ControlHost,
}

impl PassiveAddress {
    fn nat_workaround(self) -> bool {
        self == PassiveAddress::ControlHost
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    /// Zero when the server will not report a size (directories).
    pub size: usize,
}

/// An authenticated, protected FTPS session.
pub struct FileChannel {
    stream: NativeTlsFtpStream,
}

impl FileChannel {
    /// Connect, log in and switch data transfers to protected mode.
    #[instrument(level = "debug", skip(access_code))]
    pub fn connect(host: &str, access_code: &str) -> Result<Self, FileTransferError> {
        Self::connect_with(host, access_code, PassiveAddress::ControlHost)
    }

    pub fn connect_with(
        host: &str,
        access_code: &str,
        passive: PassiveAddress,
    ) -> Result<Self, FileTransferError> {
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| FileTransferError::Tls(e.to_string()))?;

        debug!(host = %host, port = FTPS_PORT, "Connecting FTPS");
        let mut stream = NativeTlsFtpStream::connect_secure_implicit(
            (host, FTPS_PORT),
            NativeTlsConnector::from(connector),
            host,
        )?;
        stream.set_passive_nat_workaround(passive.nat_workaround());

        debug!("Logging into FTPS");
        stream.login(USERNAME, access_code)?;

        debug!("Starting protected data session");
        stream.custom_command("PBSZ 0", &[Status::CommandOk])?;
        stream.custom_command("PROT P", &[Status::CommandOk])?;
        stream.transfer_type(FileType::Binary)?;

        info!(host = %host, "FTPS session ready");
        Ok(Self { stream })
    }

    /// List `dir` (or the current directory), skipping printer-managed entries.
    pub fn list(&mut self, dir: Option<&str>) -> Result<Vec<RemoteEntry>, FileTransferError> {
        if let Some(dir) = dir {
            debug!(dir = %dir, "Changing directory");
            self.stream.cwd(dir)?;
        }

        let names = self.stream.nlst(None)?;
        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            if is_hidden(&name) {
                continue;
            }
            let size = match self.stream.size(&name) {
                Ok(size) => size,
                Err(FtpError::UnexpectedResponse(resp)) => {
                    debug!(name = %name, status = ?resp.status, "No size reported");
                    0
                }
                Err(e) => return Err(e.into()),
            };
            entries.push(RemoteEntry { name, size });
        }
        Ok(entries)
    }

    pub fn remove(&mut self, remote: &str) -> Result<(), FileTransferError> {
        self.stream.rm(remote)?;
        info!(file = %remote, "Removed");
        Ok(())
    }

    /// Upload `local` under its file name. Returns bytes written.
    pub fn upload(&mut self, local: &Path) -> Result<u64, FileTransferError> {
        let remote = file_name(local)?;
        let mut file = File::open(local).map_err(|source| FileTransferError::Local {
            path: local.to_path_buf(),
            source,
        })?;
        let written = self.stream.put_file(&remote, &mut file)?;
        info!(file = %remote, bytes = written, "Uploaded");
        Ok(written)
    }

    /// Fetch `remote` into `dest_dir`, named after the remote file.
    ///
    /// Refuses to overwrite. A partially written file is removed when the
    /// server rejects the transfer.
    pub fn download(&mut self, remote: &str, dest_dir: &Path) -> Result<PathBuf, FileTransferError> {
        let local = dest_dir.join(file_name(Path::new(remote))?);
        if local.exists() {
            return Err(FileTransferError::AlreadyExists(local));
        }

        let mut file = File::create(&local).map_err(|source| FileTransferError::Local {
            path: local.clone(),
            source,
        })?;

        let result = self.stream.retr(remote, |reader| {
            io::copy(reader, &mut file).map_err(FtpError::ConnectionError)
        });

        match result {
            Ok(bytes) => {
                info!(file = %local.display(), bytes, "Fetched");
                Ok(local)
            }
            Err(e) => {
                drop(file);
                if let Err(rm) = std::fs::remove_file(&local) {
                    warn!(file = %local.display(), error = %rm, "Could not remove partial file");
                }
                Err(e.into())
            }
        }
    }

    pub fn quit(mut self) -> Result<(), FileTransferError> {
        self.stream.quit()?;
        Ok(())
    }
}

/// FTPS channel opened on first use and reused afterwards.
///
/// Owned by one consumer; not shared across threads.
pub struct LazyFileChannel {
    host: String,
    access_code: String,
    channel: Option<FileChannel>,
}

impl LazyFileChannel {
    pub fn new(host: &str, access_code: &str) -> Self {
        Self {
            host: host.to_string(),
            access_code: access_code.to_string(),
            channel: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// The open channel, connecting first if needed.
    pub fn channel(&mut self) -> Result<&mut FileChannel, FileTransferError> {
        let channel = match self.channel.take() {
            Some(channel) => channel,
            None => FileChannel::connect(&self.host, &self.access_code)?,
        };
        Ok(self.channel.insert(channel))
    }

    pub fn list(&mut self, dir: Option<&str>) -> Result<Vec<RemoteEntry>, FileTransferError> {
        self.channel()?.list(dir)
    }

    pub fn remove(&mut self, remote: &str) -> Result<(), FileTransferError> {
        self.channel()?.remove(remote)
    }

    pub fn upload(&mut self, local: &Path) -> Result<u64, FileTransferError> {
        self.channel()?.upload(local)
    }

    pub fn download(&mut self, remote: &str, dest_dir: &Path) -> Result<PathBuf, FileTransferError> {
        self.channel()?.download(remote, dest_dir)
    }

    /// Close the channel if it was ever opened.
    pub fn close(&mut self) -> Result<(), FileTransferError> {
        match self.channel.take() {
            Some(channel) => channel.quit(),
            None => Ok(()),
        }
    }
}

type FileJob = Box<dyn FnOnce(&mut LazyFileChannel) + Send>;

/// Thread that owns one [`LazyFileChannel`] and runs transfers on it in order.
///
/// The FTPS connection never leaves that thread; it is opened by the first
/// job that needs it and reused by every later one.
pub struct FileWorker {
    jobs: mpsc::Sender<FileJob>,
    handle: JoinHandle<()>,
}

impl FileWorker {
    pub fn spawn(host: &str, access_code: &str) -> Result<Self, FileTransferError> {
        let (jobs, queue) = mpsc::channel::<FileJob>();
        let host = host.to_string();
        let access_code = access_code.to_string();

        let handle = thread::Builder::new()
            .name("ftps".into())
            .spawn(move || {
                let mut files = LazyFileChannel::new(&host, &access_code);
                for job in queue {
                    job(&mut files);
                }
                if let Err(e) = files.close() {
                    debug!(error = %e, "FTPS quit failed");
                }
            })
            .map_err(|e| FileTransferError::Worker(e.to_string()))?;

        Ok(Self { jobs, handle })
    }

    /// Run `job` against the shared channel and wait for its result.
    pub fn run<R, F>(&self, job: F) -> Result<R, FileTransferError>
    where
        R: Send + 'static,
        F: FnOnce(&mut LazyFileChannel) -> Result<R, FileTransferError> + Send + 'static,
    {
        let (reply, result) = mpsc::channel();
        self.jobs
            .send(Box::new(move |files| {
                let _ = reply.send(job(files));
            }))
            .map_err(|_| FileTransferError::Worker("stopped".into()))?;

        result
            .recv()
            .map_err(|_| FileTransferError::Worker("job did not finish".into()))?
    }

    /// Close the channel and wait for the thread to exit.
    pub fn shutdown(self) {
        drop(self.jobs);
        if self.handle.join().is_err() {
            warn!("File transfer worker panicked");
        }
    }
}

pub fn is_hidden(name: &str) -> bool {
    HIDDEN_ENTRIES.contains(&name)
}

fn file_name(path: &Path) -> Result<String, FileTransferError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| FileTransferError::InvalidPath(path.display().to_string()))
}

/// Render a byte count as B, KiB or MiB.
pub fn format_size(bytes: usize) -> String {
    let mut size = bytes as f64;
    let mut units = "B";
    if size > 1024.0 {
        size /= 1024.0;
        units = "KiB";
    }
    if size > 1024.0 {
        size /= 1024.0;
        units = "MiB";
    }
    format!("{:4}{:<3}", size as u64, units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), " 512B  ");
        assert_eq!(format_size(4096), "   4KiB");
        assert_eq!(format_size(5 * 1024 * 1024), "   5MiB");
    }

    #[test]
    fn test_hidden_entries() {
        assert!(is_hidden("ipcam"));
        assert!(is_hidden("timelapse"));
        assert!(!is_hidden("benchy.3mf"));
    }

    #[test]
    fn test_passive_policy() {
        assert!(PassiveAddress::ControlHost.nat_workaround());
        assert!(!PassiveAddress::Advertised.nat_workaround());
    }

    #[test]
    fn test_lazy_channel_starts_closed() {
        let mut files = LazyFileChannel::new("192.168.1.50", "12345678");
        assert!(!files.is_connected());
        files.close().unwrap();
    }

    #[test]
    fn test_worker_reuses_one_channel() {
        let worker = FileWorker::spawn("192.168.1.50", "12345678").unwrap();
        let first = worker
            .run(|files| Ok(files as *const LazyFileChannel as usize))
            .unwrap();
        let second = worker
            .run(|files| Ok(files as *const LazyFileChannel as usize))
            .unwrap();
        assert_eq!(first, second);
        assert!(!worker.run(|files| Ok(files.is_connected())).unwrap());
        worker.shutdown();
    }

    #[test]
    fn test_worker_passes_errors_through() {
        let worker = FileWorker::spawn("192.168.1.50", "12345678").unwrap();
        let err = worker
            .run(|_| Err::<(), _>(FileTransferError::InvalidPath("/".into())))
            .unwrap_err();
        assert!(matches!(err, FileTransferError::InvalidPath(_)));

        // A panicking job takes the worker down; later jobs fail cleanly.
        let _ = worker.run(|_| -> Result<(), FileTransferError> { panic!("boom") });
        assert!(matches!(
            worker.run(|_| Ok(())),
            Err(FileTransferError::Worker(_))
        ));
        worker.shutdown();
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name(Path::new("/tmp/a/benchy.3mf")).unwrap(), "benchy.3mf");
        assert_eq!(file_name(Path::new("cache/x.gcode")).unwrap(), "x.gcode");
        assert!(file_name(Path::new("/")).is_err());
    }
}
