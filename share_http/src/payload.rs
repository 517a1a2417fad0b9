use crate::error::ServeError;
use crate::header;
use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

/// The one response every client gets: preamble + file.
///
/// Built once before the loop starts and never mutated afterwards.
#[derive(Debug)]
pub struct Payload {
    header: Vec<u8>,
    file: File,
    file_len: u64,
    mimetype: String,
    path: PathBuf,
}

impl Payload {
    /// Open `path`, stat it and synthesise the preamble.
    pub fn open(path: &Path, mimetype: &str) -> Result<Self, ServeError> {
        let file = File::open(path).map_err(|source| ServeError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let file_len = file
            .metadata()
            .map_err(|source| ServeError::Stat {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        Ok(Payload {
            header: header::build(mimetype, file_len),
            file,
            file_len,
            mimetype: mimetype.to_string(),
            path: path.to_path_buf(),
        })
    }

    pub fn header(&self) -> &[u8] {
        &self.header
    }

    pub fn header_len(&self) -> u64 {
        self.header.len() as u64
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Header plus body: what each client must receive.
    pub fn total_len(&self) -> u64 {
        self.header_len() + self.file_len
    }

    pub fn mimetype(&self) -> &str {
        &self.mimetype
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy header then file into `dst`, which must be exactly `total_len` long.
    pub(crate) fn read_into(&self, dst: &mut [u8]) -> Result<(), ServeError> {
        debug_assert_eq!(dst.len() as u64, self.total_len());
        let read_err = |source: io::Error| ServeError::Read {
            path: self.path.clone(),
            source,
        };
        let (head, body) = dst.split_at_mut(self.header.len());
        head.copy_from_slice(&self.header);
        // Positional reads leave the shared file offset alone.
        self.file.read_exact_at(body, 0).map_err(read_err)?;

        // The preamble was built from the stat size; refuse a file that grew.
        let mut probe = [0u8; 1];
        if self.file.read_at(&mut probe, self.file_len).map_err(read_err)? != 0 {
            return Err(read_err(io::Error::new(
                io::ErrorKind::InvalidData,
                "file grew after it was measured",
            )));
        }
        Ok(())
    }

    /// Ask the kernel to pull the file into the page cache (best effort).
    pub fn warm_cache(&self) {
        let len = self.file_len.min(libc::off_t::MAX as u64) as libc::off_t;
        let rc = unsafe { libc::posix_fadvise(self.file.as_raw_fd(), 0, len, libc::POSIX_FADV_WILLNEED) };
        if rc != 0 {
            tracing::debug!(errno = rc, "posix_fadvise(WILLNEED) failed; continuing cold");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_file(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn open_builds_header_and_lengths() {
        let file = temp_file(b"hello\n");
        let payload = Payload::open(file.path(), "text/plain").unwrap();
        assert_eq!(payload.file_len(), 6);
        assert_eq!(payload.header(), b"HTTP/1.0 200 OK\nContent-Type: text/plain\nContent-Length: 6\n\n");
        assert_eq!(payload.total_len(), payload.header_len() + 6);
        assert_eq!(payload.mimetype(), "text/plain");
    }

    #[test]
    fn read_into_lays_out_header_then_body() {
        let body: Vec<u8> = (0..10_000).map(|i| (i % 251) as u8).collect();
        let file = temp_file(&body);
        let payload = Payload::open(file.path(), "application/octet-stream").unwrap();
        let mut buf = vec![0u8; payload.total_len() as usize];
        payload.read_into(&mut buf).unwrap();
        assert_eq!(&buf[..payload.header().len()], payload.header());
        assert_eq!(&buf[payload.header().len()..], &body[..]);
    }

    #[test]
    fn read_into_refuses_a_file_that_grew() {
        let mut file = temp_file(b"hello\n");
        let payload = Payload::open(file.path(), "text/plain").unwrap();
        file.write_all(b"and more\n").unwrap();
        file.flush().unwrap();

        let mut buf = vec![0u8; payload.total_len() as usize];
        let err = payload.read_into(&mut buf).unwrap_err();
        assert!(matches!(err, ServeError::Read { .. }), "{err:?}");
    }

    #[test]
    fn read_into_refuses_a_file_that_shrank() {
        let file = temp_file(b"hello\n");
        let payload = Payload::open(file.path(), "text/plain").unwrap();
        file.as_file().set_len(2).unwrap();

        let mut buf = vec![0u8; payload.total_len() as usize];
        let err = payload.read_into(&mut buf).unwrap_err();
        assert!(matches!(err, ServeError::Read { .. }), "{err:?}");
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let err = Payload::open(Path::new("/nonexistent/share/payload"), "text/plain").unwrap_err();
        assert!(matches!(err, ServeError::Open { .. }));
    }
}
