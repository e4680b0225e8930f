//! Unix-socket transport for the `random` device.
//!
//! Request: `op: u8`, `len: u32` little-endian, then `len` payload bytes for
//! writes. `op` is `R` (read `len` random bytes), `W` (write the payload as
//! entropy) or `S` (stat the file). Response: `status: u8` (0 ok, 1 error),
//! `len: u32` little-endian, payload. Each connection gets its own thread and
//! its own fid on `random`.

use std::borrow::Cow;
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::device::{Device, Fid, OpenMode};
use crate::error::Error;
use crate::fortuna::MAX_REQUEST;

const OP_READ: u8 = b'R';
const OP_WRITE: u8 = b'W';
const OP_STAT: u8 = b'S';

const STATUS_OK: u8 = 0;
const STATUS_ERR: u8 = 1;

/// How often blocked accepts and reads look at the shutdown flag.
const POLL: Duration = Duration::from_millis(250);

/// Once a request has started, the rest of its frame must arrive within this
/// time or the connection is dropped.
const FRAME_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, PartialEq, Eq)]
pub enum Request {
    Read(usize),
    Write(Vec<u8>),
    Stat,
}

/// Reads the rest of a frame whose op byte has already been consumed.
fn read_frame<R: Read>(r: &mut R, op: u8) -> io::Result<Request> {
    let mut len = [0u8; 4];
    r.read_exact(&mut len)?;
    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_REQUEST {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            format!("request length {} exceeds {}", len, MAX_REQUEST),
        ));
    }

    match op {
        OP_READ => Ok(Request::Read(len)),
        OP_STAT => Ok(Request::Stat),
        OP_WRITE => {
            let mut payload = vec![0u8; len];
            r.read_exact(&mut payload)?;
            Ok(Request::Write(payload))
        }
        other => Err(io::Error::new(
            ErrorKind::InvalidData,
            format!("unknown op 0x{:02x}", other),
        )),
    }
}

pub fn write_response<W: Write>(w: &mut W, result: &Result<Vec<u8>, Error>) -> io::Result<()> {
    let (status, body): (u8, Cow<'_, [u8]>) = match result {
        Ok(bytes) => (STATUS_OK, Cow::Borrowed(bytes.as_slice())),
        Err(e) => (STATUS_ERR, Cow::Owned(e.to_string().into_bytes())),
    };
    w.write_all(&[status])?;
    w.write_all(&(body.len() as u32).to_le_bytes())?;
    w.write_all(&body)?;
    w.flush()
}

fn handle(device: &Device, fid: &Fid, request: Request) -> Result<Vec<u8>, Error> {
    match request {
        Request::Read(n) => device.read(fid, 0, n),
        Request::Write(data) => device
            .write(fid, &data)
            .map(|n| (n as u32).to_le_bytes().to_vec()),
        Request::Stat => Ok(device.stat(fid).encode().into_bytes()),
    }
}

fn open_random(device: &Device) -> Result<Fid, Error> {
    let mut fid = device.attach("")?;
    device.walk(&mut fid, "random")?;
    device.open(&mut fid, OpenMode::ReadWrite)?;
    Ok(fid)
}

fn serve_connection(stream: UnixStream, device: &Device, shutdown: &AtomicBool) -> Result<(), Error> {
    stream.set_read_timeout(Some(POLL))?;
    let fid = open_random(device)?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream.try_clone()?);

    while !shutdown.load(Ordering::Relaxed) {
        // Only the wait for a new request polls; a started frame is never
        // abandoned halfway.
        let mut op = [0u8; 1];
        match reader.read(&mut op) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) => return Err(e.into()),
        }

        stream.set_read_timeout(Some(FRAME_TIMEOUT))?;
        let request = read_frame(&mut reader, op[0]);
        stream.set_read_timeout(Some(POLL))?;

        let result = handle(device, &fid, request?);
        if let Err(ref e) = result {
            log::debug!(target: "fortunad::server", "request failed: {}", e);
        }
        write_response(&mut writer, &result)?;
    }
    Ok(())
}

fn spawn_connection(
    stream: UnixStream,
    device: &Arc<Device>,
    shutdown: &Arc<AtomicBool>,
) -> Result<JoinHandle<()>, Error> {
    stream.set_nonblocking(false)?;
    let device = Arc::clone(device);
    let shutdown = Arc::clone(shutdown);
    Ok(thread::spawn(move || {
        if let Err(e) = serve_connection(stream, &device, &shutdown) {
            log::warn!(target: "fortunad::server", "connection closed: {}", e);
        }
    }))
}

/// Binds `path`, replacing a stale socket, and makes it world read/write
/// like the file it serves.
pub fn bind(path: &Path) -> Result<UnixListener, Error> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let listener = UnixListener::bind(path).map_err(|e| {
        Error::Io(io::Error::new(
            e.kind(),
            format!("cannot bind {}: {}", path.display(), e),
        ))
    })?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666))?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Accepts connections until `shutdown` is set, then waits for every
/// connection thread to finish.
pub fn serve(listener: UnixListener, device: Arc<Device>, shutdown: Arc<AtomicBool>) -> Result<(), Error> {
    let mut workers: Vec<JoinHandle<()>> = Vec::new();

    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _)) => match spawn_connection(stream, &device, &shutdown) {
                Ok(worker) => workers.push(worker),
                Err(e) => log::warn!(target: "fortunad::server", "dropping connection: {}", e),
            },
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL / 5),
            Err(e) => {
                log::error!(target: "fortunad::server", "accept failed: {}", e);
                thread::sleep(POLL / 5);
            }
        }
        workers.retain(|w| !w.is_finished());
    }

    for w in workers {
        let _ = w.join();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::{self, queue::WriteQueue};
    use crate::fortuna::{Fortuna, MonotonicClock};
    use std::io::Cursor;

    fn frame(op: u8, len: u32, payload: &[u8]) -> Vec<u8> {
        let mut v = vec![op];
        v.extend_from_slice(&len.to_le_bytes());
        v.extend_from_slice(payload);
        v
    }

    fn read_request<R: Read>(r: &mut R) -> io::Result<Option<Request>> {
        let mut op = [0u8; 1];
        if r.read(&mut op)? == 0 {
            return Ok(None);
        }
        read_frame(r, op[0]).map(Some)
    }

    fn read_response<R: Read>(r: &mut R) -> (u8, Vec<u8>) {
        let mut head = [0u8; 5];
        r.read_exact(&mut head).unwrap();
        let len = u32::from_le_bytes([head[1], head[2], head[3], head[4]]) as usize;
        let mut body = vec![0u8; len];
        r.read_exact(&mut body).unwrap();
        (head[0], body)
    }

    #[test]
    fn test_parse_requests() {
        let mut input = frame(OP_READ, 32, &[]);
        input.extend(frame(OP_WRITE, 3, b"abc"));
        input.extend(frame(OP_STAT, 0, &[]));
        let mut r = Cursor::new(input);

        assert_eq!(read_request(&mut r).unwrap(), Some(Request::Read(32)));
        assert_eq!(
            read_request(&mut r).unwrap(),
            Some(Request::Write(b"abc".to_vec()))
        );
        assert_eq!(read_request(&mut r).unwrap(), Some(Request::Stat));
        assert_eq!(read_request(&mut r).unwrap(), None);
    }

    #[test]
    fn test_reject_bad_requests() {
        let mut r = Cursor::new(frame(b'X', 0, &[]));
        assert!(read_request(&mut r).is_err());

        let mut r = Cursor::new(frame(OP_READ, MAX_REQUEST as u32 + 1, &[]));
        assert!(read_request(&mut r).is_err());

        // Truncated write payload.
        let mut r = Cursor::new(frame(OP_WRITE, 10, b"abc"));
        assert!(read_request(&mut r).is_err());
    }

    #[test]
    fn test_response_encoding() {
        let mut out = Vec::new();
        write_response(&mut out, &Ok(vec![1, 2, 3])).unwrap();
        assert_eq!(out, vec![STATUS_OK, 3, 0, 0, 0, 1, 2, 3]);

        let mut out = Vec::new();
        write_response(&mut out, &Err(Error::NotSeeded)).unwrap();
        let (status, body) = read_response(&mut Cursor::new(out));
        assert_eq!(status, STATUS_ERR);
        assert_eq!(body, b"generator not yet seeded");
    }

    struct TestServer {
        path: std::path::PathBuf,
        shutdown: Arc<AtomicBool>,
        handle: Option<JoinHandle<Result<(), Error>>>,
    }

    impl TestServer {
        fn start(name: &str) -> Self {
            let path = std::env::temp_dir()
                .join(format!("fortunad-test-{}-{}.sock", name, std::process::id()));
            let f = Arc::new(Fortuna::new(MonotonicClock));
            entropy::seed(&f).unwrap();
            let (queue, _worker) = WriteQueue::start(Arc::clone(&f), 4);
            let device = Arc::new(Device::new(f, Some(queue)));
            let shutdown = Arc::new(AtomicBool::new(false));

            let listener = bind(&path).unwrap();
            let handle = {
                let shutdown = Arc::clone(&shutdown);
                thread::spawn(move || serve(listener, device, shutdown))
            };
            Self {
                path,
                shutdown,
                handle: Some(handle),
            }
        }

        fn connect(&self) -> UnixStream {
            let client = UnixStream::connect(&self.path).unwrap();
            client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            client
        }

        fn stop(mut self) {
            self.shutdown.store(true, Ordering::Relaxed);
            if let Some(h) = self.handle.take() {
                h.join().unwrap().unwrap();
            }
            let _ = std::fs::remove_file(&self.path);
        }
    }

    #[test]
    fn test_socket_round_trip() {
        let server = TestServer::start("round-trip");
        let mut client = server.connect();
        client.write_all(&frame(OP_READ, 100, &[])).unwrap();
        let (status, body) = read_response(&mut client);
        assert_eq!(status, STATUS_OK);
        assert_eq!(body.len(), 100);

        client.write_all(&frame(OP_WRITE, 5, b"hello")).unwrap();
        let (status, body) = read_response(&mut client);
        assert_eq!(status, STATUS_OK);
        assert_eq!(body, 5u32.to_le_bytes());

        client.write_all(&frame(OP_STAT, 0, &[])).unwrap();
        let (status, body) = read_response(&mut client);
        assert_eq!(status, STATUS_OK);
        assert!(String::from_utf8(body).unwrap().starts_with("random 1 666"));

        client.write_all(&frame(OP_READ, MAX_REQUEST as u32, &[])).unwrap();
        let (status, body) = read_response(&mut client);
        assert_eq!(status, STATUS_OK);
        assert_eq!(body.len(), MAX_REQUEST);

        drop(client);
        server.stop();
    }

    #[test]
    fn test_frame_split_across_poll_interval() {
        let server = TestServer::start("split");
        let mut client = server.connect();

        // The length arrives well after the connection's poll timeout.
        client.write_all(&[OP_READ]).unwrap();
        thread::sleep(POLL + Duration::from_millis(150));
        client.write_all(&100u32.to_le_bytes()).unwrap();
        let (status, body) = read_response(&mut client);
        assert_eq!(status, STATUS_OK);
        assert_eq!(body.len(), 100);

        // The stream is still in step for the next request.
        let mut write = frame(OP_WRITE, 6, b"");
        client.write_all(&write[..3]).unwrap();
        thread::sleep(POLL + Duration::from_millis(150));
        write.extend_from_slice(b"abcdef");
        client.write_all(&write[3..]).unwrap();
        let (status, body) = read_response(&mut client);
        assert_eq!(status, STATUS_OK);
        assert_eq!(body, 6u32.to_le_bytes());

        drop(client);
        server.stop();
    }

    #[test]
    fn test_truncated_client_does_not_stop_server() {
        let server = TestServer::start("truncated");

        let mut broken = server.connect();
        broken.write_all(&[OP_WRITE, 10, 0]).unwrap();
        drop(broken);

        let mut client = server.connect();
        client.write_all(&frame(OP_READ, 16, &[])).unwrap();
        let (status, body) = read_response(&mut client);
        assert_eq!(status, STATUS_OK);
        assert_eq!(body.len(), 16);

        drop(client);
        server.stop();
    }
}
