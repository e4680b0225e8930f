use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::Error;

/// Devices tried in order; /dev/random stands in when no hardware RNG is
/// exposed.
const DEVICES: [&str; 2] = ["/dev/hwrng", "/dev/random"];

/// Bytes taken per sample.
const SAMPLE_LEN: usize = 4;

/// Reads up to four bytes from the first readable random device.
pub fn sample(buf: &mut [u8]) -> Result<usize, Error> {
    let mut last = None;
    for dev in DEVICES {
        match read_device(Path::new(dev), buf) {
            Ok(n) => return Ok(n),
            Err(e) => last = Some(e),
        }
    }
    Err(last.unwrap_or_else(|| Error::NoEntropy("no random device".into())))
}

fn read_device(path: &Path, buf: &mut [u8]) -> Result<usize, Error> {
    let mut f = File::open(path).map_err(|e| {
        Error::NoEntropy(format!("{} not available: {}", path.display(), e))
    })?;
    let want = buf.len().min(SAMPLE_LEN);
    let n = f.read(&mut buf[..want])?;
    Ok(n)
}
