use std::fs;

use crate::error::Error;

/// Reads the total context-switch count from /proc/stat.
pub fn context_switches() -> Result<u64, Error> {
    let stat = fs::read_to_string("/proc/stat")?;
    parse_ctxt(&stat).ok_or_else(|| Error::NoEntropy("no ctxt line in /proc/stat".into()))
}

fn parse_ctxt(stat: &str) -> Option<u64> {
    stat.lines()
        .find_map(|line| line.strip_prefix("ctxt "))
        .and_then(|v| v.trim().parse().ok())
}

/// Writes the low 32 bits of the context-switch counter, the part that
/// actually moves between samples.
pub fn sample(buf: &mut [u8]) -> Result<usize, Error> {
    let ctxt = context_switches()? as u32;
    let bytes = ctxt.to_le_bytes();
    let n = buf.len().min(bytes.len());
    buf[..n].copy_from_slice(&bytes[..n]);
    Ok(n)
}
