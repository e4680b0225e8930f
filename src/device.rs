//! The `random` pseudo-file tree: a root directory holding one file whose
//! reads return generator output and whose writes feed the entropy pools.
//! Transports map their own requests onto these calls.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::entropy::queue::WriteQueue;
use crate::error::Error;
use crate::fortuna::{Fortuna, MAX_REQUEST};

const OWNER: &str = "rngd";
const DIR_BIT: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Root,
    Random,
}

impl Node {
    fn qid(self) -> u64 {
        match self {
            Node::Root => 0,
            Node::Random => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
}

impl OpenMode {
    fn readable(self) -> bool {
        matches!(self, OpenMode::Read | OpenMode::ReadWrite)
    }

    fn writable(self) -> bool {
        matches!(self, OpenMode::Write | OpenMode::ReadWrite)
    }
}

/// A client's handle on one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fid {
    node: Node,
    mode: Option<OpenMode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub name: &'static str,
    pub qid: u64,
    pub mode: u32,
    pub uid: &'static str,
    pub gid: &'static str,
    pub atime: u64,
}

impl Stat {
    pub fn is_dir(&self) -> bool {
        self.mode & DIR_BIT != 0
    }

    /// One directory-listing line: `name qid mode uid gid atime`.
    pub fn encode(&self) -> String {
        format!(
            "{} {} {:o} {} {} {}\n",
            self.name,
            self.qid,
            self.mode & !DIR_BIT,
            self.uid,
            self.gid,
            self.atime
        )
    }
}

fn stat_of(node: Node) -> Stat {
    let (name, mode) = match node {
        Node::Root => ("/", DIR_BIT | 0o777),
        Node::Random => ("random", 0o666),
    };
    Stat {
        name,
        qid: node.qid(),
        mode,
        uid: OWNER,
        gid: OWNER,
        atime: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    }
}

fn device_error(msg: &str) -> Error {
    Error::Device(msg.into())
}

pub struct Device {
    fortuna: Arc<Fortuna>,
    queue: Option<WriteQueue>,
}

impl Device {
    /// Without a queue, writes to `random` are refused.
    pub fn new(fortuna: Arc<Fortuna>, queue: Option<WriteQueue>) -> Self {
        Self { fortuna, queue }
    }

    pub fn attach(&self, aname: &str) -> Result<Fid, Error> {
        if !aname.is_empty() {
            return Err(device_error("invalid attach specifier"));
        }
        Ok(Fid {
            node: Node::Root,
            mode: None,
        })
    }

    pub fn walk(&self, fid: &mut Fid, name: &str) -> Result<Node, Error> {
        if fid.mode.is_some() {
            return Err(device_error("cannot walk an open fid"));
        }
        let next = match (fid.node, name) {
            (Node::Root, "..") => Node::Root,
            (Node::Root, "random") => Node::Random,
            (Node::Root, _) => return Err(device_error("file not found")),
            (Node::Random, _) => return Err(device_error("walk in non-directory")),
        };
        fid.node = next;
        Ok(next)
    }

    pub fn stat(&self, fid: &Fid) -> Stat {
        stat_of(fid.node)
    }

    pub fn open(&self, fid: &mut Fid, mode: OpenMode) -> Result<(), Error> {
        if self.stat(fid).is_dir() && mode != OpenMode::Read {
            return Err(device_error("permission denied"));
        }
        fid.mode = Some(mode);
        Ok(())
    }

    /// Reads from an open fid. On `random` the result is exactly `count`
    /// bytes or an error.
    pub fn read(&self, fid: &Fid, offset: u64, count: usize) -> Result<Vec<u8>, Error> {
        match fid.mode {
            Some(m) if m.readable() => {}
            _ => return Err(device_error("fid not open for reading")),
        }
        match fid.node {
            Node::Root => Ok(read_dir(offset, count)),
            Node::Random => self.fortuna.get_random_bytes(count),
        }
    }

    /// Queues `data` for mixing into the pools. The whole write is accepted
    /// or none of it.
    pub fn write(&self, fid: &Fid, data: &[u8]) -> Result<usize, Error> {
        match fid.mode {
            Some(m) if m.writable() => {}
            _ => return Err(device_error("fid not open for writing")),
        }
        if fid.node != Node::Random {
            return Err(device_error("permission denied"));
        }
        let queue = self.queue.as_ref().ok_or_else(|| device_error("not implemented"))?;
        if data.is_empty() {
            return Ok(0);
        }
        if data.len() > MAX_REQUEST {
            return Err(Error::RequestTooLarge(data.len()));
        }
        queue.push(data.to_vec())?;
        Ok(data.len())
    }
}

/// Directory entries whose encoding starts at or after `offset`, as many as
/// fit whole in `count` bytes.
fn read_dir(offset: u64, count: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pos = 0u64;
    for node in [Node::Random] {
        let entry = stat_of(node).encode();
        if offset <= pos {
            if entry.len() > count - out.len() {
                break;
            }
            out.extend_from_slice(entry.as_bytes());
        }
        pos += entry.len() as u64;
    }
    out
}
