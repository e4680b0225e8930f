use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use zeroize::Zeroizing;

use crate::error::Error;
use crate::fortuna::{Fortuna, POOL_COUNT};
use crate::mixer;

use super::SOURCE_WRITE;

/// Producer side of the write-entropy channel. Cloning is cheap; the worker
/// exits once every clone is dropped.
#[derive(Clone)]
pub struct WriteQueue {
    tx: SyncSender<Zeroizing<Vec<u8>>>,
}

impl WriteQueue {
    /// Starts the worker that hashes queued writes into the pools.
    /// `capacity` must be at least 1.
    pub fn start(fortuna: Arc<Fortuna>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::sync_channel::<Zeroizing<Vec<u8>>>(capacity.max(1));

        let worker = thread::spawn(move || {
            let mut pool = 0usize;
            for data in rx {
                let digest = Zeroizing::new(mixer::condition(&[("write", data.as_slice())]));
                match fortuna.add_entropy(SOURCE_WRITE, pool as u8, &digest[..]) {
                    Ok(()) => {
                        log::debug!(
                            target: "fortunad::queue",
                            "mixed {}B written entropy into pool {}", data.len(), pool,
                        );
                        pool = (pool + 1) % POOL_COUNT;
                    }
                    Err(Error::Closed) => break,
                    Err(e) => {
                        log::warn!(target: "fortunad::queue", "dropping written entropy: {}", e);
                    }
                }
            }
            log::debug!(target: "fortunad::queue", "write queue worker exiting");
        });

        (Self { tx }, worker)
    }

    /// Enqueues without blocking. A full queue rejects the data.
    pub fn push(&self, data: Vec<u8>) -> Result<(), Error> {
        match self.tx.try_send(Zeroizing::new(data)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(Error::Closed),
        }
    }
}
