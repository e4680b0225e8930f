use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::device::Device;
use crate::entropy::{self, queue::WriteQueue};
use crate::error::Error;
use crate::fortuna::{Fortuna, MonotonicClock};
use crate::server;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

fn install_signal_handlers() {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = signal_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());
        libc::sigaction(libc::SIGINT, &sa, std::ptr::null_mut());
    }
}

/// Seeds a generator, starts the entropy sources and write queue, and serves
/// the device on the configured socket until SIGTERM or SIGINT.
pub fn run(config: &Config) -> Result<(), Error> {
    let fortuna = Arc::new(Fortuna::with_policy(
        MonotonicClock,
        config.generator.on_unseeded(),
    ));

    // Two strong samples before any read is served.
    entropy::seed(&fortuna)?;

    install_signal_handlers();

    let listener = server::bind(&config.server.socket)?;

    let stop = Arc::new(AtomicBool::new(false));

    let sources: Vec<_> = entropy::sources(&config.sources)
        .into_iter()
        .map(|s| entropy::spawn(Arc::clone(&fortuna), s, Arc::clone(&stop)))
        .collect();

    let (queue, queue_worker) = if config.server.write_queue > 0 {
        let (q, w) = WriteQueue::start(Arc::clone(&fortuna), config.server.write_queue);
        (Some(q), Some(w))
    } else {
        (None, None)
    };

    let device = Arc::new(Device::new(Arc::clone(&fortuna), queue));

    log::info!(
        target: "fortunad::daemon",
        "started: socket={} sources={} write-queue={} unseeded={:?}",
        config.server.socket.display(),
        sources.len(),
        config.server.write_queue,
        config.generator.unseeded,
    );

    let server = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || server::serve(listener, device, stop))
    };

    while !SHUTDOWN.load(Ordering::Relaxed) && !server.is_finished() {
        thread::sleep(Duration::from_millis(250));
    }

    log::info!(
        target: "fortunad::daemon",
        "shutting down: seeded={} reseeds={} pool0={}B",
        fortuna.is_seeded(),
        fortuna.reseed_count(),
        fortuna.pool_length(0).unwrap_or(0),
    );
    stop.store(true, Ordering::Relaxed);

    let served = server
        .join()
        .unwrap_or_else(|_| Err(Error::Device("server thread panicked".into())));
    for s in sources {
        let _ = s.join();
    }
    // The server dropped the device, and with it the last queue sender.
    if let Some(w) = queue_worker {
        let _ = w.join();
    }

    fortuna.close();
    let _ = std::fs::remove_file(&config.server.socket);
    served
}
