//! Payload output plumbing

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use domctl_protocol::ManagerSide;

use crate::domain::Domain;
use crate::machine::Machine;
use crate::Result;

/// How long the pump thread naps when the ring runs dry.
const PUMP_NAP: Duration = Duration::from_millis(1);

/// Drain everything currently in the domain's output ring into a writer.
/// Returns the number of bytes moved; call it periodically to stream a
/// payload's stdout.
pub fn pump_output<M: Machine>(domain: &mut Domain<M>, out: &mut dyn Write) -> Result<usize> {
    let mut moved = 0;
    while let Some(byte) = domain.getchar() {
        out.write_all(&[byte])?;
        moved += 1;
    }
    if moved > 0 {
        out.flush()?;
    }
    Ok(moved)
}

/// Background drain of a domain's output ring into a writer.
///
/// The pump thread is the ring's sole consumer for as long as it runs;
/// stopping it performs one final drain so no bytes are stranded. Dropping
/// the pump stops it too, discarding the byte count.
pub struct OutputPump {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<std::io::Result<usize>>>,
}

impl OutputPump {
    /// Spawn the pump over the domain's output handle.
    pub fn spawn<M, W>(domain: &Domain<M>, mut out: W) -> OutputPump
    where
        M: Machine,
        W: Write + Send + 'static,
    {
        let block = domain.output_handle();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name(format!("domctl-pump-{}", domain.index()))
            .spawn(move || pump_loop(block, &mut out, &stop_flag))
            .ok();

        OutputPump { stop, thread }
    }

    /// Stop the pump and return the total byte count it moved.
    pub fn stop(mut self) -> Result<usize> {
        self.stop.store(true, Ordering::Release);
        match self.thread.take() {
            Some(handle) => match handle.join() {
                Ok(moved) => Ok(moved?),
                Err(_) => Err(crate::DomainError::Io(std::io::Error::other(
                    "output pump thread panicked",
                ))),
            },
            None => Ok(0),
        }
    }
}

impl Drop for OutputPump {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn pump_loop(
    block: ManagerSide,
    out: &mut dyn Write,
    stop: &AtomicBool,
) -> std::io::Result<usize> {
    let mut moved = 0;
    loop {
        let stopping = stop.load(Ordering::Acquire);
        let mut idle = true;
        while let Some(byte) = block.pop_stdout() {
            out.write_all(&[byte])?;
            moved += 1;
            idle = false;
        }
        if !idle {
            out.flush()?;
        }
        // The final drain above ran after the stop flag was observed, so
        // everything written before the stop request has been moved.
        if stopping {
            return Ok(moved);
        }
        thread::sleep(PUMP_NAP);
    }
}

/// Read a payload image from disk, with the size pre-checked so oversized
/// files fail before any memory traffic.
pub fn read_payload_file(path: &Path) -> Result<Vec<u8>> {
    let metadata = std::fs::metadata(path)?;
    let limit = domctl_protocol::PAYLOAD_MAX_SIZE;
    if metadata.len() > limit as u64 {
        return Err(crate::DomainError::ImageTooLarge {
            size: metadata.len() as usize,
            limit,
        });
    }
    Ok(std::fs::read(path)?)
}

/// Load a payload image from disk and start it with the default poll policy.
pub fn load_payload_from_file<M: Machine>(
    domain: &mut Domain<M>,
    path: &Path,
    argument: u64,
) -> Result<()> {
    let image = read_payload_file(path)?;
    domain.load_and_start_payload(&image, argument, crate::PollPolicy::PAYLOAD_START)
}
