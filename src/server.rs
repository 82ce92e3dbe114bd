// MOBATCH SERVER
// TCP ACCEPT LOOP + ONE LINE-READER THREAD PER CONNECTION.
// ALL CONNECTIONS SHARE ONE HANDLER; ITS OWN CRITICAL SECTION SERIALISES
// REQUESTS. THE LISTENER AND EVERY READER POLL THE SHUTDOWN FLAG EVERY
// 100MS, SO CTRL+C NEVER WAITS ON A STALLED CLIENT.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::dispatcher::RequestHandler;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

// A TELEMETRY LINE IS UNDER 2 KiB. ANYTHING PAST THIS WITHOUT A NEWLINE
// DROPS THE CONNECTION.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

pub struct Server {
    listener: TcpListener,
    once: bool,
}

impl Server {
    pub fn bind(addr: &str, once: bool) -> Result<Self> {
        let listener = TcpListener::bind(addr).with_context(|| format!("bind {}", addr))?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener, once })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    // SERVE UNTIL SHUTDOWN (OR AFTER ONE CLIENT WITH --once). RETURNS CONNECTIONS SERVED.
    pub fn run(&self, handler: &dyn RequestHandler, shutdown: &AtomicBool) -> Result<u64> {
        let mut served = 0u64;

        std::thread::scope(|scope| -> Result<()> {
            while !shutdown.load(Ordering::Relaxed) {
                let (stream, peer) = match self.listener.accept() {
                    Ok(conn) => conn,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        std::thread::sleep(POLL_INTERVAL);
                        continue;
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e).context("accept"),
                };
                served += 1;
                info!(%peer, "client connected");

                if self.once {
                    serve_connection(stream, peer, handler, shutdown);
                    break;
                }
                scope.spawn(move || serve_connection(stream, peer, handler, shutdown));
            }
            Ok(())
        })?;

        Ok(served)
    }
}

fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: &dyn RequestHandler,
    shutdown: &AtomicBool,
) {
    let result = (|| -> io::Result<u64> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(POLL_INTERVAL))?;
        stream.set_nodelay(true)?;
        let writer = stream.try_clone()?;
        serve_lines(BufReader::new(stream), writer, handler, shutdown)
    })();

    match result {
        Ok(n) => info!(%peer, requests = n, "client disconnected"),
        Err(e) => warn!(%peer, error = %e, "connection dropped"),
    }
}

/// Read newline-terminated requests until EOF or shutdown, answering each
/// through `handler`. Read timeouts are treated as a chance to poll
/// `shutdown`; a partial line survives them. A line longer than
/// [`MAX_LINE_BYTES`] fails with `InvalidData`.
pub fn serve_lines<R: BufRead, W: Write>(
    mut reader: R,
    mut writer: W,
    handler: &dyn RequestHandler,
    shutdown: &AtomicBool,
) -> io::Result<u64> {
    let mut buf = Vec::with_capacity(1024);
    let mut requests = 0u64;

    while !shutdown.load(Ordering::Relaxed) {
        // NEVER LESS THAN 1, SO Ok(0) STILL MEANS EOF
        let room = (MAX_LINE_BYTES + 1 - buf.len()) as u64;
        match reader.by_ref().take(room).read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
            ) => continue,
            Err(e) => return Err(e),
        }
        if buf.last() != Some(&b'\n') {
            if buf.len() > MAX_LINE_BYTES {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("request line exceeds {} bytes", MAX_LINE_BYTES),
                ));
            }
            // EOF MID-MESSAGE: NEXT READ RETURNS 0
            continue;
        }

        let line = String::from_utf8_lossy(&buf);
        if !line.trim().is_empty() {
            requests += 1;
            if let Some(response) = handler.handle_line(&line) {
                writer.write_all(response.as_bytes())?;
                writer.flush()?;
            }
        }
        buf.clear();
    }

    if !buf.is_empty() {
        debug!(bytes = buf.len(), "discarding partial message");
    }
    Ok(requests)
}
