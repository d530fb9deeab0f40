//! Live MJPEG stream sink.
//!
//! Serves the classified frame stream to browsers as
//! `multipart/x-mixed-replace`. The sink thread owns a nonblocking listener:
//! between frames it accepts new clients, and each frame is JPEG-encoded
//! once and written to every client. A client that fails a write is dropped;
//! the others are unaffected.
//!
//! Frames flagged as motion are annotated with the marker disc on this
//! sink's own copy.

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use crate::error::ConfigError;
use crate::frame::Frame;
use crate::pipeline::CancelToken;
use crate::sink::{bounded, OverflowPolicy, Recv, SinkHandle, SinkSender};

const QUEUE_CAPACITY: usize = 16;
const BOUNDARY: &str = "frame";
const JPEG_QUALITY: u8 = 80;

/// Configuration for the live stream sink.
#[derive(Clone, Debug)]
pub struct StreamSinkConfig {
    /// Listen address, host:port.
    pub addr: String,
    /// Draw the motion marker on flagged frames.
    pub annotate: bool,
}

impl Default for StreamSinkConfig {
    fn default() -> Self {
        Self {
            addr: "localhost:8080".to_string(),
            annotate: true,
        }
    }
}

/// Spawn the live stream sink. Binds eagerly so a bad address surfaces to
/// the caller instead of dying inside the sink thread; the bound address is
/// returned for callers that configured port 0.
pub fn spawn_stream_sink(
    config: StreamSinkConfig,
    cancel: CancelToken,
) -> Result<(SinkSender<(Frame, bool)>, SinkHandle, std::net::SocketAddr), ConfigError> {
    let listener = TcpListener::bind(&config.addr)
        .map_err(|err| ConfigError::Invalid(format!("cannot bind stream address {}: {}", config.addr, err)))?;
    let addr = listener
        .local_addr()
        .and_then(|addr| listener.set_nonblocking(true).map(|_| addr))
        .map_err(|err| ConfigError::Invalid(format!("stream listener setup failed: {}", err)))?;
    log::info!("live stream listening on {}", addr);

    let (tx, rx) = bounded::<(Frame, bool)>("stream", QUEUE_CAPACITY, OverflowPolicy::DropOldest, log::Level::Debug);
    let join = std::thread::spawn(move || {
        let mut clients: Vec<TcpStream> = Vec::new();
        loop {
            accept_clients(&listener, &mut clients);
            match rx.recv_deadline(&cancel, Duration::from_millis(100)) {
                Recv::Item((frame, motion)) => {
                    let frame = if motion && config.annotate {
                        frame.with_motion_marker()
                    } else {
                        frame
                    };
                    match encode_jpeg(&frame) {
                        Ok(bytes) => broadcast(&mut clients, &bytes),
                        Err(err) => log::warn!("stream frame encode failed: {}", err),
                    }
                }
                Recv::Empty => continue,
                Recv::Closed => break,
            }
        }
        log::debug!("stream sink stopped");
    });

    Ok((tx, SinkHandle::new("stream", join), addr))
}

fn accept_clients(listener: &TcpListener, clients: &mut Vec<TcpStream>) {
    loop {
        match listener.accept() {
            Ok((mut stream, peer)) => {
                log::info!("stream client connected from {}", peer);
                let header = format!(
                    "HTTP/1.1 200 OK\r\n\
                     Content-Type: multipart/x-mixed-replace; boundary={}\r\n\
                     Cache-Control: no-cache\r\n\
                     Connection: close\r\n\r\n",
                    BOUNDARY
                );
                if stream.write_all(header.as_bytes()).is_ok() {
                    clients.push(stream);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(err) => {
                log::warn!("stream accept failed: {}", err);
                return;
            }
        }
    }
}

fn broadcast(clients: &mut Vec<TcpStream>, jpeg: &[u8]) {
    clients.retain_mut(|client| {
        let part = format!(
            "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            BOUNDARY,
            jpeg.len()
        );
        let alive = client
            .write_all(part.as_bytes())
            .and_then(|_| client.write_all(jpeg))
            .and_then(|_| client.write_all(b"\r\n"))
            .is_ok();
        if !alive {
            log::info!("stream client disconnected");
        }
        alive
    });
}

fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>, image::ImageError> {
    let mut bytes = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY).encode(
        frame.pixels(),
        frame.width,
        frame.height,
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CHANNELS;
    use std::io::Read;

    #[test]
    fn serves_frames_to_a_connected_client() {
        let cancel = CancelToken::new();
        let (tx, handle, addr) = spawn_stream_sink(
            StreamSinkConfig {
                addr: "127.0.0.1:0".to_string(),
                annotate: false,
            },
            cancel.clone(),
        )
        .expect("spawn stream sink");

        let mut client = TcpStream::connect(addr).expect("connect");
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("read timeout");

        // Publish frames until the accept loop has picked us up and a part
        // arrives on the wire.
        let mut received = Vec::new();
        let mut chunk = [0u8; 4096];
        for seq in 0..50 {
            let frame = Frame::new(vec![50u8; 16 * 16 * CHANNELS], 16, 16, seq);
            assert!(tx.send((frame, false)));
            std::thread::sleep(Duration::from_millis(50));
            if contains(&received, b"image/jpeg") {
                break;
            }
            if let Ok(read) = client.read(&mut chunk) {
                assert!(read > 0, "stream closed before a frame arrived");
                received.extend_from_slice(&chunk[..read]);
            }
        }
        assert!(contains(&received, b"multipart/x-mixed-replace"));
        assert!(contains(&received, b"image/jpeg"));

        drop(tx);
        handle.stop();
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack
            .windows(needle.len())
            .any(|window| window == needle)
    }
}
