//! Serial port abstractions shared by the driver crates.
//!
//! Requires the `serial` feature:
//!
//! ```toml
//! [dependencies]
//! cryo-core = { path = "../cryo-core", features = ["serial"] }
//! ```
//!
//! The key type is [`SharedPort`]: a type-erased serial port behind an
//! async mutex. The mutex doubles as the per-device query lock of the
//! protocol engine: one lock per connection object, owned by the engine
//! instance, never shared between unrelated devices.
//!
//! Any `AsyncRead + AsyncWrite` stream can stand in for real hardware, so
//! tests drive the engines with `tokio::io::duplex` pairs.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::Mutex;

/// Trait alias for async serial port I/O.
///
/// Satisfied by `tokio_serial::SerialStream` (hardware) and
/// `tokio::io::DuplexStream` (tests) alike.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Thread-safe shared serial port.
///
/// The engines read fixed-size windows rather than delimited lines, so no
/// `BufReader` is layered on top; the raw stream is locked directly.
pub type SharedPort = Arc<Mutex<DynSerial>>;

/// Wrap a type-erased port for sharing.
pub fn wrap_shared(port: DynSerial) -> SharedPort {
    Arc::new(Mutex::new(port))
}

/// Open a serial port asynchronously using `spawn_blocking`.
///
/// Standard settings are applied: 8N1, no flow control. `device_name` is
/// used only for error messages.
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    device_name: &str,
) -> anyhow::Result<tokio_serial::SerialStream> {
    use anyhow::Context;
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();
    let device_name_owned = device_name.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .context(format!(
                "Failed to open {} serial port: {}",
                device_name_owned, port_path_owned
            ))
    })
    .await
    .context("spawn_blocking for serial port opening failed")?
}

/// Drain stale data from a serial port buffer.
///
/// Reads and discards until no more data arrives within `timeout_ms`.
/// Called before a query to clear leftovers from a previous, possibly
/// timed-out exchange. Returns the number of bytes discarded.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, timeout_ms: u64) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    let mut total_discarded = 0usize;

    loop {
        if tokio::time::Instant::now() >= deadline {
            break;
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, port.read(&mut discard)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                total_discarded += n;
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Ok(Err(_)) => break,
            Err(_) => break,
        }
    }

    total_discarded
}
