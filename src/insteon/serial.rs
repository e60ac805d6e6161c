//! Serial port reader/writer tasks bridging a PLM to a [`Transport`].
//!
//! ```rust,no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use insteon_linkdb::insteon::serial::connect;
//!
//! let (transport, io) = connect("/dev/ttyUSB0", 19200).await?;
//! // hand `transport` to the database manager, keep `io` to shut the port down
//! io.shutdown();
//! # Ok(()) }
//! ```

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use log::{debug, error, info, trace, warn};
use serialport::SerialPort;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use crate::errors::TransportError;
use crate::insteon::framer::MsgFramer;
use crate::insteon::msg::Msg;
use crate::insteon::transport::Transport;
use crate::logutil::hex_snippet;

/// Control messages for coordinating the port tasks
#[derive(Debug)]
pub enum ControlMessage {
    Shutdown,
}

type SharedPort = Arc<Mutex<Box<dyn SerialPort>>>;

/// Handles to the running port tasks.
pub struct SerialIo {
    reader_control_tx: mpsc::UnboundedSender<ControlMessage>,
    writer_control_tx: mpsc::UnboundedSender<ControlMessage>,
}

impl SerialIo {
    pub fn shutdown(&self) {
        let _ = self.reader_control_tx.send(ControlMessage::Shutdown);
        let _ = self.writer_control_tx.send(ControlMessage::Shutdown);
    }
}

/// Open a serial port configured for a PLM (8N1, no flow control)
async fn open_shared_serial_port(port_name: &str, baud_rate: u32) -> Result<SharedPort, TransportError> {
    debug!("Opening serial port {} at {} baud", port_name, baud_rate);

    let mut builder = serialport::new(port_name, baud_rate).timeout(Duration::from_millis(100));
    #[cfg(unix)]
    {
        builder = builder
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None);
    }
    let mut port = builder.open().map_err(|e| TransportError::Open {
        port: port_name.to_string(),
        reason: e.to_string(),
    })?;

    sleep(Duration::from_millis(150)).await;

    // Clear any stale bytes left over from a previous session
    let mut purge_buf = [0u8; 512];
    if let Ok(available) = port.bytes_to_read() {
        if available > 0 {
            let _ = port.read(&mut purge_buf);
        }
    }

    debug!("Serial port initialized successfully");
    Ok(Arc::new(Mutex::new(port)))
}

/// Open the port and spawn the reader and writer tasks.
pub async fn connect(port_name: &str, baud_rate: u32) -> Result<(Transport, SerialIo), TransportError> {
    let port = open_shared_serial_port(port_name, baud_rate).await?;
    let (transport, outgoing_rx) = Transport::new();
    let (reader_control_tx, reader_control_rx) = mpsc::unbounded_channel();
    let (writer_control_tx, writer_control_rx) = mpsc::unbounded_channel();

    let reader = PortReader {
        port: port.clone(),
        framer: MsgFramer::new(),
        transport: transport.clone(),
        control_rx: reader_control_rx,
    };
    let writer = PortWriter {
        port,
        outgoing_rx,
        control_rx: writer_control_rx,
        transport: transport.clone(),
    };
    tokio::spawn(reader.run());
    tokio::spawn(writer.run());

    info!("Connected to PLM on {}", port_name);
    Ok((
        transport,
        SerialIo {
            reader_control_tx,
            writer_control_tx,
        },
    ))
}

struct PortReader {
    port: SharedPort,
    framer: MsgFramer,
    transport: Transport,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
}

impl PortReader {
    async fn run(mut self) {
        info!("Starting PLM reader task");
        let mut interval = tokio::time::interval(Duration::from_millis(10));

        loop {
            tokio::select! {
                control_msg = self.control_rx.recv() => {
                    match control_msg {
                        Some(ControlMessage::Shutdown) => {
                            info!("Reader task received shutdown signal");
                            break;
                        }
                        None => {
                            warn!("Control channel closed, shutting down reader");
                            break;
                        }
                    }
                }

                _ = interval.tick() => {
                    if let Err(e) = self.read_and_dispatch() {
                        error!("Serial read failed: {}", e);
                        self.transport.disconnected();
                        break;
                    }
                }
            }
        }

        info!("PLM reader task shutting down");
    }

    fn read_and_dispatch(&mut self) -> Result<(), std::io::Error> {
        let mut buffer = [0u8; 256];
        let read_result = {
            let mut port = self.port.lock().expect("serial port mutex poisoned");
            port.read(&mut buffer)
        };

        match read_result {
            Ok(n) if n > 0 => {
                trace!("RAW {} bytes: {}", n, hex_snippet(&buffer[..n], 64));
                self.framer.push(&buffer[..n]);
                while let Some(msg) = self.framer.next_msg() {
                    self.transport.dispatch(msg);
                }
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(()),
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(()),
            Err(e) => Err(e),
        }
    }
}

struct PortWriter {
    port: SharedPort,
    outgoing_rx: mpsc::UnboundedReceiver<Msg>,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    transport: Transport,
}

impl PortWriter {
    async fn run(mut self) {
        info!("Starting PLM writer task");

        loop {
            tokio::select! {
                msg = self.outgoing_rx.recv() => {
                    match msg {
                        Some(msg) => {
                            if let Err(e) = self.write_frame(&msg) {
                                error!("Serial write failed: {}", e);
                                self.transport.disconnected();
                                break;
                            }
                        }
                        None => {
                            warn!("Outgoing message channel closed, shutting down writer");
                            break;
                        }
                    }
                }

                control_msg = self.control_rx.recv() => {
                    match control_msg {
                        Some(ControlMessage::Shutdown) | None => {
                            info!("Writer task received shutdown signal");
                            break;
                        }
                    }
                }
            }
        }

        info!("PLM writer task shutting down");
    }

    fn write_frame(&mut self, msg: &Msg) -> Result<(), std::io::Error> {
        let mut port = self.port.lock().expect("serial port mutex poisoned");
        port.write_all(msg.as_bytes())?;
        port.flush()?;
        trace!("Wrote {} ({} bytes)", msg.name(), msg.len());
        Ok(())
    }
}
