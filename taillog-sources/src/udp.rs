use anyhow::{Context, Result};
use std::{
    collections::VecDeque,
    io,
    net::{SocketAddr, UdpSocket},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use taillog_framework::{AbortHandle, LineRead, LogProvider, OpenError, Preparation, SourceOptions};

const RECV_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_DATAGRAM_SIZE: usize = 65536;

/// Binds a UDP address and reads the text of every datagram it receives. The
/// stream never ends on its own, only when the reader is disposed.
pub struct UdpServerProvider {
    address: String,
    socket: Option<UdpSocket>,
}

impl UdpServerProvider {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            socket: None,
        }
    }

    pub fn from_options(options: &SourceOptions) -> Result<Self> {
        let address = options
            .address
            .as_ref()
            .context("udp source requires 'address'")?;
        Ok(Self::new(address.clone()))
    }

    /// bound address, available after a successful prepare
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref()?.local_addr().ok()
    }
}

impl LogProvider for UdpServerProvider {
    fn kind(&self) -> &'static str {
        "udp"
    }

    fn prepare(&mut self) -> Preparation {
        if self.socket.is_some() {
            return Preparation::Ready;
        }
        match UdpSocket::bind(&self.address) {
            Ok(socket) => {
                log::debug!("Receiving datagrams on {}", self.address);
                self.socket = Some(socket);
                Preparation::Ready
            }
            Err(e) => Preparation::Error(format!("unable to bind {}: {}", self.address, e)),
        }
    }

    fn open(&mut self, _cancelled: &AtomicBool) -> Result<Box<dyn LineRead>, OpenError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| OpenError::Other(format!("not bound to {}", self.address)))?
            .try_clone()?;
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;
        Ok(Box::new(UdpLineReader::new(socket)))
    }
}

/// Splits datagrams into lines. A datagram without a line break is one line,
/// empty lines are skipped.
pub struct UdpLineReader {
    socket: UdpSocket,
    buf: Vec<u8>,
    lines: VecDeque<String>,
    should_stop: Arc<AtomicBool>,
}

impl UdpLineReader {
    fn new(socket: UdpSocket) -> Self {
        Self {
            socket,
            buf: vec![0; MAX_DATAGRAM_SIZE],
            lines: VecDeque::new(),
            should_stop: Arc::new(AtomicBool::new(false)),
        }
    }
}

fn split_datagram(data: &[u8], lines: &mut VecDeque<String>) {
    let text = String::from_utf8_lossy(data);
    lines.extend(
        text.split(['\r', '\n'])
            .filter(|line| !line.is_empty())
            .map(str::to_string),
    );
}

impl LineRead for UdpLineReader {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if self.should_stop.load(Ordering::Acquire) {
                return Ok(None);
            }
            if let Some(line) = self.lines.pop_front() {
                return Ok(Some(line));
            }
            match self.socket.recv_from(&mut self.buf) {
                Ok((len, _)) => split_datagram(&self.buf[..len], &mut self.lines),
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
                Err(e) => return Err(e),
            }
        }
    }

    fn abort_handle(&self) -> Option<AbortHandle> {
        let should_stop = Arc::clone(&self.should_stop);
        Some(Arc::new(move || should_stop.store(true, Ordering::Release)))
    }
}
