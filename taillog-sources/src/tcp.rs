use anyhow::{Context, Result};
use std::{
    io::{self, BufReader},
    net::{Shutdown, SocketAddr, TcpListener},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};
use taillog_framework::{BufLineReader, LineRead, LogProvider, OpenError, Preparation, SourceOptions};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Listens on a TCP address; every open waits for one client and reads what
/// it sends until it disconnects.
pub struct TcpServerProvider {
    address: String,
    listener: Option<TcpListener>,
}

impl TcpServerProvider {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            listener: None,
        }
    }

    pub fn from_options(options: &SourceOptions) -> Result<Self> {
        let address = options
            .address
            .as_ref()
            .context("tcp source requires 'address'")?;
        Ok(Self::new(address.clone()))
    }

    /// bound address, available after a successful prepare
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref()?.local_addr().ok()
    }
}

impl LogProvider for TcpServerProvider {
    fn kind(&self) -> &'static str {
        "tcp"
    }

    fn prepare(&mut self) -> Preparation {
        if self.listener.is_some() {
            return Preparation::Ready;
        }
        // accept polls so that a cancelled open does not wait for a client
        let bound = TcpListener::bind(&self.address)
            .and_then(|listener| listener.set_nonblocking(true).map(|()| listener));
        match bound {
            Ok(listener) => {
                log::debug!("Listening on {}", self.address);
                self.listener = Some(listener);
                Preparation::Ready
            }
            Err(e) => Preparation::Error(format!("unable to listen on {}: {}", self.address, e)),
        }
    }

    fn open(&mut self, cancelled: &AtomicBool) -> Result<Box<dyn LineRead>, OpenError> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| OpenError::Other(format!("not listening on {}", self.address)))?;
        let (stream, peer) = loop {
            match listener.accept() {
                Ok(accepted) => break accepted,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if cancelled.load(Ordering::Acquire) {
                        return Err(OpenError::Cancelled);
                    }
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => return Err(OpenError::Io(e)),
            }
        };
        log::debug!("Accepted connection from {}", peer);
        stream.set_nonblocking(false)?;
        let shutdown = stream.try_clone()?;
        let reader = BufLineReader::new(BufReader::new(stream)).with_abort_handle(Arc::new(
            move || {
                let _ = shutdown.shutdown(Shutdown::Both);
            },
        ));
        Ok(Box::new(reader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{generate_lines, reader_desc};
    use std::{io::Write, net::TcpStream, time::Instant};
    use taillog_framework::{DataSourceState, LogDataSource, LogReader, ReaderState};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn listening_provider() -> (TcpServerProvider, SocketAddr) {
        let mut provider = TcpServerProvider::new("127.0.0.1:0");
        assert_eq!(provider.prepare(), Preparation::Ready);
        let address = provider.local_addr().unwrap();
        (provider, address)
    }

    fn wait_for_source(source: &LogDataSource, state: DataSourceState) -> bool {
        let deadline = Instant::now() + TIMEOUT;
        while source.state() != state {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
        true
    }

    #[test]
    fn test_reads_records_from_client() {
        let (provider, address) = listening_provider();
        let reader = LogReader::new(LogDataSource::new(provider), reader_desc()).unwrap();
        reader.start().unwrap();

        let lines = generate_lines(64, &mut rand::rng());
        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect(address).unwrap();
            stream.write_all(lines.join("\n").as_bytes()).unwrap();
        });
        client.join().unwrap();

        assert!(reader.wait_for_state(ReaderState::Stopped, TIMEOUT));
        assert_eq!(reader.logs().len(), 64);
    }

    #[test]
    fn test_bind_failure_is_reported() {
        let (first, address) = listening_provider();
        let mut second = TcpServerProvider::new(address.to_string());
        assert!(matches!(second.prepare(), Preparation::Error(_)));
        drop(first);
    }

    #[test]
    fn test_dispose_while_connected() {
        let (provider, address) = listening_provider();
        let reader = LogReader::new(LogDataSource::new(provider), reader_desc()).unwrap();
        reader.start().unwrap();
        let mut stream = TcpStream::connect(address).unwrap();
        // one full line buffer
        for _ in 0..4 {
            stream
                .write_all(b"2024-05-06 10-11-12.000 I net: hello\n  [TAIL]\n")
                .unwrap();
        }
        let mut count = 0;
        while count < 4 {
            let next = reader.logs().wait_for_count_change(count, TIMEOUT);
            assert!(next > count);
            count = next;
        }
        reader.dispose();
        for _ in 0..8 {
            let _ = stream.write_all(b"2024-05-06 10-11-12.001 I net: late\n  [TAIL]\n");
        }
        thread::sleep(Duration::from_millis(100));
        assert_eq!(reader.logs().len(), 4);
    }

    #[test]
    fn test_dispose_while_waiting_for_client() {
        let (provider, address) = listening_provider();
        let source = LogDataSource::new(provider);
        let first = LogReader::new(Arc::clone(&source), reader_desc()).unwrap();
        first.start().unwrap();
        assert!(wait_for_source(&source, DataSourceState::OpeningReader));
        first.dispose();
        assert!(wait_for_source(&source, DataSourceState::ReadyToOpenReader));

        let second = LogReader::new(Arc::clone(&source), reader_desc()).unwrap();
        second.start().unwrap();
        let lines = generate_lines(8, &mut rand::rng());
        let mut stream = TcpStream::connect(address).unwrap();
        stream.write_all(lines.join("\n").as_bytes()).unwrap();
        drop(stream);
        assert!(second.wait_for_state(ReaderState::Stopped, TIMEOUT));
        assert_eq!(second.logs().len(), 8);
    }
}
