use std::{
    io::{BufRead, BufReader, ErrorKind, Read, Write},
    net::{TcpStream, ToSocketAddrs},
};

use base64::Engine;
use log::{debug, info};

use crate::{
    cfg::Config,
    error::Error,
    mountpoint::Endpoint,
    prelude::Duration,
    query::{NetworkQuery, QueryStatus},
};

fn std_duration(dt: Duration) -> Option<std::time::Duration> {
    let seconds = dt.to_seconds();
    if seconds > 0.0 {
        Some(std::time::Duration::from_secs_f64(seconds))
    } else {
        None
    }
}

/// [Ntrip1Query] talks NTRIP 1.0 to a caster, over a blocking TCP stream.
/// The connection is established on first request and kept alive: each following
/// request receives up to `chunk_size` bytes. Remaining bytes are received
/// on the next request, so nothing is ever truncated.
///
/// Position sentences are sent within the connection request, then
/// written to the opened session each time a new sentence is requested.
pub struct Ntrip1Query {
    status: QueryStatus,
    chunk_size: usize,
    user_agent: String,
    connect_timeout: Option<std::time::Duration>,
    read_timeout: Option<std::time::Duration>,
    stream: Option<BufReader<TcpStream>>,
    /// Latest position sentence sent to the caster
    last_nmea: Option<String>,
}

impl Ntrip1Query {
    /// Builds a new [Ntrip1Query], not connected yet.
    pub fn new(cfg: &Config) -> Self {
        Self {
            status: QueryStatus::Init,
            chunk_size: cfg.chunk_size,
            user_agent: cfg.user_agent.clone(),
            connect_timeout: std_duration(cfg.connect_timeout),
            read_timeout: std_duration(cfg.read_timeout),
            stream: None,
            last_nmea: None,
        }
    }

    /// True when a session is currently opened
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn tcp_connect(&self, endpoint: &Endpoint) -> Result<TcpStream, Error> {
        let mut last_err = None;
        for addr in endpoint.address().to_socket_addrs().map_err(Error::Network)? {
            let attempt = match self.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(Error::Network(last_err.unwrap_or_else(|| {
            std::io::Error::new(ErrorKind::NotFound, "caster address did not resolve")
        })))
    }

    fn request(&self, endpoint: &Endpoint, nmea: Option<&str>) -> String {
        let mut request = format!(
            "GET {} HTTP/1.0\r\nUser-Agent: {}\r\nAccept: */*\r\nConnection: close\r\n",
            endpoint.path(),
            self.user_agent
        );
        if let Some((user, password)) = endpoint.credentials() {
            let token = base64::engine::general_purpose::STANDARD
                .encode(format!("{}:{}", user, password));
            request.push_str(&format!("Authorization: Basic {}\r\n", token));
        }
        request.push_str("\r\n");
        if let Some(nmea) = nmea {
            if !nmea.is_empty() {
                request.push_str(nmea);
                request.push_str("\r\n");
            }
        }
        request
    }

    fn connect(
        &self,
        endpoint: &Endpoint,
        nmea: Option<&str>,
    ) -> Result<BufReader<TcpStream>, Error> {
        let mut stream = self.tcp_connect(endpoint)?;
        stream
            .set_read_timeout(self.read_timeout)
            .map_err(Error::Network)?;

        stream
            .write_all(self.request(endpoint, nmea).as_bytes())
            .map_err(Error::Network)?;

        let mut reader = BufReader::new(stream);

        let mut status = String::new();
        let size = reader.read_line(&mut status).map_err(Error::Network)?;
        if size == 0 {
            return Err(Error::ConnectionClosed);
        }

        let status = status.trim();
        debug!("{} - caster replied \"{}\"", endpoint, status);

        if status.starts_with("ICY 200") {
            Ok(reader)
        } else if status.starts_with("HTTP/1.") && status.contains(" 200") {
            // some casters answer with regular HTTP headers
            loop {
                let mut header = String::new();
                let size = reader.read_line(&mut header).map_err(Error::Network)?;
                if size == 0 {
                    return Err(Error::ConnectionClosed);
                }
                if header.trim().is_empty() {
                    break;
                }
                if header.to_lowercase().contains("gnss/sourcetable") {
                    return Err(Error::MountPointNotFound(endpoint.mount.clone()));
                }
            }
            Ok(reader)
        } else if status.starts_with("SOURCETABLE") {
            Err(Error::MountPointNotFound(endpoint.mount.clone()))
        } else if status.contains("401") {
            Err(Error::Unauthorized)
        } else {
            Err(Error::CasterRejected(status.to_string()))
        }
    }

    fn receive(&mut self, buf: &mut Vec<u8>) -> Result<QueryStatus, Error> {
        let chunk_size = self.chunk_size;
        let reader = self.stream.as_mut().ok_or(Error::ConnectionClosed)?;

        buf.resize(chunk_size, 0);
        match reader.read(&mut buf[..]) {
            Ok(0) => {
                buf.clear();
                Err(Error::ConnectionClosed)
            },
            Ok(size) => {
                buf.truncate(size);
                Ok(QueryStatus::DataReceivable)
            },
            Err(e) => {
                buf.clear();
                match e.kind() {
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => {
                        Ok(QueryStatus::Running)
                    },
                    _ => Err(Error::Network(e)),
                }
            },
        }
    }

    /// Writes this position sentence to the opened session,
    /// unless it was the latest one sent.
    fn send_nmea(&mut self, endpoint: &Endpoint, nmea: &str) -> Result<(), Error> {
        if self.last_nmea.as_deref() == Some(nmea) {
            return Ok(());
        }
        let reader = self.stream.as_mut().ok_or(Error::ConnectionClosed)?;
        let stream = reader.get_mut();
        stream
            .write_all(format!("{}\r\n", nmea).as_bytes())
            .map_err(Error::Network)?;
        stream.flush().map_err(Error::Network)?;
        debug!("{} - position updated: {}", endpoint, nmea);
        self.last_nmea = Some(nmea.to_string());
        Ok(())
    }

    fn cycle(
        &mut self,
        endpoint: &Endpoint,
        nmea: Option<&str>,
        buf: &mut Vec<u8>,
    ) -> Result<QueryStatus, Error> {
        let nmea = nmea.filter(|nmea| !nmea.is_empty());
        if self.stream.is_none() {
            let reader = self.connect(endpoint, nmea)?;
            info!("{} - connected", endpoint);
            self.stream = Some(reader);
            self.last_nmea = nmea.map(|nmea| nmea.to_string());
        } else if let Some(nmea) = nmea {
            self.send_nmea(endpoint, nmea)?;
        }
        self.receive(buf)
    }
}

impl NetworkQuery for Ntrip1Query {
    fn start_request(
        &mut self,
        endpoint: &Endpoint,
        nmea: Option<&str>,
        buf: &mut Vec<u8>,
    ) -> Result<QueryStatus, Error> {
        buf.clear();
        match self.cycle(endpoint, nmea, buf) {
            Ok(status) => {
                self.status = status;
                Ok(status)
            },
            Err(e) => {
                // next request reconnects
                self.stream = None;
                self.last_nmea = None;
                self.status = QueryStatus::Error;
                Err(e)
            },
        }
    }

    fn status(&self) -> QueryStatus {
        self.status
    }
}
