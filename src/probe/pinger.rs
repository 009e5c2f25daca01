//! Raw-socket ICMP echo prober with bounded, polling receive.

use std::io::{self, Read};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, trace, warn};

use super::icmp::{self, EchoRequest};
use super::EchoProbe;
use crate::error::{Error, ProbeError, Result};
use crate::types::ProbeResult;

/// Receive buffer size; large enough for an IP header plus any echo reply we send.
const RECV_BUFFER_SIZE: usize = 1024;

/// Datagram channel a [`Pinger`] sends requests on and polls replies from.
///
/// `try_recv` must not block: it returns `WouldBlock` when nothing is queued.
pub trait RawChannel: Send {
    fn send(&mut self, packet: &[u8]) -> io::Result<usize>;

    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Non-blocking raw ICMPv4 socket connected to one destination.
#[derive(Debug)]
pub struct IcmpSocket {
    socket: Socket,
    dest: SockAddr,
    dest_ip: IpAddr,
}

impl IcmpSocket {
    /// Resolve `host` and open a raw socket for the first usable IPv4 address.
    pub fn open(host: &str) -> Result<Self> {
        let candidates: Vec<SocketAddr> = (host, 0)
            .to_socket_addrs()
            .map_err(|e| Error::Resolution {
                host: host.to_string(),
                reason: e.to_string(),
            })?
            .filter(SocketAddr::is_ipv4)
            .collect();

        if candidates.is_empty() {
            return Err(Error::Resolution {
                host: host.to_string(),
                reason: "no IPv4 address".into(),
            });
        }

        let mut last_error = None;
        for addr in candidates {
            match Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)) {
                Ok(socket) => {
                    socket
                        .set_nonblocking(true)
                        .map_err(|e| Error::SocketConfig(format!("set non-blocking: {e}")))?;

                    debug!("Opened raw ICMP socket to {} ({})", host, addr.ip());
                    return Ok(Self {
                        socket,
                        dest: addr.into(),
                        dest_ip: addr.ip(),
                    });
                }
                Err(e) => {
                    if e.raw_os_error() == Some(libc::EPERM) {
                        warn!("Raw ICMP sockets require root or CAP_NET_RAW");
                    }
                    debug!("Raw socket for {} failed: {}", addr.ip(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(Error::Socket(format!(
            "no usable socket for {host}: {}",
            last_error.map_or_else(|| "unknown error".to_string(), |e| e.to_string())
        )))
    }

    /// Address probes are sent to.
    pub fn destination(&self) -> IpAddr {
        self.dest_ip
    }
}

impl RawChannel for IcmpSocket {
    fn send(&mut self, packet: &[u8]) -> io::Result<usize> {
        self.socket.send_to(packet, &self.dest)
    }

    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.read(buf)
    }
}

/// Performs one ICMP echo round trip at a time over an owned channel.
#[derive(Debug)]
pub struct Pinger<C = IcmpSocket> {
    channel: C,
    timeout: Duration,
    poll_interval: Duration,
}

impl Pinger<IcmpSocket> {
    /// Resolve `host` and open a raw ICMP socket to it.
    pub fn open(host: &str, timeout: Duration) -> Result<Self> {
        Ok(Self::with_channel(IcmpSocket::open(host)?, timeout))
    }

    /// Address probes are sent to.
    pub fn destination(&self) -> IpAddr {
        self.channel.destination()
    }
}

impl<C: RawChannel> Pinger<C> {
    /// Take ownership of an already opened channel.
    pub fn with_channel(channel: C, timeout: Duration) -> Self {
        Self {
            channel,
            timeout,
            poll_interval: Duration::from_micros(50),
        }
    }

    /// Pause between empty receive polls.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Per-probe reply deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send one echo request and wait for its reply until the timeout elapses.
    ///
    /// Replies for other identifiers or sequence numbers are skipped. A reply
    /// whose checksum fails still yields a measured RTT with `bad_checksum` set.
    pub fn ping(&mut self, sequence: u16, identifier: u16) -> Result<ProbeResult> {
        let request = EchoRequest::new(identifier, sequence).encode();

        let written = self
            .channel
            .send(&request)
            .map_err(|e| ProbeError::SendFailed(e.to_string()))?;
        if written != request.len() {
            return Err(ProbeError::ShortSend {
                written,
                expected: request.len(),
            }
            .into());
        }

        let start = Instant::now();
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        loop {
            match self.channel.try_recv(&mut buf) {
                Ok(len) => {
                    let elapsed = start.elapsed();
                    match icmp::parse_ipv4_reply(&buf[..len]) {
                        Some(reply) if reply.answers(identifier, sequence) => {
                            return Ok(ProbeResult::received(elapsed, !reply.checksum_ok));
                        }
                        Some(reply) => trace!(
                            "Skipping reply id={} seq={} (want id={} seq={})",
                            reply.identifier,
                            reply.sequence,
                            identifier,
                            sequence
                        ),
                        None => trace!("Skipping {} byte non-reply datagram", len),
                    }
                    if elapsed > self.timeout {
                        return Ok(ProbeResult::lost());
                    }
                    // More datagrams may already be queued; poll again immediately.
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ProbeError::ReceiveFailed(e.to_string()).into()),
            }

            if start.elapsed() > self.timeout {
                debug!("Probe seq={} timed out after {:?}", sequence, self.timeout);
                return Ok(ProbeResult::lost());
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}

impl<C: RawChannel + 'static> EchoProbe for Pinger<C> {
    fn probe(&mut self, sequence: u16, identifier: u16) -> Result<ProbeResult> {
        self.ping(sequence, identifier)
    }
}
