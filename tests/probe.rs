//! Probe primitive through the raw-channel seam, and continuous ping.

use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use pathgauge::loss::NaiveLoss;
use pathgauge::metrics::RttJitterFilter;
use pathgauge::probe::icmp::{self, EchoRequest};
use pathgauge::probe::{EchoProbe, Pinger, ProbeConfig, RawChannel};
use pathgauge::session::PingSession;

/// A peer that never answers.
#[derive(Debug, Default)]
struct Silent {
    sent: usize,
}

impl RawChannel for Silent {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sent += 1;
        Ok(buf.len())
    }

    fn try_recv(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::ErrorKind::WouldBlock.into())
    }
}

/// A peer that answers every request behind a bare IPv4 header.
#[derive(Debug, Default)]
struct Echoing {
    queue: VecDeque<Vec<u8>>,
    corrupt: bool,
}

impl RawChannel for Echoing {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut reply = buf.to_vec();
        reply[0] = icmp::ICMP_ECHO_REPLY;
        reply[2] = 0;
        reply[3] = 0;
        let sum = icmp::checksum(&reply);
        reply[2..4].copy_from_slice(&sum.to_be_bytes());
        if self.corrupt {
            reply[icmp::ICMP_HEADER_LEN] ^= 0xff;
        }

        let mut datagram = vec![0u8; 20];
        datagram[0] = 0x45;
        datagram.extend_from_slice(&reply);
        self.queue.push_back(datagram);
        Ok(buf.len())
    }

    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.queue.pop_front() {
            Some(datagram) => {
                buf[..datagram.len()].copy_from_slice(&datagram);
                Ok(datagram.len())
            }
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }
}

#[test]
fn test_unanswered_probe_counts_as_one_lost_sample() {
    let timeout = Duration::from_millis(30);
    let mut pinger =
        Pinger::with_channel(Silent::default(), timeout).with_poll_interval(Duration::from_millis(1));

    let start = Instant::now();
    let result = pinger.probe(1, 0x4242).unwrap();

    assert!(start.elapsed() >= timeout);
    assert_eq!(result.rtt_micros(), -1);
    assert!(!result.bad_checksum);

    let mut naive = NaiveLoss::new();
    naive.process_probe(&result);
    assert_eq!(naive.samples(), 1);
    assert_eq!(naive.lost(), 1);
}

#[test]
fn test_request_checksum_self_verifies() {
    for (identifier, sequence) in [(0, 0), (0x1234, 1), (0xffff, 0xfffe)] {
        let request = EchoRequest::new(identifier, sequence).encode();
        assert_eq!(icmp::checksum(&request), 0);
    }
}

#[test]
fn test_echoed_probes_feed_the_filter() {
    let mut pinger = Pinger::with_channel(Echoing::default(), Duration::from_secs(1));
    let mut filter = RttJitterFilter::new();

    for sequence in 0..5 {
        let result = pinger.probe(sequence, 77).unwrap();
        assert!(result.is_valid());
        filter.process(&result);
    }

    assert_eq!(filter.total(), 5);
    assert_eq!(filter.lost(), 0);
    assert!(filter.smoothed_rtt().is_some());
}

#[test]
fn test_corrupted_reply_keeps_rtt() {
    let channel = Echoing {
        corrupt: true,
        ..Default::default()
    };
    let mut pinger = Pinger::with_channel(channel, Duration::from_secs(1));

    let result = pinger.probe(9, 77).unwrap();
    assert!(result.bad_checksum);
    assert!(result.rtt.is_some());
    assert!(!result.is_valid());
}

#[tokio::test]
async fn test_ping_session_counts_probes() {
    let pinger = Pinger::with_channel(Echoing::default(), Duration::from_secs(1));
    let config = ProbeConfig {
        ping_gap: Duration::from_millis(1),
        ..Default::default()
    };

    let mut session = PingSession::new(pinger, &config, CancellationToken::new()).with_count(4);
    let summary = session.run().await.unwrap();

    assert_eq!(summary.total, 4);
    assert_eq!(summary.lost, 0);
    assert_eq!(summary.loss_percent, 0.0);
}

#[tokio::test]
async fn test_ping_session_stops_on_shutdown() {
    let pinger = Pinger::with_channel(Silent::default(), Duration::from_millis(5))
        .with_poll_interval(Duration::from_millis(1));
    let token = CancellationToken::new();
    token.cancel();

    let mut session = PingSession::new(pinger, &ProbeConfig::default(), token);
    let summary = tokio::time::timeout(Duration::from_secs(5), session.run())
        .await
        .expect("ping should stop on shutdown")
        .unwrap();

    // The first probe is always issued.
    assert_eq!(summary.total, 1);
    assert_eq!(summary.lost, 1);
    assert_eq!(summary.loss_percent, 100.0);
}
