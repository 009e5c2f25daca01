//! ICMP echo packet construction and parsing.

/// Length of the ICMP echo header.
pub const ICMP_HEADER_LEN: usize = 8;

/// Zero-filled payload carried by each echo request.
pub const ECHO_PAYLOAD_LEN: usize = 20;

/// Full echo request length on the wire.
pub const ECHO_REQUEST_LEN: usize = ICMP_HEADER_LEN + ECHO_PAYLOAD_LEN;

/// ICMP type: echo request.
pub const ICMP_ECHO_REQUEST: u8 = 8;

/// ICMP type: echo reply.
pub const ICMP_ECHO_REPLY: u8 = 0;

/// Byte offset of the checksum inside the ICMP header.
const CHECKSUM_OFFSET: usize = 2;

/// Internet checksum (RFC 1071).
///
/// Ones'-complement of the ones'-complement sum of the data taken as
/// big-endian 16-bit words; an odd trailing byte is padded with zero.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u64 = 0;

    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u64::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u64::from(*last) << 8;
    }

    while (sum >> 16) != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

/// An echo request tagged with identifier and sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoRequest {
    pub identifier: u16,
    pub sequence: u16,
}

impl EchoRequest {
    pub fn new(identifier: u16, sequence: u16) -> Self {
        Self {
            identifier,
            sequence,
        }
    }

    /// Encode the request with its checksum filled in.
    pub fn encode(&self) -> [u8; ECHO_REQUEST_LEN] {
        let mut packet = [0u8; ECHO_REQUEST_LEN];
        packet[0] = ICMP_ECHO_REQUEST;
        packet[1] = 0; // code
        packet[4..6].copy_from_slice(&self.identifier.to_be_bytes());
        packet[6..8].copy_from_slice(&self.sequence.to_be_bytes());

        let sum = checksum(&packet);
        packet[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_be_bytes());
        packet
    }
}

/// A parsed echo reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply {
    pub identifier: u16,
    pub sequence: u16,
    /// Whether the reply's checksum verified.
    pub checksum_ok: bool,
}

impl EchoReply {
    /// Whether this reply answers the given request.
    pub fn answers(&self, identifier: u16, sequence: u16) -> bool {
        self.identifier == identifier && self.sequence == sequence
    }
}

/// Parse an IPv4 datagram as read from a raw ICMP socket.
///
/// Returns `None` for anything that is not a well-formed IPv4 echo reply.
pub fn parse_ipv4_reply(datagram: &[u8]) -> Option<EchoReply> {
    let first = *datagram.first()?;
    if first >> 4 != 4 {
        return None;
    }

    let ip_header_len = usize::from(first & 0x0f) * 4;
    if ip_header_len < 20 {
        return None;
    }

    parse_icmp_reply(datagram.get(ip_header_len..)?)
}

/// Parse a bare ICMP message (no IP header).
pub fn parse_icmp_reply(message: &[u8]) -> Option<EchoReply> {
    if message.len() < ICMP_HEADER_LEN {
        return None;
    }
    if message[0] != ICMP_ECHO_REPLY {
        return None;
    }

    let identifier = u16::from_be_bytes([message[4], message[5]]);
    let sequence = u16::from_be_bytes([message[6], message[7]]);
    let received = u16::from_be_bytes([message[CHECKSUM_OFFSET], message[CHECKSUM_OFFSET + 1]]);

    let mut scratch = message.to_vec();
    scratch[CHECKSUM_OFFSET] = 0;
    scratch[CHECKSUM_OFFSET + 1] = 0;
    let computed = checksum(&scratch);

    Some(EchoReply {
        identifier,
        sequence,
        checksum_ok: received == computed,
    })
}

/// Build an echo reply for `request`, as a peer would.
#[cfg(test)]
pub(crate) fn reply_to(request: &[u8]) -> Vec<u8> {
    let mut reply = request.to_vec();
    reply[0] = ICMP_ECHO_REPLY;
    reply[CHECKSUM_OFFSET] = 0;
    reply[CHECKSUM_OFFSET + 1] = 0;
    let sum = checksum(&reply);
    reply[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_be_bytes());
    reply
}

/// Prefix a minimal IPv4 header (IHL = 5) to an ICMP message.
#[cfg(test)]
pub(crate) fn with_ipv4_header(message: &[u8]) -> Vec<u8> {
    let mut datagram = vec![0u8; 20];
    datagram[0] = 0x45;
    datagram[9] = 1; // protocol: ICMP
    datagram.extend_from_slice(message);
    datagram
}
