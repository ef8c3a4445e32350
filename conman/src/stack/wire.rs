//! The frame format recorded by the loopback stack.
//!
//! Every transmitted segment or datagram is recorded as a frame with a fixed header followed by
//! the payload. The header names the interface, the transport protocol and both endpoints. This
//! is not an on-air format, it only needs to be decodable by tests and diagnostic tooling.
use core::fmt;
use core::net::{Ipv4Addr, SocketAddrV4};

use alloc::vec::Vec;
use byteorder::{ByteOrder, NetworkEndian};

use super::Interface;

enum_with_unknown! {
    /// The transport protocol of a frame.
    #[derive(Copy, Clone, Hash)]
    pub enum Protocol(u8) {
        Tcp = 6,
        Udp = 17,
    }
}

enum_with_unknown! {
    /// Interface identifiers as encoded in the header.
    #[derive(Copy, Clone, Hash)]
    pub enum IfaceId(u8) {
        Station = 0,
        SoftAp = 1,
    }
}

byte_wrapper! {
    /// A byte sequence representing a recorded frame.
    #[derive(Debug, PartialEq, Eq)]
    pub struct frame([u8]);
}

/// Errors when decoding a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// The buffer is shorter than the header or the indicated payload.
    Truncated,
    /// A header field has a value that is not understood.
    Malformed,
}

/// A convenience wrapper around `Result` for frame errors.
pub type Result<T> = core::result::Result<T, Error>;

/// A high-level representation of the frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Repr {
    /// The interface the frame was sent on.
    pub iface: Interface,
    /// The transport protocol.
    pub protocol: Protocol,
    /// The sending endpoint.
    pub src: SocketAddrV4,
    /// The receiving endpoint.
    pub dst: SocketAddrV4,
    /// The length of the payload.
    pub payload_len: usize,
}

mod field {
    pub(crate) type Field = ::core::ops::Range<usize>;

    pub(crate) const IFACE:    usize = 0;
    pub(crate) const PROTOCOL: usize = 1;
    pub(crate) const SRC_ADDR: Field = 2..6;
    pub(crate) const SRC_PORT: Field = 6..8;
    pub(crate) const DST_ADDR: Field = 8..12;
    pub(crate) const DST_PORT: Field = 12..14;
    pub(crate) const LENGTH:   Field = 14..16;
    pub(crate) const PAYLOAD:  usize = 16;
}

/// The length of the frame header.
pub const HEADER_LEN: usize = field::PAYLOAD;

impl frame {
    /// Imbue a raw octet buffer with frame structure.
    pub fn new_unchecked(buffer: &[u8]) -> &frame {
        Self::from_bytes(buffer)
    }

    /// Imbue a mutable octet buffer with frame structure.
    pub fn new_unchecked_mut(buffer: &mut [u8]) -> &mut frame {
        Self::from_bytes_mut(buffer)
    }

    /// Shorthand for a combination of `new_unchecked` and `check_len`.
    pub fn new_checked(data: &[u8]) -> Result<&frame> {
        Self::new_unchecked(data).check_len()?;
        Ok(Self::new_unchecked(data))
    }

    /// Ensure that no accessor method will panic if called.
    pub fn check_len(&self) -> Result<()> {
        if self.0.len() < field::PAYLOAD {
            Err(Error::Truncated)
        } else if self.0.len() < field::PAYLOAD + usize::from(self.payload_len()) {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }

    /// View the frame as a raw byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Return the interface field.
    #[inline]
    pub fn iface(&self) -> IfaceId {
        IfaceId::from(self.0[field::IFACE])
    }

    /// Return the protocol field.
    #[inline]
    pub fn protocol(&self) -> Protocol {
        Protocol::from(self.0[field::PROTOCOL])
    }

    /// Return the source endpoint.
    pub fn src(&self) -> SocketAddrV4 {
        SocketAddrV4::new(
            Ipv4Addr::from(NetworkEndian::read_u32(&self.0[field::SRC_ADDR])),
            NetworkEndian::read_u16(&self.0[field::SRC_PORT]))
    }

    /// Return the destination endpoint.
    pub fn dst(&self) -> SocketAddrV4 {
        SocketAddrV4::new(
            Ipv4Addr::from(NetworkEndian::read_u32(&self.0[field::DST_ADDR])),
            NetworkEndian::read_u16(&self.0[field::DST_PORT]))
    }

    /// Return the payload length field.
    #[inline]
    pub fn payload_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::LENGTH])
    }

    /// Return the payload.
    pub fn payload(&self) -> &[u8] {
        let end = field::PAYLOAD + usize::from(self.payload_len());
        &self.0[field::PAYLOAD..end]
    }

    /// Set the interface field.
    #[inline]
    pub fn set_iface(&mut self, value: IfaceId) {
        self.0[field::IFACE] = value.into();
    }

    /// Set the protocol field.
    #[inline]
    pub fn set_protocol(&mut self, value: Protocol) {
        self.0[field::PROTOCOL] = value.into();
    }

    /// Set the source endpoint.
    pub fn set_src(&mut self, value: SocketAddrV4) {
        NetworkEndian::write_u32(&mut self.0[field::SRC_ADDR], u32::from(*value.ip()));
        NetworkEndian::write_u16(&mut self.0[field::SRC_PORT], value.port());
    }

    /// Set the destination endpoint.
    pub fn set_dst(&mut self, value: SocketAddrV4) {
        NetworkEndian::write_u32(&mut self.0[field::DST_ADDR], u32::from(*value.ip()));
        NetworkEndian::write_u16(&mut self.0[field::DST_PORT], value.port());
    }

    /// Set the payload length field.
    #[inline]
    pub fn set_payload_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::LENGTH], value);
    }

    /// Return a mutable view of the payload.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let end = field::PAYLOAD + usize::from(self.payload_len());
        &mut self.0[field::PAYLOAD..end]
    }
}

impl AsRef<[u8]> for frame {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl Repr {
    /// Parse a frame header and return a high-level representation.
    pub fn parse(bytes: &frame) -> Result<Repr> {
        bytes.check_len()?;

        let iface = match bytes.iface() {
            IfaceId::Station => Interface::Station,
            IfaceId::SoftAp => Interface::SoftAp,
            IfaceId::Unknown(_) => return Err(Error::Malformed),
        };

        Ok(Repr {
            iface,
            protocol: bytes.protocol(),
            src: bytes.src(),
            dst: bytes.dst(),
            payload_len: bytes.payload_len().into(),
        })
    }

    /// The length of a frame with this header.
    pub fn buffer_len(&self) -> usize {
        HEADER_LEN + self.payload_len
    }

    /// Emit the header into a frame buffer.
    ///
    /// # Panics
    /// This function panics if the buffer is too short or the payload length does not fit the
    /// length field.
    pub fn emit(&self, buf: &mut frame) {
        assert!(self.payload_len <= usize::from(u16::max_value()));
        let len = self.payload_len as u16;
        buf.set_iface(match self.iface {
            Interface::Station => IfaceId::Station,
            Interface::SoftAp => IfaceId::SoftAp,
        });
        buf.set_protocol(self.protocol);
        buf.set_src(self.src);
        buf.set_dst(self.dst);
        buf.set_payload_len(len);
    }

    /// Allocate a complete frame with the given payload.
    ///
    /// The payload length of `self` is replaced by the actual length of `payload`.
    pub fn encode(mut self, payload: &[u8]) -> Vec<u8> {
        self.payload_len = payload.len();
        let mut buffer = alloc::vec![0; self.buffer_len()];
        let buf = frame::new_unchecked_mut(&mut buffer);
        self.emit(buf);
        buf.payload_mut().copy_from_slice(payload);
        buffer
    }
}

impl fmt::Display for frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Repr::parse(self) {
            Ok(repr) => write!(f, "{:?} {:?} {} -> {} len={}",
                repr.iface, repr.protocol, repr.src, repr.dst, repr.payload_len),
            Err(err) => write!(f, "frame ({:?})", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static FRAME_BYTES: [u8; 20] = [
        0x01, 0x11,
        0xc0, 0xa8, 0x04, 0x01, 0x13, 0x88,
        0xff, 0xff, 0xff, 0xff, 0x13, 0x89,
        0x00, 0x04,
        0xaa, 0x00, 0x00, 0xff,
    ];

    static PAYLOAD_BYTES: [u8; 4] = [0xaa, 0x00, 0x00, 0xff];

    fn repr() -> Repr {
        Repr {
            iface: Interface::SoftAp,
            protocol: Protocol::Udp,
            src: SocketAddrV4::new(Ipv4Addr::new(192, 168, 4, 1), 5000),
            dst: SocketAddrV4::new(Ipv4Addr::BROADCAST, 5001),
            payload_len: 4,
        }
    }

    #[test]
    fn deconstruct() {
        let bytes = frame::new_checked(&FRAME_BYTES[..]).unwrap();
        assert_eq!(bytes.iface(), IfaceId::SoftAp);
        assert_eq!(bytes.protocol(), Protocol::Udp);
        assert_eq!(bytes.src(), repr().src);
        assert_eq!(bytes.dst(), repr().dst);
        assert_eq!(bytes.payload(), &PAYLOAD_BYTES[..]);
        assert_eq!(Repr::parse(bytes), Ok(repr()));
    }

    #[test]
    fn construct() {
        let bytes = repr().encode(&PAYLOAD_BYTES);
        assert_eq!(&bytes[..], &FRAME_BYTES[..]);
    }

    #[test]
    fn truncated() {
        assert_eq!(frame::new_checked(&FRAME_BYTES[..10]), Err(Error::Truncated));
        assert_eq!(frame::new_checked(&FRAME_BYTES[..19]), Err(Error::Truncated));
    }

    #[test]
    fn unknown_iface() {
        let mut raw = FRAME_BYTES;
        raw[0] = 7;
        let bytes = frame::new_checked(&raw[..]).unwrap();
        assert_eq!(bytes.iface(), IfaceId::Unknown(7));
        assert_eq!(Repr::parse(bytes), Err(Error::Malformed));
    }
}
