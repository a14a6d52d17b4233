//! OSC packet encoding and decoding
//!
//! Structured encoder/decoder for single-message bundles. Decoding is
//! strict: any framing violation fails the whole datagram, never a
//! partial argument list.

use bytes::{BufMut, BytesMut};

use kontrol_core::{KontrolError, KontrolResult};

use crate::OscArg;

/// Maximum datagram size. Oversized encodings are truncated at the
/// send boundary, never split across datagrams.
pub const MAX_PACKET_SIZE: usize = 512;

const BUNDLE_TAG: &[u8; 8] = b"#bundle\0";

/// OSC "execute immediately" time tag.
const TIME_TAG_IMMEDIATE: u64 = 1;

fn put_padded_str(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
    while buf.len() % 4 != 0 {
        buf.put_u8(0);
    }
}

/// Encodes a bare OSC message: padded address, type tag string, arguments.
pub fn encode_message(address: &str, args: &[OscArg]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    put_padded_str(&mut buf, address);

    let mut tags = String::with_capacity(args.len() + 1);
    tags.push(',');
    for arg in args {
        tags.push(arg.type_tag() as char);
    }
    put_padded_str(&mut buf, &tags);

    for arg in args {
        match arg {
            OscArg::Int(v) => buf.put_i32(*v),
            OscArg::Float(v) => buf.put_f32(*v),
            OscArg::Str(s) => put_padded_str(&mut buf, s),
        }
    }
    buf.to_vec()
}

/// Encodes a message wrapped in an immediate single-element bundle,
/// the atomic send unit of the protocol.
pub fn encode_bundle(address: &str, args: &[OscArg]) -> Vec<u8> {
    let msg = encode_message(address, args);
    let mut buf = BytesMut::with_capacity(BUNDLE_TAG.len() + 12 + msg.len());
    buf.put_slice(BUNDLE_TAG);
    buf.put_u64(TIME_TAG_IMMEDIATE);
    buf.put_i32(msg.len() as i32);
    buf.put_slice(&msg);
    buf.to_vec()
}

/// Decodes one datagram into its address and argument list.
///
/// Accepts either a single-element bundle or a bare message.
pub fn decode_packet(buf: &[u8]) -> KontrolResult<(String, Vec<OscArg>)> {
    if buf.starts_with(BUNDLE_TAG) {
        let mut r = Reader::new(buf);
        r.take(BUNDLE_TAG.len())?;
        r.u64()?; // time tag; always applied immediately
        let size = r.i32()?;
        if size < 0 {
            return Err(KontrolError::InvalidWireFormat(
                "negative bundle element size".to_string(),
            ));
        }
        let element = r.take(size as usize)?;
        decode_message(element)
    } else {
        decode_message(buf)
    }
}

fn decode_message(buf: &[u8]) -> KontrolResult<(String, Vec<OscArg>)> {
    let mut r = Reader::new(buf);

    let address = r.padded_str()?;
    if !address.starts_with('/') {
        return Err(KontrolError::InvalidWireFormat(format!(
            "address does not start with '/': {address}"
        )));
    }

    let tags = r.padded_str()?;
    let Some(tags) = tags.strip_prefix(',') else {
        return Err(KontrolError::InvalidWireFormat(
            "type tag string does not start with ','".to_string(),
        ));
    };

    let mut args = Vec::with_capacity(tags.len());
    for tag in tags.chars() {
        let arg = match tag {
            'i' => OscArg::Int(r.i32()?),
            'f' => OscArg::Float(f32::from_bits(r.u32()?)),
            's' => OscArg::Str(r.padded_str()?),
            other => {
                return Err(KontrolError::InvalidWireFormat(format!(
                    "unsupported type tag '{other}'"
                )))
            }
        };
        args.push(arg);
    }

    Ok((address, args))
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> KontrolResult<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.buf.len());
        match end {
            Some(end) => {
                let out = &self.buf[self.pos..end];
                self.pos = end;
                Ok(out)
            }
            None => Err(KontrolError::BufferTooShort {
                expected: self.pos + n,
                actual: self.buf.len(),
            }),
        }
    }

    fn u32(&mut self) -> KontrolResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> KontrolResult<i32> {
        Ok(self.u32()? as i32)
    }

    fn u64(&mut self) -> KontrolResult<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Reads a null-terminated string padded to a 4-byte boundary.
    fn padded_str(&mut self) -> KontrolResult<String> {
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| KontrolError::InvalidWireFormat(
                "unterminated string".to_string(),
            ))?;
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|_| KontrolError::InvalidWireFormat("non-utf8 string".to_string()))?
            .to_string();
        let padded = (nul + 4) & !3;
        self.take(padded)?;
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_message_field_padding() {
        let msg = encode_message("/Kontrol/ping", &[OscArg::Int(9000), OscArg::Int(5)]);
        // "/Kontrol/ping" is 13 bytes -> padded to 16, ",ii" -> 4, args 8
        assert_eq!(msg.len(), 28);
        assert_eq!(&msg[..13], b"/Kontrol/ping");
        assert_eq!(&msg[13..16], &[0, 0, 0]);
        assert_eq!(&msg[16..20], b",ii\0");
    }

    #[test]
    fn test_bundle_framing() {
        let packet = encode_bundle("/Kontrol/saveSettings", &[OscArg::from("r1")]);
        assert!(packet.starts_with(b"#bundle\0"));
        // immediate time tag
        assert_eq!(&packet[8..16], &[0, 0, 0, 0, 0, 0, 0, 1]);
        let size = i32::from_be_bytes(packet[16..20].try_into().unwrap()) as usize;
        assert_eq!(size, packet.len() - 20);
    }

    #[test]
    fn test_packet_roundtrip() {
        let args = vec![
            OscArg::from("rack:9000"),
            OscArg::Float(0.25),
            OscArg::Int(-3),
            OscArg::from(""),
        ];
        let packet = encode_bundle("/Kontrol/param", &args);
        let (address, decoded) = decode_packet(&packet).unwrap();
        assert_eq!(address, "/Kontrol/param");
        assert_eq!(decoded, args);
    }

    #[test]
    fn test_bare_message_accepted() {
        let msg = encode_message("/Kontrol/ping", &[OscArg::Int(9000), OscArg::Int(0)]);
        let (address, args) = decode_packet(&msg).unwrap();
        assert_eq!(address, "/Kontrol/ping");
        assert_eq!(args, vec![OscArg::Int(9000), OscArg::Int(0)]);
    }

    #[test]
    fn test_truncated_packet_rejected() {
        let packet = encode_bundle("/Kontrol/ping", &[OscArg::Int(9000), OscArg::Int(5)]);
        for len in [3, 12, 19, packet.len() - 1] {
            assert!(decode_packet(&packet[..len]).is_err());
        }
    }

    #[test]
    fn test_bad_address_rejected() {
        let msg = encode_message("Kontrol/ping", &[]);
        assert!(decode_packet(&msg).is_err());
    }

    #[test]
    fn test_unsupported_tag_rejected() {
        // hand-built message with a blob tag
        let mut msg = Vec::new();
        msg.extend_from_slice(b"/K\0\0");
        msg.extend_from_slice(b",b\0\0");
        msg.extend_from_slice(&[0, 0, 0, 0]);
        assert!(decode_packet(&msg).is_err());
    }

    proptest! {
        #[test]
        fn prop_message_roundtrip(
            ints in prop::collection::vec(any::<i32>(), 0..4),
            floats in prop::collection::vec(any::<f32>(), 0..4),
            strs in prop::collection::vec("[a-zA-Z0-9:/_ ]{0,24}", 0..4),
        ) {
            let mut args: Vec<OscArg> = Vec::new();
            args.extend(ints.into_iter().map(OscArg::Int));
            args.extend(floats.into_iter().map(OscArg::Float));
            args.extend(strs.into_iter().map(OscArg::Str));

            let packet = encode_bundle("/Kontrol/test", &args);
            let (address, decoded) = decode_packet(&packet).unwrap();
            prop_assert_eq!(address, "/Kontrol/test");
            prop_assert_eq!(decoded.len(), args.len());
            for (d, a) in decoded.iter().zip(args.iter()) {
                match (d, a) {
                    // bit-exact float comparison, NaN included
                    (OscArg::Float(x), OscArg::Float(y)) => {
                        prop_assert_eq!(x.to_bits(), y.to_bits())
                    }
                    _ => prop_assert_eq!(d, a),
                }
            }
        }
    }
}
