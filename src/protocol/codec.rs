// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Wire codec for protocol messages.
//!
//! ```text
//!  0                   1                   2                   3
//! |Ver| T |  TKL  |      Code     |          Message ID           |
//! |   Token (TKL bytes) ...
//! |   Options (delta/length encoded) ...
//! |1 1 1 1 1 1 1 1|    Payload ...
//! ```
//!
//! Each option starts with one byte: the high nibble is the delta from the
//! previous option number, the low nibble the value length. Nibbles 0-12 are
//! literal, 13 means one extension byte follows (+13), 14 means two extension
//! bytes follow (+269). Delta extension bytes come before length extension
//! bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::errors::{DecodeError, EncodeError};
use super::message::{
    CoapOption, Code, Message, MessageType, HEADER_SIZE, MAX_TOKEN_LENGTH, PAYLOAD_MARKER,
};

/// Default cap on the number of options in one message.
pub const DEFAULT_MAX_OPTIONS: usize = 16;
/// Default maximum serialized message size (one Ethernet MTU).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1500;

const EXT_ONE_BYTE: u8 = 13;
const EXT_TWO_BYTES: u8 = 14;
const NIBBLE_RESERVED: u8 = 15;
const ONE_BYTE_BASE: usize = 13;
const TWO_BYTES_BASE: usize = 269;
/// Largest value a nibble plus two extension bytes can express.
const MAX_EXTENDED_VALUE: usize = TWO_BYTES_BASE + u16::MAX as usize;

#[derive(Debug, Clone)]
pub struct PacketCodec {
    max_options: usize,
    max_message_size: usize,
}

impl Default for PacketCodec {
    fn default() -> Self {
        PacketCodec::new(DEFAULT_MAX_OPTIONS, DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl PacketCodec {
    pub fn new(max_options: usize, max_message_size: usize) -> Self {
        PacketCodec {
            max_options,
            max_message_size,
        }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Message id of a datagram that failed full decoding, if the fixed
    /// header is there.
    pub fn peek_message_id(datagram: &[u8]) -> Option<u16> {
        if datagram.len() < HEADER_SIZE {
            return None;
        }
        Some(u16::from_be_bytes([datagram[2], datagram[3]]))
    }

    pub fn decode(&self, datagram: &[u8]) -> Result<Message, DecodeError> {
        let len = datagram.len();
        if len < HEADER_SIZE {
            return Err(DecodeError::TooShort(len));
        }
        let mut buffer = Bytes::copy_from_slice(datagram);

        let first = buffer.get_u8();
        let version = first >> 6;
        let message_type = MessageType::from_bits(first >> 4);
        let tkl = (first & 0x0F) as usize;
        let code = Code::from(buffer.get_u8());
        let message_id = buffer.get_u16();

        if tkl > MAX_TOKEN_LENGTH || HEADER_SIZE + tkl > len {
            return Err(DecodeError::BadTokenLength { tkl, len });
        }
        let token = buffer.split_to(tkl);

        let mut options = Vec::new();
        let mut number: u32 = 0;
        while buffer.has_remaining() && buffer[0] != PAYLOAD_MARKER {
            let offset = len - buffer.remaining();
            if options.len() >= self.max_options {
                return Err(DecodeError::TooManyOptions(self.max_options));
            }
            let header = buffer.get_u8();
            let delta = read_extended(header >> 4, &mut buffer, offset)?;
            let length = read_extended(header & 0x0F, &mut buffer, offset)?;

            number = u32::try_from(delta)
                .ok()
                .and_then(|delta| number.checked_add(delta))
                .ok_or(DecodeError::OptionNumberOverflow(offset))?;

            if buffer.remaining() < length {
                return Err(DecodeError::TruncatedOption(offset));
            }
            options.push(CoapOption {
                number,
                value: buffer.split_to(length),
            });
        }

        let payload = if buffer.has_remaining() {
            // skip the marker; a marker with nothing after it is an empty payload
            buffer.advance(1);
            buffer
        } else {
            Bytes::new()
        };

        Ok(Message {
            version,
            message_type,
            code,
            message_id,
            token,
            options,
            payload,
        })
    }

    pub fn encode(&self, message: &Message) -> Result<Bytes, EncodeError> {
        let mut buffer = BytesMut::with_capacity(self.max_message_size.min(256));
        self.encode_into(message, &mut buffer)?;
        Ok(buffer.freeze())
    }

    /// Appends the encoded message to `dst` and returns the number of bytes
    /// written. On error `dst` may hold a partial message.
    pub fn encode_into(&self, message: &Message, dst: &mut BytesMut) -> Result<usize, EncodeError> {
        let token_len = message.token.len();
        if token_len > MAX_TOKEN_LENGTH {
            return Err(EncodeError::BadTokenLength(token_len));
        }
        let start = dst.len();

        dst.put_u8(
            ((message.version & 0x03) << 6)
                | (message.message_type.as_bits() << 4)
                | token_len as u8,
        );
        dst.put_u8(message.code.into());
        dst.put_u16(message.message_id);
        dst.put_slice(&message.token);

        // sort_by_key is stable, options sharing a number keep their order
        let mut options: Vec<&CoapOption> = message.options.iter().collect();
        options.sort_by_key(|opt| opt.number);

        let mut previous = 0u32;
        for option in options {
            let delta = (option.number - previous) as usize;
            let length = option.value.len();
            if delta > MAX_EXTENDED_VALUE || length > MAX_EXTENDED_VALUE {
                return Err(EncodeError::OptionTooLarge {
                    number: option.number,
                    value: delta.max(length),
                });
            }
            let (delta_nibble, delta_ext) = split_extended(delta);
            let (length_nibble, length_ext) = split_extended(length);
            dst.put_u8((delta_nibble << 4) | length_nibble);
            put_extension(dst, delta_nibble, delta_ext);
            put_extension(dst, length_nibble, length_ext);
            dst.put_slice(&option.value);
            previous = option.number;
        }

        let size = dst.len() - start;
        if size > self.max_message_size {
            return Err(EncodeError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }

        if !message.payload.is_empty() {
            let total = size + 1 + message.payload.len();
            if total > self.max_message_size {
                return Err(EncodeError::PayloadTooLarge {
                    size: total,
                    max: self.max_message_size,
                });
            }
            dst.put_u8(PAYLOAD_MARKER);
            dst.put_slice(&message.payload);
        }

        Ok(dst.len() - start)
    }
}

fn read_extended(nibble: u8, buffer: &mut Bytes, offset: usize) -> Result<usize, DecodeError> {
    match nibble {
        EXT_ONE_BYTE => {
            if buffer.remaining() < 1 {
                return Err(DecodeError::TruncatedOption(offset));
            }
            Ok(buffer.get_u8() as usize + ONE_BYTE_BASE)
        }
        EXT_TWO_BYTES => {
            if buffer.remaining() < 2 {
                return Err(DecodeError::TruncatedOption(offset));
            }
            Ok(buffer.get_u16() as usize + TWO_BYTES_BASE)
        }
        NIBBLE_RESERVED => Err(DecodeError::ReservedOptionNibble(offset)),
        literal => Ok(literal as usize),
    }
}

/// Splits a delta or length into its header nibble and the value carried in
/// extension bytes.
fn split_extended(value: usize) -> (u8, usize) {
    if value < ONE_BYTE_BASE {
        (value as u8, 0)
    } else if value < TWO_BYTES_BASE {
        (EXT_ONE_BYTE, value - ONE_BYTE_BASE)
    } else {
        (EXT_TWO_BYTES, value - TWO_BYTES_BASE)
    }
}

fn put_extension(dst: &mut BytesMut, nibble: u8, extension: usize) {
    match nibble {
        EXT_ONE_BYTE => dst.put_u8(extension as u8),
        EXT_TWO_BYTES => dst.put_u16(extension as u16),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::protocol::message::{OPTION_URI_PATH, PROTOCOL_VERSION};

    fn codec() -> PacketCodec {
        PacketCodec::default()
    }

    #[test]
    fn test_decode_minimal_get() {
        let message = codec().decode(&[0x40, 0x01, 0x12, 0x34]).unwrap();
        assert_eq!(message.version, PROTOCOL_VERSION);
        assert_eq!(message.message_type, MessageType::Confirmable);
        assert_eq!(message.code, Code::Get);
        assert_eq!(message.message_id, 0x1234);
        assert!(message.token.is_empty());
        assert!(message.options.is_empty());
        assert!(message.payload.is_empty());
    }

    #[rstest]
    #[case(&[])]
    #[case(&[0x40])]
    #[case(&[0x40, 0x01])]
    #[case(&[0x40, 0x01, 0x12])]
    fn test_decode_too_short(#[case] datagram: &[u8]) {
        assert_eq!(
            codec().decode(datagram),
            Err(DecodeError::TooShort(datagram.len()))
        );
    }

    #[rstest]
    // tkl nibble above 8
    #[case(&[0x49, 0x01, 0x00, 0x01, 1, 2, 3, 4, 5, 6, 7, 8, 9])]
    #[case(&[0x4F, 0x01, 0x00, 0x01])]
    // tkl larger than what is left in the datagram
    #[case(&[0x44, 0x01, 0x00, 0x01, 0xAA, 0xBB])]
    fn test_decode_bad_token_length(#[case] datagram: &[u8]) {
        assert!(matches!(
            codec().decode(datagram),
            Err(DecodeError::BadTokenLength { .. })
        ));
    }

    #[test]
    fn test_decode_token_options_and_payload() {
        // token 0xCAFE, Uri-Path "data", Uri-Path "1", payload "23.5"
        let datagram = [
            0x52, 0x03, 0xBE, 0xEF, 0xCA, 0xFE, 0xB4, b'd', b'a', b't', b'a', 0x01, b'1', 0xFF,
            b'2', b'3', b'.', b'5',
        ];
        let message = codec().decode(&datagram).unwrap();
        assert_eq!(message.message_type, MessageType::NonConfirmable);
        assert_eq!(message.code, Code::Put);
        assert_eq!(message.message_id, 0xBEEF);
        assert_eq!(&message.token[..], &[0xCA, 0xFE]);
        assert_eq!(
            message.options,
            vec![
                CoapOption::new(OPTION_URI_PATH, &b"data"[..]),
                CoapOption::new(OPTION_URI_PATH, &b"1"[..]),
            ]
        );
        assert_eq!(&message.payload[..], b"23.5");
    }

    #[test]
    fn test_decode_marker_without_payload() {
        let message = codec().decode(&[0x40, 0x02, 0x00, 0x09, 0xFF]).unwrap();
        assert!(message.payload.is_empty());
    }

    #[test]
    fn test_decode_extended_delta_one_byte() {
        // delta nibble 13 with extension 5 -> option 18
        let message = codec()
            .decode(&[0x40, 0x01, 0x00, 0x01, 0xD0, 0x05])
            .unwrap();
        assert_eq!(message.options, vec![CoapOption::new(18, Bytes::new())]);
    }

    #[test]
    fn test_decode_extended_delta_two_bytes() {
        // delta nibble 14 with extension 0x0102 -> 258 + 269
        let message = codec()
            .decode(&[0x40, 0x01, 0x00, 0x01, 0xE0, 0x01, 0x02])
            .unwrap();
        assert_eq!(message.options[0].number, 0x0102 + 269);
    }

    #[test]
    fn test_decode_extended_length() {
        // delta 1, length nibble 13 with extension 2 -> 15 value bytes
        let mut datagram = vec![0x40, 0x01, 0x00, 0x01, 0x1D, 0x02];
        datagram.extend_from_slice(&[0x61; 15]);
        let message = codec().decode(&datagram).unwrap();
        assert_eq!(message.options[0].number, 1);
        assert_eq!(message.options[0].value.len(), 15);

        // length nibble 14 with extension 0x0001 -> 270 value bytes
        let mut datagram = vec![0x40, 0x01, 0x00, 0x01, 0x1E, 0x00, 0x01];
        datagram.extend_from_slice(&[0x62; 270]);
        let message = codec().decode(&datagram).unwrap();
        assert_eq!(message.options[0].value.len(), 270);
    }

    #[test]
    fn test_decode_both_nibbles_extended() {
        // delta ext byte comes first, then the length ext byte
        let mut datagram = vec![0x40, 0x01, 0x00, 0x01, 0xDD, 0x00, 0x00];
        datagram.extend_from_slice(&[0x63; 13]);
        let message = codec().decode(&datagram).unwrap();
        assert_eq!(message.options[0].number, 13);
        assert_eq!(message.options[0].value.len(), 13);
    }

    #[test]
    fn test_decode_option_numbers_accumulate() {
        // deltas 11, 0, 4 -> numbers 11, 11, 15
        let datagram = [
            0x40, 0x01, 0x00, 0x01, 0xB1, b'a', 0x01, b'b', 0x41, b'c',
        ];
        let numbers: Vec<u32> = codec()
            .decode(&datagram)
            .unwrap()
            .options
            .iter()
            .map(|opt| opt.number)
            .collect();
        assert_eq!(numbers, vec![11, 11, 15]);
    }

    #[rstest]
    // one-byte delta extension missing
    #[case(&[0x40, 0x01, 0x00, 0x01, 0xD0])]
    // two-byte delta extension cut in half
    #[case(&[0x40, 0x01, 0x00, 0x01, 0xE0, 0x01])]
    // length extension missing
    #[case(&[0x40, 0x01, 0x00, 0x01, 0x1D])]
    // value shorter than its length
    #[case(&[0x40, 0x01, 0x00, 0x01, 0xB4, b'd', b'a'])]
    fn test_decode_truncated_option(#[case] datagram: &[u8]) {
        assert_eq!(
            codec().decode(datagram),
            Err(DecodeError::TruncatedOption(4))
        );
    }

    #[rstest]
    #[case(&[0x40, 0x01, 0x00, 0x01, 0xF0])]
    #[case(&[0x40, 0x01, 0x00, 0x01, 0x1F])]
    fn test_decode_reserved_nibble(#[case] datagram: &[u8]) {
        assert_eq!(
            codec().decode(datagram),
            Err(DecodeError::ReservedOptionNibble(4))
        );
    }

    #[test]
    fn test_decode_too_many_options() {
        let codec = PacketCodec::new(2, DEFAULT_MAX_MESSAGE_SIZE);
        let two = [0x40, 0x01, 0x00, 0x01, 0x10, 0x10];
        assert_eq!(codec.decode(&two).unwrap().options.len(), 2);

        let three = [0x40, 0x01, 0x00, 0x01, 0x10, 0x10, 0x10];
        assert_eq!(codec.decode(&three), Err(DecodeError::TooManyOptions(2)));
    }

    #[test]
    fn test_encode_minimal() {
        let message = Message::new(MessageType::Acknowledgement, Code::BadRequest, 0x1234);
        let encoded = codec().encode(&message).unwrap();
        assert_eq!(&encoded[..], &[0x60, 0x80, 0x12, 0x34]);
    }

    #[test]
    fn test_encode_reports_byte_count() {
        let message = Message::new(MessageType::Acknowledgement, Code::Content, 1)
            .with_token(&b"tk"[..])
            .with_payload(&b"Hola CoAP!"[..]);
        let mut buffer = BytesMut::new();
        let written = codec().encode_into(&message, &mut buffer).unwrap();
        assert_eq!(written, 4 + 2 + 1 + 10);
        assert_eq!(buffer.len(), written);
    }

    #[test]
    fn test_encode_sorts_options() {
        let message = Message::new(MessageType::Confirmable, Code::Get, 1)
            .with_option(15, &b"q"[..])
            .with_option(11, &b"a"[..])
            .with_option(11, &b"b"[..]);
        let encoded = codec().encode(&message).unwrap();
        assert_eq!(
            &encoded[4..],
            &[0xB1, b'a', 0x01, b'b', 0x41, b'q']
        );
    }

    #[test]
    fn test_encode_extended_option() {
        let message = Message::new(MessageType::Confirmable, Code::Get, 1)
            .with_option(300, vec![0x7A; 20]);
        let encoded = codec().encode(&message).unwrap();
        // delta 300 -> nibble 14 + (31), length 20 -> nibble 13 + (7)
        assert_eq!(&encoded[4..8], &[0xED, 0x00, 31, 7]);
        assert_eq!(encoded.len(), 8 + 20);
    }

    #[test]
    fn test_encode_bad_token_length() {
        let message =
            Message::new(MessageType::Confirmable, Code::Get, 1).with_token(vec![0u8; 9]);
        assert_eq!(
            codec().encode(&message),
            Err(EncodeError::BadTokenLength(9))
        );
    }

    #[test]
    fn test_encode_payload_too_large() {
        let codec = PacketCodec::new(DEFAULT_MAX_OPTIONS, 16);
        let fits = Message::new(MessageType::Acknowledgement, Code::Content, 1)
            .with_payload(vec![b'x'; 11]);
        assert_eq!(codec.encode(&fits).unwrap().len(), 16);

        let too_big = fits.clone().with_payload(vec![b'x'; 12]);
        assert_eq!(
            codec.encode(&too_big),
            Err(EncodeError::PayloadTooLarge { size: 17, max: 16 })
        );
    }

    #[test]
    fn test_encode_option_too_large() {
        let message = Message::new(MessageType::Confirmable, Code::Get, 1)
            .with_option(MAX_EXTENDED_VALUE as u32 + 1, Bytes::new());
        assert!(matches!(
            codec().encode(&message),
            Err(EncodeError::OptionTooLarge { .. })
        ));
    }

    #[test]
    fn test_round_trip() {
        let messages = vec![
            Message::new(MessageType::Confirmable, Code::Get, 0),
            Message::new(MessageType::NonConfirmable, Code::Post, 0xFFFF)
                .with_token(vec![1, 2, 3, 4, 5, 6, 7, 8])
                .with_payload(&b"21.0"[..]),
            Message::new(MessageType::Acknowledgement, Code::Unknown(0x85), 42)
                .with_token(&b"t"[..])
                .with_option(1, Bytes::new())
                .with_option(11, &b"data"[..])
                .with_option(11, &b"17"[..])
                .with_option(24, vec![9u8; 13])
                .with_option(293, vec![8u8; 269])
                .with_option(65_000, &b"z"[..])
                .with_payload(&b"payload"[..]),
            Message::reset(7),
        ];
        let codec = codec();
        for message in messages {
            let encoded = codec.encode(&message).unwrap();
            assert_eq!(codec.decode(&encoded).unwrap(), message);
        }
    }

    #[test]
    fn test_round_trip_keeps_bad_version() {
        let mut message = Message::new(MessageType::Confirmable, Code::Get, 5);
        message.version = 2;
        let encoded = codec().encode(&message).unwrap();
        assert_eq!(encoded[0] >> 6, 2);
        assert_eq!(codec().decode(&encoded).unwrap().version, 2);
    }

    #[test]
    fn test_peek_message_id() {
        assert_eq!(PacketCodec::peek_message_id(&[0x80, 0x01, 0xAB, 0xCD]), Some(0xABCD));
        assert_eq!(PacketCodec::peek_message_id(&[0x40, 0x01, 0xAB]), None);
    }
}
