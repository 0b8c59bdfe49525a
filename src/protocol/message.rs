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

use std::fmt;

use bytes::Bytes;

/// The only protocol version this engine accepts or emits.
pub const PROTOCOL_VERSION: u8 = 1;
/// Upper bound of the token length nibble.
pub const MAX_TOKEN_LENGTH: usize = 8;
/// Fixed header: ver/type/tkl, code, message id (2 bytes).
pub const HEADER_SIZE: usize = 4;
/// Separates the option list from the payload.
pub const PAYLOAD_MARKER: u8 = 0xFF;
/// Uri-Path, used as the "path id" routing option.
pub const OPTION_URI_PATH: u32 = 11;

/// Represents the reliability class of a message.
///
/// Requests are either `Confirmable` (the client expects an acknowledgement)
/// or `NonConfirmable`. Responses to confirmable requests are sent as
/// `Acknowledgement`, and `Reset` signals that a message could not be
/// processed at the protocol level.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MessageType {
    Confirmable = 0,
    NonConfirmable = 1,
    Acknowledgement = 2,
    Reset = 3,
}

impl MessageType {
    /// Every 2-bit value maps to a type, so this cannot fail.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => MessageType::Confirmable,
            1 => MessageType::NonConfirmable,
            2 => MessageType::Acknowledgement,
            _ => MessageType::Reset,
        }
    }

    pub fn as_bits(&self) -> u8 {
        *self as u8
    }
}

/// Request methods and response statuses.
///
/// Codes outside the set this server understands are kept as `Unknown` so a
/// decoded message encodes back to the exact same bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Code {
    Empty,
    Get,
    Post,
    Put,
    Delete,
    Created,
    Deleted,
    Valid,
    Changed,
    Content,
    BadRequest,
    Unknown(u8),
}

impl From<u8> for Code {
    fn from(value: u8) -> Self {
        match value {
            0 => Code::Empty,
            1 => Code::Get,
            2 => Code::Post,
            3 => Code::Put,
            4 => Code::Delete,
            65 => Code::Created,
            66 => Code::Deleted,
            67 => Code::Valid,
            68 => Code::Changed,
            69 => Code::Content,
            128 => Code::BadRequest,
            other => Code::Unknown(other),
        }
    }
}

impl From<Code> for u8 {
    fn from(code: Code) -> Self {
        match code {
            Code::Empty => 0,
            Code::Get => 1,
            Code::Post => 2,
            Code::Put => 3,
            Code::Delete => 4,
            Code::Created => 65,
            Code::Deleted => 66,
            Code::Valid => 67,
            Code::Changed => 68,
            Code::Content => 69,
            Code::BadRequest => 128,
            Code::Unknown(other) => other,
        }
    }
}

impl fmt::Display for Code {
    // class.detail notation, e.g. 2.05 for Content
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw = u8::from(*self);
        write!(f, "{}.{:02}", raw >> 5, raw & 0x1F)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapOption {
    pub number: u32,
    pub value: Bytes,
}

impl CoapOption {
    pub fn new(number: u32, value: impl Into<Bytes>) -> Self {
        CoapOption {
            number,
            value: value.into(),
        }
    }
}

/// A decoded protocol message.
///
/// `payload` is empty both when no payload marker was present and when the
/// marker was the last byte of the datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub version: u8,
    pub message_type: MessageType,
    pub code: Code,
    pub message_id: u16,
    pub token: Bytes,
    pub options: Vec<CoapOption>,
    pub payload: Bytes,
}

impl Message {
    pub fn new(message_type: MessageType, code: Code, message_id: u16) -> Self {
        Message {
            version: PROTOCOL_VERSION,
            message_type,
            code,
            message_id,
            token: Bytes::new(),
            options: Vec::new(),
            payload: Bytes::new(),
        }
    }

    pub fn with_token(mut self, token: impl Into<Bytes>) -> Self {
        self.token = token.into();
        self
    }

    pub fn with_option(mut self, number: u32, value: impl Into<Bytes>) -> Self {
        self.options.push(CoapOption::new(number, value));
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Empty Reset addressed to `message_id`, sent when a datagram cannot be
    /// processed at the protocol level.
    pub fn reset(message_id: u16) -> Self {
        Message::new(MessageType::Reset, Code::Empty, message_id)
    }

    /// Starts the response to this request: same message id and token,
    /// `NonConfirmable` for non-confirmable requests, `Acknowledgement`
    /// otherwise.
    pub fn response(&self, code: Code) -> Self {
        let message_type = match self.message_type {
            MessageType::NonConfirmable => MessageType::NonConfirmable,
            _ => MessageType::Acknowledgement,
        };
        Message::new(message_type, code, self.message_id).with_token(self.token.clone())
    }

    pub fn token_length(&self) -> usize {
        self.token.len()
    }

    pub fn options_by_number(&self, number: u32) -> impl Iterator<Item = &CoapOption> {
        self.options.iter().filter(move |opt| opt.number == number)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, Code::Empty)]
    #[case(1, Code::Get)]
    #[case(4, Code::Delete)]
    #[case(69, Code::Content)]
    #[case(128, Code::BadRequest)]
    #[case(7, Code::Unknown(7))]
    fn test_code_from_wire(#[case] raw: u8, #[case] code: Code) {
        assert_eq!(Code::from(raw), code);
        assert_eq!(u8::from(code), raw);
    }

    #[test]
    fn test_code_display() {
        assert_eq!(Code::Content.to_string(), "2.05");
        assert_eq!(Code::BadRequest.to_string(), "4.00");
        assert_eq!(Code::Get.to_string(), "0.01");
    }

    #[test]
    fn test_response_type_follows_request() {
        let con = Message::new(MessageType::Confirmable, Code::Get, 7).with_token(&b"ab"[..]);
        let resp = con.response(Code::Content);
        assert_eq!(resp.message_type, MessageType::Acknowledgement);
        assert_eq!(resp.message_id, 7);
        assert_eq!(resp.token, Bytes::from_static(b"ab"));

        let non = Message::new(MessageType::NonConfirmable, Code::Get, 8);
        assert_eq!(
            non.response(Code::Content).message_type,
            MessageType::NonConfirmable
        );
    }

    #[test]
    fn test_reset_is_empty() {
        let rst = Message::reset(0x1234);
        assert_eq!(rst.message_type, MessageType::Reset);
        assert_eq!(rst.code, Code::Empty);
        assert!(rst.token.is_empty());
        assert!(rst.options.is_empty());
        assert!(rst.payload.is_empty());
    }
}
