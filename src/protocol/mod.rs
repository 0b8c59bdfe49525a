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

//! Protocol Module
//!
//! Binary message format of the sensor server: a 4 byte fixed header, an
//! optional token of up to 8 bytes, delta-encoded options and an optional
//! payload after a 0xFF marker.
//!
//! - `Message`, `MessageType`, `Code`, `CoapOption`: the decoded form
//! - `PacketCodec`: decode/encode between datagrams and messages
//! - `MessageValidator`: version and token length checks done before dispatch

pub use codec::{PacketCodec, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MAX_OPTIONS};
pub use errors::{DecodeError, EncodeError, ValidationError};
pub use message::{
    CoapOption, Code, Message, MessageType, HEADER_SIZE, MAX_TOKEN_LENGTH, OPTION_URI_PATH,
    PAYLOAD_MARKER, PROTOCOL_VERSION,
};
pub use validator::MessageValidator;

mod codec;
mod errors;
mod message;
mod validator;
