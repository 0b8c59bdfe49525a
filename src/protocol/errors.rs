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

use thiserror::Error;

/// A datagram that cannot be turned into a `Message`.
///
/// Never fatal: the server answers with a Reset when it can address one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("datagram too short: {0} bytes")]
    TooShort(usize),

    #[error("bad token length: {tkl} (datagram is {len} bytes)")]
    BadTokenLength { tkl: usize, len: usize },

    #[error("truncated option at offset {0}")]
    TruncatedOption(usize),

    #[error("too many options, limit is {0}")]
    TooManyOptions(usize),

    #[error("reserved option nibble 15 at offset {0}")]
    ReservedOptionNibble(usize),

    #[error("option number overflow at offset {0}")]
    OptionNumberOverflow(usize),
}

/// A `Message` that cannot be serialized. The response is dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("payload too large: {size} bytes would exceed {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("bad token length: {0}")]
    BadTokenLength(usize),

    #[error("option {number} cannot be encoded: delta or length {value} too large")]
    OptionTooLarge { number: u32, value: usize },

    #[error("message too large: {size} bytes exceeds {max}")]
    MessageTooLarge { size: usize, max: usize },
}

/// Protocol-level conformance failures of a decoded message.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unsupported protocol version: {0}")]
    BadVersion(u8),

    #[error("bad token length: {0}")]
    BadTokenLength(usize),
}
