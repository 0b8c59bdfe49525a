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

use crate::protocol::Code;
use crate::storage::StorageError;

pub type ApplicationResult<T> = Result<T, ApplicationError>;

/// Why a well-formed request could not be served. Every variant is answered
/// with BadRequest; the variant itself only shows up in the log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("missing or invalid routing id")]
    MissingOrInvalidRoutingId,

    #[error("payload of {size} bytes exceeds {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("empty payload")]
    EmptyPayload,

    #[error("payload is not valid UTF-8")]
    InvalidPayloadEncoding,

    #[error("record {0} not found")]
    NotFound(u32),

    #[error("unsupported method code {0}")]
    UnsupportedMethod(Code),

    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl From<StorageError> for ApplicationError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => ApplicationError::NotFound(id),
            other => ApplicationError::StorageFailure(other.to_string()),
        }
    }
}
