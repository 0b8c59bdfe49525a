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

use crate::protocol::{Code, Message};

use super::api::{DeleteRequest, GetRequest, PostRequest, PutRequest};
use super::{ApiRequest, ApplicationError, ApplicationResult, RequestLimits};

impl ApiRequest {
    /// Maps a validated message onto one of the four operations, checking
    /// the routing id and payload each one needs.
    pub fn parse_from(message: &Message, limits: &RequestLimits) -> ApplicationResult<Self> {
        match message.code {
            Code::Get => Ok(ApiRequest::Get(GetRequest {
                id: routing_id(message, limits)?,
            })),
            Code::Post => Ok(ApiRequest::Post(PostRequest {
                value: payload_value(message, limits)?,
            })),
            Code::Put => {
                let id = routing_id(message, limits)?;
                let value = payload_value(message, limits)?;
                Ok(ApiRequest::Put(PutRequest { id, value }))
            }
            Code::Delete => Ok(ApiRequest::Delete(DeleteRequest {
                id: routing_id(message, limits)?,
            })),
            other => Err(ApplicationError::UnsupportedMethod(other)),
        }
    }
}

/// First path-id option whose value is a plain decimal number in
/// `1..=u32::MAX` and no longer than the configured URI length. Segments
/// that are not numbers are skipped, so `data/1` routes to 1.
pub fn routing_id(message: &Message, limits: &RequestLimits) -> ApplicationResult<u32> {
    message
        .options_by_number(limits.path_id_option)
        .find_map(|opt| {
            let value = opt.value.as_ref();
            if value.is_empty()
                || value.len() > limits.max_uri_length
                || !value.iter().all(u8::is_ascii_digit)
            {
                return None;
            }
            std::str::from_utf8(value)
                .ok()?
                .parse::<u32>()
                .ok()
                .filter(|id| *id > 0)
        })
        .ok_or(ApplicationError::MissingOrInvalidRoutingId)
}

/// The payload as a stored value: non-empty, within the size limit, UTF-8.
pub fn payload_value(message: &Message, limits: &RequestLimits) -> ApplicationResult<String> {
    let payload = &message.payload;
    if payload.is_empty() {
        return Err(ApplicationError::EmptyPayload);
    }
    if payload.len() > limits.max_payload_size {
        return Err(ApplicationError::PayloadTooLarge {
            size: payload.len(),
            max: limits.max_payload_size,
        });
    }
    String::from_utf8(payload.to_vec()).map_err(|_| ApplicationError::InvalidPayloadEncoding)
}
