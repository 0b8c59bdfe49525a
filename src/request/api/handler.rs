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

use bytes::Bytes;

use crate::protocol::Code;
use crate::request::{ApplicationResult, RequestContext};

/// Code and payload a handler produced; the dispatcher copies them into the
/// context's response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: Code,
    pub payload: Bytes,
}

impl Reply {
    pub fn new(code: Code) -> Self {
        Reply {
            code,
            payload: Bytes::new(),
        }
    }

    pub fn with_payload(code: Code, payload: impl Into<Bytes>) -> Self {
        Reply {
            code,
            payload: payload.into(),
        }
    }
}

pub trait ApiHandler {
    type Request: Send + 'static;

    // serve one request against the context's store
    fn handle_request(
        &self,
        request: Self::Request,
        context: &RequestContext,
    ) -> impl std::future::Future<Output = ApplicationResult<Reply>> + Send;
}
