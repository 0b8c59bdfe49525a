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

use tracing::{debug, instrument};

use crate::protocol::Code;
use crate::request::{ApplicationResult, RequestContext};

use super::{ApiHandler, Reply};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRequest {
    pub id: u32,
}

pub struct GetRequestHandler;

impl ApiHandler for GetRequestHandler {
    type Request = GetRequest;

    #[instrument(skip(self, context))]
    async fn handle_request(
        &self,
        request: GetRequest,
        context: &RequestContext,
    ) -> ApplicationResult<Reply> {
        let id = request.id;
        let value = context.with_store(move |store| store.get(id)).await?;
        debug!("read record {id}");
        Ok(Reply::with_payload(Code::Content, value))
    }
}
