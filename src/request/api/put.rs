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
pub struct PutRequest {
    pub id: u32,
    pub value: String,
}

pub struct PutRequestHandler;

impl ApiHandler for PutRequestHandler {
    type Request = PutRequest;

    #[instrument(skip(self, context))]
    async fn handle_request(
        &self,
        request: PutRequest,
        context: &RequestContext,
    ) -> ApplicationResult<Reply> {
        let PutRequest { id, value } = request;
        context
            .with_store(move |store| store.update(id, &value))
            .await?;
        debug!("updated record {id}");
        Ok(Reply::new(Code::Changed))
    }
}
