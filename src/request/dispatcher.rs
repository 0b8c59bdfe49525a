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
use tracing::{debug, trace};

use crate::protocol::{Code, Message};
use crate::request::api::{
    ApiHandler, DeleteRequestHandler, GetRequestHandler, PostRequestHandler, PutRequestHandler,
    Reply,
};
use crate::request::{ApiRequest, ApplicationResult, RequestContext};

/// general async handler
async fn execute_handler<H>(
    handler: H,
    request: H::Request,
    context: &RequestContext,
) -> ApplicationResult<Reply>
where
    H: ApiHandler + Sync,
{
    handler.handle_request(request, context).await
}

pub struct RequestDispatcher;

impl RequestDispatcher {
    /// Serves one validated request and returns its response. Every failure
    /// becomes an empty BadRequest; the response always carries the
    /// request's message id and token.
    pub async fn dispatch(context: RequestContext) -> Message {
        trace!(
            "Dispatching {} mid={} from {}",
            context.request.code,
            context.request.message_id,
            context.peer
        );
        let result = match ApiRequest::parse_from(&context.request, &context.limits) {
            Ok(request) => Self::process_request(request, &context).await,
            Err(err) => Err(err),
        };

        let mut response = context.response;
        match result {
            Ok(reply) => {
                response.code = reply.code;
                response.payload = reply.payload;
            }
            Err(err) => {
                debug!(
                    "{} mid={} from {} rejected: {err}",
                    context.request.code, context.request.message_id, context.peer
                );
                response.code = Code::BadRequest;
                response.payload = Bytes::new();
            }
        }
        response
    }

    async fn process_request(
        request: ApiRequest,
        context: &RequestContext,
    ) -> ApplicationResult<Reply> {
        match request {
            ApiRequest::Get(request) => execute_handler(GetRequestHandler, request, context).await,
            ApiRequest::Post(request) => {
                execute_handler(PostRequestHandler, request, context).await
            }
            ApiRequest::Put(request) => execute_handler(PutRequestHandler, request, context).await,
            ApiRequest::Delete(request) => {
                execute_handler(DeleteRequestHandler, request, context).await
            }
        }
    }
}
