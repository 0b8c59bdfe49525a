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

pub mod api;
mod api_request;
mod dispatcher;
mod errors;
mod request_context;

pub use api_request::{payload_value, routing_id};
pub use dispatcher::RequestDispatcher;
pub use errors::{ApplicationError, ApplicationResult};
pub use request_context::{RequestContext, RequestLimits};

use api::{DeleteRequest, GetRequest, PostRequest, PutRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiRequest {
    Get(GetRequest),
    Post(PostRequest),
    Put(PutRequest),
    Delete(DeleteRequest),
}
