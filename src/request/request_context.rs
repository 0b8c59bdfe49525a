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
use std::net::SocketAddr;
use std::sync::Arc;

use crate::protocol::{Code, Message, OPTION_URI_PATH};
use crate::service::ProtocolConfig;
use crate::storage::{SensorStore, StorageResult};

use super::{ApplicationError, ApplicationResult};

/// Request-level limits, taken from the `[protocol]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    pub max_payload_size: usize,
    pub max_uri_length: usize,
    pub path_id_option: u32,
}

impl Default for RequestLimits {
    fn default() -> Self {
        RequestLimits {
            max_payload_size: 100,
            max_uri_length: 32,
            path_id_option: OPTION_URI_PATH,
        }
    }
}

impl From<&ProtocolConfig> for RequestLimits {
    fn from(config: &ProtocolConfig) -> Self {
        RequestLimits {
            max_payload_size: config.max_payload_size,
            max_uri_length: config.max_uri_length,
            path_id_option: config.path_id_option,
        }
    }
}

/// One inbound request together with the response being built for it.
///
/// The response starts as an empty BadRequest that already echoes the
/// request's message id and token; handlers only set code and payload.
pub struct RequestContext {
    pub peer: SocketAddr,
    pub request: Message,
    pub response: Message,
    pub limits: RequestLimits,
    store: Arc<dyn SensorStore>,
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("peer", &self.peer)
            .field("request", &self.request)
            .field("response", &self.response)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl RequestContext {
    pub fn new(
        peer: SocketAddr,
        request: Message,
        store: Arc<dyn SensorStore>,
        limits: RequestLimits,
    ) -> Self {
        let response = request.response(Code::BadRequest);
        RequestContext {
            peer,
            request,
            response,
            limits,
            store,
        }
    }

    /// Runs one storage call on the blocking pool. A store that panics is
    /// reported as a storage failure.
    pub async fn with_store<F, R>(&self, op: F) -> ApplicationResult<R>
    where
        F: FnOnce(&dyn SensorStore) -> StorageResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || op(store.as_ref())).await {
            Ok(result) => result.map_err(ApplicationError::from),
            Err(join_error) => Err(ApplicationError::StorageFailure(join_error.to_string())),
        }
    }
}
