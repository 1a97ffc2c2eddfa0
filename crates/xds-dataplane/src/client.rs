//! Node side of a discovery stream.
//!
//! [`DiscoveryClient`] turns each received response into the request that
//! answers it. A response is decoded and applied to the local store as a
//! whole; if any part of that fails nothing is applied and the answer is a
//! NACK carrying the last good version.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::{Stream, StreamExt};
use metrics::counter;
use tokio::sync::mpsc;
use tonic::Status;
use tracing::{debug, info, warn};
use xds_cache::{ApplyOutcome, ResourceVersionStore};
use xds_core::{Node, ResourceRegistry, TypeUrl, XdsError, XdsResult};
use xds_types::envoy::config::core::v3::Node as WireNode;
use xds_types::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};
use xds_types::google::rpc::Status as RpcStatus;

/// `google.rpc.Code.INVALID_ARGUMENT`, carried in every NACK.
const INVALID_ARGUMENT: i32 = 3;

/// How a response was answered.
#[derive(Debug)]
pub enum ResponseDisposition {
    /// Applied; the request acknowledges the new version.
    Ack(DiscoveryRequest),
    /// Rejected; the request carries the prior version and the error.
    Nack {
        /// Request to send back.
        request: DiscoveryRequest,
        /// Why the response was rejected.
        error: XdsError,
    },
}

impl ResponseDisposition {
    /// Whether the response was accepted.
    #[must_use]
    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack(_))
    }

    /// The request answering the response.
    #[must_use]
    pub fn request(&self) -> &DiscoveryRequest {
        match self {
            Self::Ack(request) | Self::Nack { request, .. } => request,
        }
    }

    /// Take the request answering the response.
    #[must_use]
    pub fn into_request(self) -> DiscoveryRequest {
        match self {
            Self::Ack(request) | Self::Nack { request, .. } => request,
        }
    }
}

/// Discovery client applying pushes to a local store.
#[derive(Debug)]
pub struct DiscoveryClient {
    node: WireNode,
    store: Arc<ResourceVersionStore>,
    registry: Arc<ResourceRegistry>,
    subscriptions: Mutex<HashMap<TypeUrl, Vec<String>>>,
}

impl DiscoveryClient {
    /// Create a client for `node` applying into `store`.
    pub fn new(
        node: &Node,
        store: Arc<ResourceVersionStore>,
        registry: Arc<ResourceRegistry>,
    ) -> Self {
        Self {
            node: node.into(),
            store,
            registry,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// The local store.
    #[inline]
    pub fn store(&self) -> &Arc<ResourceVersionStore> {
        &self.store
    }

    /// First request for `type_url`.
    ///
    /// Carries whatever version the local store already holds, so a
    /// reconnect resumes instead of starting over. Empty `names` subscribes
    /// to every resource of the type.
    pub fn initial_request(&self, type_url: &str, names: Vec<String>) -> DiscoveryRequest {
        self.subscriptions
            .lock()
            .expect("subscription lock poisoned")
            .insert(TypeUrl::new(type_url), names.clone());
        DiscoveryRequest {
            version_info: self.store.version(type_url).into_inner(),
            node: Some(self.node.clone()),
            resource_names: names,
            type_url: type_url.to_string(),
            response_nonce: String::new(),
            error_detail: None,
        }
    }

    /// Apply `response` and build the ACK or NACK answering it.
    pub fn handle_response(&self, response: &DiscoveryResponse) -> ResponseDisposition {
        let type_url = response.type_url.as_str();
        let resource_names = self
            .subscriptions
            .lock()
            .expect("subscription lock poisoned")
            .get(type_url)
            .cloned()
            .unwrap_or_default();

        match self.apply(response) {
            Ok(outcome) => {
                counter!("dataplane_acks_total", "type_url" => type_url.to_string()).increment(1);
                debug!(
                    type_url,
                    version = %response.version_info,
                    nonce = %response.nonce,
                    unchanged = outcome == ApplyOutcome::Unchanged,
                    "acknowledging response"
                );
                ResponseDisposition::Ack(DiscoveryRequest {
                    version_info: response.version_info.clone(),
                    node: None,
                    resource_names,
                    type_url: type_url.to_string(),
                    response_nonce: response.nonce.clone(),
                    error_detail: None,
                })
            }
            Err(error) => {
                counter!("dataplane_nacks_total", "type_url" => type_url.to_string()).increment(1);
                let prior = self.store.version(type_url);
                warn!(
                    type_url,
                    version = %response.version_info,
                    prior = %prior,
                    error = %error,
                    "rejecting response"
                );
                ResponseDisposition::Nack {
                    request: DiscoveryRequest {
                        version_info: prior.into_inner(),
                        node: None,
                        resource_names,
                        type_url: type_url.to_string(),
                        response_nonce: response.nonce.clone(),
                        error_detail: Some(RpcStatus {
                            code: INVALID_ARGUMENT,
                            message: error.to_string(),
                            details: Vec::new(),
                        }),
                    },
                    error,
                }
            }
        }
    }

    fn apply(&self, response: &DiscoveryResponse) -> XdsResult<ApplyOutcome> {
        let type_url = response.type_url.as_str();
        if !self.registry.contains(type_url) {
            return Err(XdsError::InvalidTypeUrl {
                type_url: type_url.to_string(),
                reason: "no decoder registered".to_string(),
            });
        }
        let resources = self.registry.decode_all(type_url, &response.resources)?;
        self.store
            .apply(type_url, response.version_info.as_str(), resources)
    }

    /// Drive one aggregated stream.
    ///
    /// Subscribes to every `(type_url, names)` pair, then answers each
    /// response until the stream ends.
    ///
    /// # Errors
    ///
    /// Returns [`XdsError::StreamClosed`] when the management plane ends
    /// the stream with an error.
    pub async fn run<S>(
        &self,
        subscriptions: Vec<(TypeUrl, Vec<String>)>,
        mut responses: S,
        tx: mpsc::Sender<DiscoveryRequest>,
    ) -> XdsResult<()>
    where
        S: Stream<Item = Result<DiscoveryResponse, Status>> + Unpin,
    {
        for (type_url, names) in subscriptions {
            if tx.send(self.initial_request(type_url.as_str(), names)).await.is_err() {
                return Ok(());
            }
        }
        info!(node_id = %self.node.id, "discovery stream started");

        while let Some(response) = responses.next().await {
            let response = match response {
                Ok(response) => response,
                Err(status) => {
                    warn!(error = %status, "discovery stream failed");
                    return Err(XdsError::StreamClosed {
                        reason: status.message().to_string(),
                    });
                }
            };
            let disposition = self.handle_response(&response);
            if tx.send(disposition.into_request()).await.is_err() {
                break;
            }
        }

        debug!(node_id = %self.node.id, "discovery stream ended");
        Ok(())
    }
}
