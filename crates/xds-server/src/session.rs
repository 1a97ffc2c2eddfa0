//! Per-type discovery session.
//!
//! A [`DiscoverySession`] is one subscription for one type URL on one
//! stream. It reconciles what the store holds with what the node has
//! applied, using the version and nonce the node echoes back:
//!
//! ```text
//! Uninitialized -> AwaitingFirstRequest -> Active <-> PendingAck
//!                                  (any) -> Closed
//! ```
//!
//! At most one push is outstanding at a time. A push leaves the session in
//! `PendingAck` until the node answers it; a rejected push is remembered so
//! identical content is not pushed again.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};
use xds_cache::ResourceVersionStore;
use xds_core::{Resource, ResourceVersion, TypeUrl, XdsError, XdsResult};
use xds_types::envoy::config::core::v3::ControlPlane;
use xds_types::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};

use crate::utils::generate_nonce;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet attached to a stream.
    Uninitialized,
    /// Attached; waiting for the node's first request.
    AwaitingFirstRequest,
    /// No push outstanding.
    Active,
    /// A push was sent and the node has not answered it yet.
    PendingAck,
    /// Terminal.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::AwaitingFirstRequest => "awaiting-first-request",
            Self::Active => "active",
            Self::PendingAck => "pending-ack",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Externally decided push policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Flag every push as canary.
    pub canary: bool,
    /// Escalate a rejected canary push instead of continuing.
    pub terminate_on_canary_failure: bool,
}

/// How a request was interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// First request with no version: the node has nothing applied.
    Initial,
    /// First request carrying a version the node already holds.
    Resume {
        /// Version the node resumes from.
        version: ResourceVersion,
    },
    /// The node applied the outstanding push.
    Ack {
        /// Applied version.
        version: ResourceVersion,
    },
    /// The node rejected a push.
    Nack {
        /// Rejected version.
        version: ResourceVersion,
        /// Error reported by the node.
        message: String,
    },
    /// Valid request that acknowledges nothing new, e.g. a change of
    /// resource names while the applied version stays put.
    Update,
    /// Answer to a response older than the latest push. Ignored.
    Stale {
        /// Nonce the node echoed.
        nonce: String,
    },
}

/// A version and the names it covered.
#[derive(Debug, Clone, PartialEq, Eq)]
struct VersionedNames {
    version: ResourceVersion,
    names: BTreeSet<String>,
}

#[derive(Debug, Clone)]
struct PushRecord {
    content: VersionedNames,
    nonce: String,
    canary: bool,
}

/// A push produced by [`DiscoverySession::push_if_needed`].
#[derive(Debug, Clone)]
pub struct SessionPush {
    /// Type URL of the resources.
    pub type_url: TypeUrl,
    /// Store version the resources were read at.
    pub version: ResourceVersion,
    /// Nonce the node must echo.
    pub nonce: String,
    /// Canary flag.
    pub canary: bool,
    /// Selected resources. Names with no resource are omitted.
    pub resources: Vec<Arc<Resource>>,
}

impl SessionPush {
    /// Encode into a wire response.
    pub fn into_response(self, control_plane_id: Option<&str>) -> DiscoveryResponse {
        DiscoveryResponse {
            version_info: self.version.into_inner(),
            resources: self.resources.iter().map(|r| r.encode()).collect(),
            canary: self.canary,
            type_url: self.type_url.as_str().to_string(),
            nonce: self.nonce,
            control_plane: control_plane_id.map(|id| ControlPlane {
                identifier: id.to_string(),
            }),
        }
    }
}

/// Subscription state machine for one type URL on one stream.
#[derive(Debug)]
pub struct DiscoverySession {
    type_url: TypeUrl,
    state: SessionState,
    policy: SessionPolicy,
    subscription: BTreeSet<String>,
    /// What the node holds, as far as we know.
    applied: Option<VersionedNames>,
    /// Most recent push, answered or not.
    last_push: Option<PushRecord>,
    /// Most recent rejected content; cleared by the next ACK.
    rejected: Option<VersionedNames>,
}

impl DiscoverySession {
    /// Create a session for `type_url`.
    pub fn new(type_url: impl Into<TypeUrl>, policy: SessionPolicy) -> Self {
        Self {
            type_url: type_url.into(),
            state: SessionState::Uninitialized,
            policy,
            subscription: BTreeSet::new(),
            applied: None,
            last_push: None,
            rejected: None,
        }
    }

    /// Attach the session to a stream.
    pub fn start(&mut self) {
        if self.state == SessionState::Uninitialized {
            self.state = SessionState::AwaitingFirstRequest;
        }
    }

    /// Get the type URL.
    #[inline]
    #[must_use]
    pub fn type_url(&self) -> &TypeUrl {
        &self.type_url
    }

    /// Get the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Resource names of interest. Empty means all.
    #[inline]
    #[must_use]
    pub fn subscription(&self) -> &BTreeSet<String> {
        &self.subscription
    }

    /// Version the node has applied; empty when none.
    #[must_use]
    pub fn applied_version(&self) -> ResourceVersion {
        self.applied
            .as_ref()
            .map(|a| a.version.clone())
            .unwrap_or_default()
    }

    /// Version of the latest push, if any.
    #[must_use]
    pub fn pushed_version(&self) -> Option<&ResourceVersion> {
        self.last_push.as_ref().map(|p| &p.content.version)
    }

    /// Most recently rejected version, if not yet superseded by an ACK.
    #[must_use]
    pub fn rejected_version(&self) -> Option<&ResourceVersion> {
        self.rejected.as_ref().map(|r| &r.version)
    }

    /// Set the canary flag for future pushes.
    pub fn set_canary(&mut self, canary: bool) {
        self.policy.canary = canary;
    }

    /// Interpret a request from the node.
    ///
    /// # Errors
    ///
    /// - [`XdsError::Protocol`] when the session is not open or the request
    ///   names a version that was neither applied nor pushed. The request is
    ///   ignored and the session is left untouched.
    /// - [`XdsError::CanaryRejected`] when a canary push is rejected under
    ///   the terminate policy. The session is closed.
    pub fn on_request(&mut self, request: &DiscoveryRequest) -> XdsResult<RequestKind> {
        match self.state {
            SessionState::Uninitialized | SessionState::Closed => {
                Err(self.protocol_error(format!("request on {} session", self.state)))
            }
            SessionState::AwaitingFirstRequest => Ok(self.on_first_request(request)),
            SessionState::Active | SessionState::PendingAck => self.on_follow_up(request),
        }
    }

    fn on_first_request(&mut self, request: &DiscoveryRequest) -> RequestKind {
        let names = name_set(&request.resource_names);
        self.state = SessionState::Active;

        if request.version_info.is_empty() {
            self.subscription = names;
            return RequestKind::Initial;
        }

        let version = ResourceVersion::new(request.version_info.as_str());
        debug!(
            type_url = %self.type_url,
            version = %version,
            "node resumes from version"
        );
        self.applied = Some(VersionedNames {
            version: version.clone(),
            names: names.clone(),
        });
        self.subscription = names;
        RequestKind::Resume { version }
    }

    fn on_follow_up(&mut self, request: &DiscoveryRequest) -> XdsResult<RequestKind> {
        if let Some(push) = &self.last_push {
            if !request.response_nonce.is_empty() && request.response_nonce != push.nonce {
                trace!(
                    type_url = %self.type_url,
                    nonce = %request.response_nonce,
                    expected = %push.nonce,
                    "ignoring request for stale nonce"
                );
                return Ok(RequestKind::Stale {
                    nonce: request.response_nonce.clone(),
                });
            }
        }

        let version = request.version_info.as_str();
        let matches_pushed = self
            .pushed_version()
            .is_some_and(|pushed| pushed.as_str() == version);
        let matches_applied = self.applied_version().as_str() == version;
        if !matches_pushed && !matches_applied {
            return Err(self.protocol_error(format!(
                "version {version:?} was neither applied nor pushed"
            )));
        }

        let names = name_set(&request.resource_names);
        if let Some(detail) = &request.error_detail {
            return self.on_nack(version, detail.message.clone(), names);
        }

        self.subscription = names;
        if matches_pushed && self.state == SessionState::PendingAck {
            if let Some(push) = &self.last_push {
                self.applied = Some(push.content.clone());
            }
            self.rejected = None;
            self.state = SessionState::Active;
            return Ok(RequestKind::Ack {
                version: ResourceVersion::new(version),
            });
        }

        Ok(RequestKind::Update)
    }

    fn on_nack(
        &mut self,
        version: &str,
        message: String,
        names: BTreeSet<String>,
    ) -> XdsResult<RequestKind> {
        self.subscription = names;

        if self.state != SessionState::PendingAck {
            // Repeated NACK for a push already marked rejected.
            return Ok(RequestKind::Nack {
                version: ResourceVersion::new(version),
                message,
            });
        }

        self.state = SessionState::Active;
        let Some(push) = self.last_push.clone() else {
            return Ok(RequestKind::Nack {
                version: ResourceVersion::new(version),
                message,
            });
        };
        self.rejected = Some(push.content.clone());

        if push.canary && self.policy.terminate_on_canary_failure {
            self.close();
            return Err(XdsError::CanaryRejected {
                type_url: self.type_url.to_string(),
                version: push.content.version.to_string(),
                message,
            });
        }

        Ok(RequestKind::Nack {
            version: push.content.version,
            message,
        })
    }

    /// Push the store's current content if the node does not hold it.
    ///
    /// Returns `None` while a push is outstanding, before the first request,
    /// after close, when the store holds nothing for this type, when the
    /// node already applied this version for the current names, or when the
    /// node rejected exactly this content.
    pub fn push_if_needed(&mut self, store: &ResourceVersionStore) -> Option<SessionPush> {
        if self.state != SessionState::Active {
            return None;
        }

        let snapshot = store.snapshot(self.type_url.as_str())?;
        let current = VersionedNames {
            version: snapshot.version().clone(),
            names: self.subscription.clone(),
        };

        if self.applied.as_ref() == Some(&current) {
            trace!(
                type_url = %self.type_url,
                version = %current.version,
                "node already holds current version"
            );
            return None;
        }
        if self.rejected.as_ref() == Some(&current) {
            trace!(
                type_url = %self.type_url,
                version = %current.version,
                "not re-pushing rejected content"
            );
            return None;
        }

        let push = SessionPush {
            type_url: self.type_url.clone(),
            version: current.version.clone(),
            nonce: generate_nonce(),
            canary: self.policy.canary,
            resources: snapshot.select(&self.subscription),
        };

        self.last_push = Some(PushRecord {
            content: current,
            nonce: push.nonce.clone(),
            canary: push.canary,
        });
        self.state = SessionState::PendingAck;
        Some(push)
    }

    /// Close the session, discarding pending state.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
        self.last_push = None;
    }

    fn protocol_error(&self, reason: String) -> XdsError {
        XdsError::Protocol {
            type_url: self.type_url.to_string(),
            reason,
        }
    }
}

fn name_set(names: &[String]) -> BTreeSet<String> {
    names.iter().cloned().collect()
}
