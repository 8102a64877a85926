//! Permission gate tracking the observed microphone consent.
//!
//! State rules:
//! - `checked` flips true once any query or request has resolved.
//! - `granted` flips true on a pre-existing grant or a successful request.
//! - `granted` only goes back to false on an explicit denial (a failed
//!   request or [`PermissionGate::record_denied`]), never from a query.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::PermissionError;
use crate::{AudioConstraints, CaptureHandle, MicrophoneBackend, PermissionStatus};

/// Snapshot of what is known about microphone consent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionState {
    pub granted: bool,
    pub checked: bool,
    pub error: Option<PermissionError>,
}

impl PermissionState {
    /// User-facing guidance for the last error, if any.
    pub fn error_message(&self) -> Option<&'static str> {
        self.error.as_ref().map(PermissionError::guidance)
    }
}

/// Gate in front of a [`MicrophoneBackend`].
pub struct PermissionGate {
    backend: Arc<dyn MicrophoneBackend>,
    state: watch::Sender<PermissionState>,
}

impl PermissionGate {
    pub fn new(backend: Arc<dyn MicrophoneBackend>) -> Self {
        let (state, _) = watch::channel(PermissionState::default());
        Self { backend, state }
    }

    /// Current permission state.
    pub fn state(&self) -> PermissionState {
        self.state.borrow().clone()
    }

    pub fn is_granted(&self) -> bool {
        self.state.borrow().granted
    }

    /// Receive every subsequent state change.
    pub fn subscribe(&self) -> watch::Receiver<PermissionState> {
        self.state.subscribe()
    }

    /// Non-intrusive check. Never fails; any error reads as "not granted".
    ///
    /// Falls back to a short probe capture (opened and released at once)
    /// when the backend cannot answer a query.
    pub async fn check_permission(&self) -> bool {
        let observed = match self.backend.query().await {
            Ok(Some(status)) => {
                debug!(?status, "Microphone permission queried");
                status == PermissionStatus::Granted
            }
            Ok(None) => self.probe().await,
            Err(e) => {
                warn!(error = %e, "Microphone permission query failed");
                false
            }
        };

        self.state.send_modify(|state| {
            state.checked = true;
            if observed {
                state.granted = true;
                state.error = None;
            }
        });
        observed
    }

    async fn probe(&self) -> bool {
        match self.backend.acquire(AudioConstraints::plain()).await {
            Ok(capture) => {
                capture.release();
                true
            }
            Err(e) => {
                debug!(error = %e, "Microphone probe failed");
                false
            }
        }
    }

    /// Intrusive request that may prompt the user.
    ///
    /// On success the caller owns the returned capture and should release it
    /// right away; it only exists to elicit consent.
    pub async fn request_permission(&self) -> Result<CaptureHandle, PermissionError> {
        match self.backend.acquire(AudioConstraints::default()).await {
            Ok(capture) => {
                self.record_granted();
                Ok(capture)
            }
            Err(e) => {
                self.record_denied(e.clone());
                Err(e)
            }
        }
    }

    /// Record a grant reported by an external consent prompt.
    pub fn record_granted(&self) {
        info!("Microphone permission granted");
        self.state.send_modify(|state| {
            state.granted = true;
            state.checked = true;
            state.error = None;
        });
    }

    /// Record an explicit denial. This is the only path that revokes a grant.
    pub fn record_denied(&self, error: PermissionError) {
        warn!(error = %error, "Microphone permission denied");
        self.state.send_modify(|state| {
            state.granted = false;
            state.checked = true;
            state.error = Some(error);
        });
    }

    /// Fail with [`PermissionError::NotGranted`] unless access is granted.
    ///
    /// Does not contact the backend.
    pub fn require_granted(&self) -> Result<(), PermissionError> {
        if self.is_granted() {
            return Ok(());
        }
        self.state.send_modify(|state| {
            state.error = Some(PermissionError::NotGranted);
        });
        Err(PermissionError::NotGranted)
    }
}

// =============================================================================
// Tests
// =============================================================================
