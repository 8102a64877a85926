//! Concierge Permission crate - microphone consent gate for voice chat.
//!
//! Wraps a platform media-capture permission API behind the
//! [`MicrophoneBackend`] trait and tracks the observed permission state in a
//! [`PermissionGate`]. Includes a [`StaticMicrophone`] backend with fixed
//! answers for tests and headless runs.

pub mod error;
pub mod gate;
pub mod static_backend;

use std::fmt;

use async_trait::async_trait;
use uuid::Uuid;

pub use error::PermissionError;
pub use gate::{PermissionGate, PermissionState};
pub use static_backend::StaticMicrophone;

// =============================================================================
// Types
// =============================================================================

/// Answer of a non-intrusive permission query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    /// The user has not decided yet; a request would show a prompt.
    Prompt,
}

/// Audio processing constraints attached to a capture request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

impl AudioConstraints {
    /// Bare `audio: true` request used by probes.
    pub fn plain() -> Self {
        Self {
            echo_cancellation: false,
            noise_suppression: false,
            auto_gain_control: false,
        }
    }
}

/// A live microphone capture obtained while eliciting permission.
///
/// The capture is released exactly once: either by [`CaptureHandle::release`]
/// or when the handle is dropped.
pub struct CaptureHandle {
    id: Uuid,
    on_release: Option<Box<dyn FnOnce() + Send>>,
}

impl CaptureHandle {
    pub fn new<F>(on_release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            id: Uuid::new_v4(),
            on_release: Some(Box::new(on_release)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stop every track of the capture.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(release) = self.on_release.take() {
            tracing::debug!(capture_id = %self.id, "Microphone capture released");
            release();
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("id", &self.id)
            .field("released", &self.on_release.is_none())
            .finish()
    }
}

// =============================================================================
// Traits
// =============================================================================

/// Platform microphone capability.
#[async_trait]
pub trait MicrophoneBackend: Send + Sync {
    /// Query the permission without prompting the user.
    ///
    /// Returns `Ok(None)` when the platform has no query capability.
    async fn query(&self) -> Result<Option<PermissionStatus>, PermissionError>;

    /// Open a capture with the given constraints. May prompt the user.
    async fn acquire(&self, constraints: AudioConstraints)
        -> Result<CaptureHandle, PermissionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_default_constraints_enable_processing() {
        let c = AudioConstraints::default();
        assert!(c.echo_cancellation && c.noise_suppression && c.auto_gain_control);
        let plain = AudioConstraints::plain();
        assert!(!plain.echo_cancellation);
    }

    #[test]
    fn test_capture_handle_releases_once() {
        let releases = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&releases);
        let handle = CaptureHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.release();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_capture_handle_releases_on_drop() {
        let releases = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&releases);
        {
            let handle = CaptureHandle::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            assert!(format!("{handle:?}").contains("released: false"));
        }
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
