use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::PermissionError;
use crate::{AudioConstraints, CaptureHandle, MicrophoneBackend, PermissionStatus};

#[derive(Debug, Clone)]
enum QueryAnswer {
    Status(PermissionStatus),
    Unsupported,
    Error(PermissionError),
}

#[derive(Debug)]
struct Inner {
    query: Mutex<QueryAnswer>,
    acquire: Mutex<Result<(), PermissionError>>,
    last_constraints: Mutex<Option<AudioConstraints>>,
    acquisitions: AtomicUsize,
    releases: Arc<AtomicUsize>,
}

/// Microphone backend with fixed answers.
///
/// Used for headless runs and tests. Clones share state, so a test can keep
/// one clone to inspect acquisition and release counts.
#[derive(Debug, Clone)]
pub struct StaticMicrophone {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl StaticMicrophone {
    fn new(query: QueryAnswer, acquire: Result<(), PermissionError>) -> Self {
        Self {
            inner: Arc::new(Inner {
                query: Mutex::new(query),
                acquire: Mutex::new(acquire),
                last_constraints: Mutex::new(None),
                acquisitions: AtomicUsize::new(0),
                releases: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Permission already granted; captures succeed.
    pub fn granted() -> Self {
        Self::new(QueryAnswer::Status(PermissionStatus::Granted), Ok(()))
    }

    /// Undecided; a request is accepted.
    pub fn prompt() -> Self {
        Self::new(QueryAnswer::Status(PermissionStatus::Prompt), Ok(()))
    }

    /// Permission denied; requests fail with `NotAllowed`.
    pub fn denied() -> Self {
        Self::new(
            QueryAnswer::Status(PermissionStatus::Denied),
            Err(PermissionError::NotAllowed),
        )
    }

    /// Undecided; every capture fails with `error`.
    pub fn failing(error: PermissionError) -> Self {
        Self::new(QueryAnswer::Status(PermissionStatus::Prompt), Err(error))
    }

    /// Behave like a platform without a permission query.
    pub fn without_query(self) -> Self {
        *lock(&self.inner.query) = QueryAnswer::Unsupported;
        self
    }

    /// Make the permission query itself fail.
    pub fn with_query_error(self, error: PermissionError) -> Self {
        *lock(&self.inner.query) = QueryAnswer::Error(error);
        self
    }

    /// Change what the next captures return.
    pub fn set_acquire_result(&self, result: Result<(), PermissionError>) {
        *lock(&self.inner.acquire) = result;
    }

    pub fn acquisitions(&self) -> usize {
        self.inner.acquisitions.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.inner.releases.load(Ordering::SeqCst)
    }

    pub fn last_constraints(&self) -> Option<AudioConstraints> {
        *lock(&self.inner.last_constraints)
    }
}

#[async_trait]
impl MicrophoneBackend for StaticMicrophone {
    async fn query(&self) -> Result<Option<PermissionStatus>, PermissionError> {
        match lock(&self.inner.query).clone() {
            QueryAnswer::Status(status) => Ok(Some(status)),
            QueryAnswer::Unsupported => Ok(None),
            QueryAnswer::Error(e) => Err(e),
        }
    }

    async fn acquire(
        &self,
        constraints: AudioConstraints,
    ) -> Result<CaptureHandle, PermissionError> {
        *lock(&self.inner.last_constraints) = Some(constraints);
        lock(&self.inner.acquire).clone()?;

        self.inner.acquisitions.fetch_add(1, Ordering::SeqCst);
        let releases = Arc::clone(&self.inner.releases);
        Ok(CaptureHandle::new(move || {
            releases.fetch_add(1, Ordering::SeqCst);
        }))
    }
}
