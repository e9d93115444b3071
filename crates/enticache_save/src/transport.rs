//! Transport abstraction for the underlying save.

use crate::bundle::{RawSaveResponse, SaveBundle};
use crate::error::{SaveError, SaveResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Sends a save bundle to the server.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-memory servers, mocks for testing).
#[async_trait]
pub trait SaveTransport: Send + Sync {
    /// Saves a batch and returns what the server confirmed.
    async fn save_changes(&self, bundle: SaveBundle) -> SaveResult<RawSaveResponse>;
}

#[async_trait]
impl<T: SaveTransport + ?Sized> SaveTransport for Arc<T> {
    async fn save_changes(&self, bundle: SaveBundle) -> SaveResult<RawSaveResponse> {
        (**self).save_changes(bundle).await
    }
}

/// A mock transport for testing.
///
/// Answers with queued responses in order and records every bundle it saw.
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<SaveResult<RawSaveResponse>>>,
    bundles: Mutex<Vec<SaveBundle>>,
}

impl MockTransport {
    /// Creates a mock with no queued responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful response.
    pub fn push_response(&self, response: RawSaveResponse) {
        self.responses.lock().push_back(Ok(response));
    }

    /// Queues a failure.
    pub fn push_error(&self, error: SaveError) {
        self.responses.lock().push_back(Err(error));
    }

    /// Bundles received so far.
    pub fn bundles(&self) -> Vec<SaveBundle> {
        self.bundles.lock().clone()
    }

    /// Number of saves performed.
    pub fn save_count(&self) -> usize {
        self.bundles.lock().len()
    }
}

#[async_trait]
impl SaveTransport for MockTransport {
    async fn save_changes(&self, bundle: SaveBundle) -> SaveResult<RawSaveResponse> {
        self.bundles.lock().push(bundle);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SaveError::transport_fatal("no mock save response queued")))
    }
}
