//! Test doubles shared by the unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::Notify;

use crate::transport::{DeliveryError, DeliveryRequest, Transport};

/// Records every request and answers with success or a 503.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    requests: Mutex<Vec<DeliveryRequest>>,
    failing: AtomicBool,
    /// When set, `send` signals `started` and waits for `release`.
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl RecordingTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn failing() -> Arc<Self> {
        let transport = Self::default();
        transport.failing.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    /// A transport that parks each send until released.
    pub(crate) fn gated(started: Arc<Notify>, release: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some((started, release)),
            ..Self::default()
        })
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn requests(&self) -> Vec<DeliveryRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, request: &DeliveryRequest) -> Result<(), DeliveryError> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some((started, release)) = &self.gate {
            started.notify_one();
            release.notified().await;
        }

        if self.failing.load(Ordering::SeqCst) {
            Err(DeliveryError::Status {
                code: StatusCode::SERVICE_UNAVAILABLE,
                message: "collector unavailable".to_string(),
            })
        } else {
            Ok(())
        }
    }
}
