//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{ApiError, BotError};
use crate::platform::{
    CallbackEvent, CommandEvent, InboundEvent, MediaEvent, MediaKind, MediaRef, OutboundAction,
    Transport, UserRef,
};

pub const USER_CHAT: i64 = 42;

pub fn user() -> UserRef {
    UserRef {
        id: USER_CHAT,
        username: Some("anna".to_string()),
    }
}

pub fn command(name: &str) -> InboundEvent {
    InboundEvent::Command(CommandEvent {
        name: name.to_string(),
        args: Vec::new(),
        chat_id: USER_CHAT,
        user: user(),
    })
}

/// A photo upload; like the platform, only the last (largest) size is kept.
pub fn photo(sizes: &[&str]) -> InboundEvent {
    let largest = sizes.last().copied().unwrap_or_default();
    InboundEvent::Media(MediaEvent {
        kind: MediaKind::Photo,
        chat_id: USER_CHAT,
        message_id: 555,
        user: user(),
        media: MediaRef {
            file_id: largest.to_string(),
        },
    })
}

pub fn callback(action_id: &str) -> InboundEvent {
    InboundEvent::Callback(CallbackEvent {
        query_id: format!("q-{}", action_id),
        action_id: action_id.to_string(),
        chat_id: Some(USER_CHAT),
        message_id: Some(900),
        user: user(),
    })
}

/// A platform-side rejection carrying `description`.
pub fn api_error(description: &str) -> ApiError {
    ApiError::Api(teloxide::ApiError::Unknown(description.to_string()))
}

type Scripted = Result<Vec<InboundEvent>, ()>;

/// Scriptable in-memory transport that records every call.
///
/// `receive_batch` pops scripted results in order; once the script runs out
/// it blocks forever, like a long-poll with no traffic.
#[derive(Default)]
pub struct StubTransport {
    script: Mutex<VecDeque<Scripted>>,
    sent: Mutex<Vec<OutboundAction>>,
    fetch_times: Mutex<Vec<tokio::time::Instant>>,
    fail_sends: AtomicBool,
    fail_init: AtomicBool,
    init_outages: AtomicUsize,
    init_times: Mutex<Vec<tokio::time::Instant>>,
    fail_downloads: AtomicBool,
    throttle_commands_secs: AtomicU64,
    inits: AtomicUsize,
    releases: AtomicUsize,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_batch(&self, events: Vec<InboundEvent>) {
        self.script.lock().unwrap().push_back(Ok(events));
    }

    pub fn push_fault(&self) {
        self.script.lock().unwrap().push_back(Err(()));
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` inits fail with a network-level fault.
    pub fn init_outages(&self, count: usize) {
        self.init_outages.store(count, Ordering::SeqCst);
    }

    pub fn init_times(&self) -> Vec<tokio::time::Instant> {
        self.init_times.lock().unwrap().clone()
    }

    pub fn fail_downloads(&self, fail: bool) {
        self.fail_downloads.store(fail, Ordering::SeqCst);
    }

    /// Make `SetCommands` fail with "retry after `secs`".
    pub fn throttle_commands(&self, secs: u64) {
        self.throttle_commands_secs.store(secs, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutboundAction> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count_sent(&self, pred: impl Fn(&OutboundAction) -> bool) -> usize {
        self.sent.lock().unwrap().iter().filter(|a| pred(a)).count()
    }

    pub fn fetches(&self) -> usize {
        self.fetch_times.lock().unwrap().len()
    }

    pub fn fetch_times(&self) -> Vec<tokio::time::Instant> {
        self.fetch_times.lock().unwrap().clone()
    }

    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn init(&self) -> Result<(), BotError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        self.init_times
            .lock()
            .unwrap()
            .push(tokio::time::Instant::now());

        if self.fail_init.load(Ordering::SeqCst) {
            return Err(BotError::CredentialMissing);
        }
        let outage = self
            .init_outages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if outage {
            return Err(BotError::Transport(api_error("Bad Gateway")));
        }
        Ok(())
    }

    async fn receive_batch(&self) -> Result<Vec<InboundEvent>, BotError> {
        self.fetch_times
            .lock()
            .unwrap()
            .push(tokio::time::Instant::now());

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(events)) => Ok(events),
            Some(Err(())) => Err(BotError::Transport(api_error("Bad Gateway"))),
            None => std::future::pending().await,
        }
    }

    async fn send(&self, action: OutboundAction) -> Result<(), BotError> {
        let method = action.method();
        let throttled = matches!(action, OutboundAction::SetCommands(_))
            .then(|| self.throttle_commands_secs.load(Ordering::SeqCst))
            .filter(|secs| *secs > 0);
        self.sent.lock().unwrap().push(action);

        if let Some(seconds) = throttled {
            return Err(BotError::delivery(method, ApiError::RetryAfter { seconds }));
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(BotError::delivery(
                method,
                api_error("Internal Server Error"),
            ));
        }
        Ok(())
    }

    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>, BotError> {
        if self.fail_downloads.load(Ordering::SeqCst) {
            return Err(BotError::delivery(
                "getFile",
                api_error("file is too big"),
            ));
        }
        Ok(format!("content-of-{}", media.file_id).into_bytes())
    }

    async fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}
