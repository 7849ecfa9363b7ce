//! In-memory collaborators for tests
//!
//! Both doubles append every call to a shared [`CallJournal`] so tests can
//! assert on the interleaving of billing and proxy operations.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::{BridgeError, Result};
use crate::proxy::{MeteringKey, ProxyControl, UsageGetter};
use crate::session::{ConnChangeStream, SessionClient, SessionHandle};
use crate::types::{Channel, ConnChange, Endpoint, ProductConfig, RouteRequest};

/// A recorded collaborator call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetEndpoint(Channel),
    StartSession { channel: Channel, units: u64 },
    UpdateSession { channel: Channel, usage: u64, last: bool },
    StopSession(Channel),
    SetProductConfig(ProductConfig),
    AddUser(String),
    RemoveUser(String),
    ConfigureRoute(RouteRequest),
    RemoveRoute,
    CounterReset(MeteringKey),
}

/// Ordered log of calls shared between doubles
#[derive(Debug, Clone, Default)]
pub struct CallJournal(Arc<Mutex<Vec<Call>>>);

impl CallJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: Call) {
        self.0.lock().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.0.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn position(&self, pred: impl Fn(&Call) -> bool) -> Option<usize> {
        self.0.lock().iter().position(pred)
    }
}

/// Session controller double fed by [`InMemorySession::push`]
pub struct InMemorySession {
    journal: CallJournal,
    endpoints: Mutex<HashMap<Channel, Endpoint>>,
    changes_tx: Mutex<Option<mpsc::UnboundedSender<Result<ConnChange>>>>,
    changes_rx: Mutex<Option<mpsc::UnboundedReceiver<Result<ConnChange>>>>,
    fail_start: AtomicBool,
    fail_update: AtomicBool,
}

impl InMemorySession {
    pub fn new(journal: CallJournal) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            journal,
            endpoints: Mutex::new(HashMap::new()),
            changes_tx: Mutex::new(Some(tx)),
            changes_rx: Mutex::new(Some(rx)),
            fail_start: AtomicBool::new(false),
            fail_update: AtomicBool::new(false),
        }
    }

    pub fn with_endpoint(self, channel: impl Into<Channel>, endpoint: Endpoint) -> Self {
        self.endpoints.lock().insert(channel.into(), endpoint);
        self
    }

    /// Queue a connection change for the subscriber
    pub fn push(&self, change: ConnChange) {
        if let Some(tx) = self.changes_tx.lock().as_ref() {
            let _ = tx.send(Ok(change));
        }
    }

    /// Queue a subscription failure
    pub fn push_error(&self, err: BridgeError) {
        if let Some(tx) = self.changes_tx.lock().as_ref() {
            let _ = tx.send(Err(err));
        }
    }

    /// End the subscription stream after the queued changes
    pub fn close(&self) {
        self.changes_tx.lock().take();
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn fail_update(&self, fail: bool) {
        self.fail_update.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionClient for InMemorySession {
    async fn subscribe_conn_changes(&self) -> Result<ConnChangeStream> {
        let rx = self
            .changes_rx
            .lock()
            .take()
            .ok_or_else(|| BridgeError::Subscription("already subscribed".into()))?;
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn get_endpoint(&self, channel: &Channel) -> Result<Endpoint> {
        self.journal.record(Call::GetEndpoint(channel.clone()));
        self.endpoints
            .lock()
            .get(channel)
            .cloned()
            .ok_or_else(|| BridgeError::Session(format!("unknown channel {}", channel)))
    }

    async fn start_session(&self, _id: &str, channel: &Channel, units: u64) -> Result<SessionHandle> {
        self.journal.record(Call::StartSession {
            channel: channel.clone(),
            units,
        });
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(BridgeError::Session("start rejected".into()));
        }
        Ok(SessionHandle {
            id: channel.to_string(),
        })
    }

    async fn update_session(&self, channel: &Channel, usage: u64, last: bool) -> Result<()> {
        self.journal.record(Call::UpdateSession {
            channel: channel.clone(),
            usage,
            last,
        });
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(BridgeError::Session("update rejected".into()));
        }
        Ok(())
    }

    async fn stop_session(&self, channel: &Channel) -> Result<()> {
        self.journal.record(Call::StopSession(channel.clone()));
        Ok(())
    }

    async fn set_product_config(&self, config: &ProductConfig) -> Result<()> {
        self.journal.record(Call::SetProductConfig(config.clone()));
        Ok(())
    }
}

/// Proxy engine double with settable counters
#[derive(Default)]
pub struct InMemoryProxy {
    journal: CallJournal,
    usage: Mutex<HashMap<MeteringKey, u64>>,
    users: Mutex<HashSet<String>>,
    route: Mutex<Option<RouteRequest>>,
    fail_control: AtomicBool,
}

impl InMemoryProxy {
    pub fn new(journal: CallJournal) -> Self {
        Self {
            journal,
            ..Default::default()
        }
    }

    pub fn set_usage(&self, key: MeteringKey, usage: u64) {
        self.usage.lock().insert(key, usage);
    }

    /// Make every user/route operation fail
    pub fn fail_control(&self, fail: bool) {
        self.fail_control.store(fail, Ordering::SeqCst);
    }

    pub fn has_user(&self, identity: &str) -> bool {
        self.users.lock().contains(identity)
    }

    pub fn route(&self) -> Option<RouteRequest> {
        self.route.lock().clone()
    }

    fn check(&self, op: &str) -> Result<()> {
        if self.fail_control.load(Ordering::SeqCst) {
            return Err(BridgeError::Proxy(format!("{} failed", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl ProxyControl for InMemoryProxy {
    async fn add_user(&self, identity: &str) -> Result<()> {
        self.journal.record(Call::AddUser(identity.to_string()));
        self.check("add user")?;
        self.users.lock().insert(identity.to_string());
        Ok(())
    }

    async fn remove_user(&self, identity: &str) -> Result<()> {
        self.journal.record(Call::RemoveUser(identity.to_string()));
        self.check("remove user")?;
        self.users.lock().remove(identity);
        Ok(())
    }

    async fn configure_route(&self, request: &RouteRequest) -> Result<()> {
        self.journal.record(Call::ConfigureRoute(request.clone()));
        self.check("configure route")?;
        *self.route.lock() = Some(request.clone());
        Ok(())
    }

    async fn remove_route(&self) -> Result<()> {
        self.journal.record(Call::RemoveRoute);
        self.check("remove route")?;
        self.route.lock().take();
        Ok(())
    }

    async fn get_usage(&self, key: &MeteringKey) -> Result<u64> {
        Ok(self.usage.lock().get(key).copied().unwrap_or(0))
    }

    async fn request_counter_reset(&self, key: &MeteringKey) -> Result<()> {
        self.journal.record(Call::CounterReset(key.clone()));
        self.check("counter reset")?;
        self.usage.lock().insert(key.clone(), 0);
        Ok(())
    }
}

/// UsageGetter returning a settable value, optionally failing a number of polls
#[derive(Debug, Default)]
pub struct FixedUsage {
    usage: Mutex<u64>,
    failures: AtomicU32,
}

impl FixedUsage {
    pub fn new(usage: u64) -> Self {
        Self {
            usage: Mutex::new(usage),
            failures: AtomicU32::new(0),
        }
    }

    pub fn set(&self, usage: u64) {
        *self.usage.lock() = usage;
    }

    /// Fail the next `n` polls
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl UsageGetter for FixedUsage {
    async fn get(&self) -> Result<u64> {
        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            return Err(BridgeError::Proxy("stats unavailable".into()));
        }
        Ok(*self.usage.lock())
    }
}
