//! Connection event loop
//!
//! Single sequential consumer of connection changes. For every event it:
//! 1. looks up the transition for the channel's current state
//! 2. resolves the endpoint and requires a non-empty identity
//! 3. runs the role steps, then commits the next state
//!
//! Unexpected events are logged and skipped. Any error from endpoint
//! resolution, the roles or the subscription ends the loop.
//!
//! Closed channels are remembered so late duplicates are ignored, up to
//! [`CLOSED_RETENTION`] of them; the oldest are forgotten first.

use std::collections::{HashMap, VecDeque};

use futures::StreamExt;
use tracing::{debug, error, info, warn};

use meterbridge_common::{BridgeError, Channel, ConnChange, ConnChangeStream, Result};

use crate::context::AdapterContext;
use crate::roles::Role;
use crate::state::{transition, ConnectionState, Step};

/// Number of closed channels kept in the state table
pub const CLOSED_RETENTION: usize = 4096;

pub struct ConnectionEventLoop {
    ctx: AdapterContext,
    role: Box<dyn Role>,
    states: HashMap<Channel, ConnectionState>,
    /// Closed channels in closing order
    closed: VecDeque<Channel>,
    closed_retention: usize,
}

impl ConnectionEventLoop {
    pub fn new(ctx: AdapterContext, role: Box<dyn Role>) -> Self {
        Self {
            ctx,
            role,
            states: HashMap::new(),
            closed: VecDeque::new(),
            closed_retention: CLOSED_RETENTION,
        }
    }

    pub fn with_closed_retention(mut self, retention: usize) -> Self {
        self.closed_retention = retention;
        self
    }

    /// Role startup work (recovery, product configuration)
    pub async fn prepare(&mut self) -> Result<()> {
        info!(role = %self.role.kind(), "Preparing adapter role");
        self.role.prepare(&self.ctx).await
    }

    /// Consume connection changes until a fatal error
    ///
    /// Never returns `Ok`: the end of the subscription is itself fatal.
    pub async fn run(&mut self, mut changes: ConnChangeStream) -> Result<()> {
        info!("Consuming connection changes");

        while let Some(item) = changes.next().await {
            let change = item.map_err(|e| {
                error!(error = %e, "Connection change subscription failed");
                e
            })?;
            self.handle(change).await?;
        }

        Err(BridgeError::SubscriptionClosed)
    }

    /// Process one connection change
    pub async fn handle(&mut self, change: ConnChange) -> Result<()> {
        let ConnChange { channel, status } = change;
        let state = self.state(&channel);
        debug!(channel = %channel, status = %status, state = %state, "Received connection change");

        let Some(t) = transition(state, status) else {
            warn!(channel = %channel, status = %status, state = %state, "Unexpected connection change, ignoring");
            return Ok(());
        };

        let endpoint = self.ctx.session.get_endpoint(&channel).await.map_err(|e| {
            error!(channel = %channel, error = %e, "Could not resolve endpoint");
            e
        })?;
        let identity = endpoint.identity(&channel)?.to_string();

        for step in t.steps {
            let result = match step {
                Step::Provision => {
                    self.role
                        .provision(&self.ctx, &channel, &endpoint, &identity)
                        .await
                }
                Step::Activate => self.role.activate(&self.ctx, &channel, &identity).await,
                Step::Deactivate => self.role.deactivate(&self.ctx, &channel, &identity).await,
                Step::Deprovision => self.role.deprovision(&self.ctx, &channel, &identity).await,
            };
            if let Err(e) = result {
                error!(channel = %channel, step = ?step, error = %e, "Connection change failed");
                return Err(e);
            }
        }

        info!(channel = %channel, from = %state, to = %t.next, "Connection state changed");
        if t.next == ConnectionState::Closed {
            self.closed.push_back(channel.clone());
        }
        self.states.insert(channel, t.next);
        self.forget_closed();
        Ok(())
    }

    fn forget_closed(&mut self) {
        while self.closed.len() > self.closed_retention {
            if let Some(channel) = self.closed.pop_front() {
                debug!(channel = %channel, "Forgetting closed channel");
                self.states.remove(&channel);
            }
        }
    }

    /// Channels currently tracked, closed ones included
    pub fn tracked(&self) -> usize {
        self.states.len()
    }

    pub fn state(&self, channel: &Channel) -> ConnectionState {
        self.states.get(channel).copied().unwrap_or_default()
    }
}
