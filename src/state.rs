/// file: src/state.rs
/// description: Per-user connection state: link handle, state-machine phase,
/// credentials, subscription bookkeeping, and reconnect bookkeeping.
use crate::error::ClientError;
use crate::protocol::{Envelope, PendingPurchase, ProposalConfig};
use crate::tick_buffer::TickBuffer;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Connection state machine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Disconnected,
    Connecting,
    Authorizing,
    Authorized,
    Reconnecting,
}

/// Handle to one live transport. Outbound frames go through the writer task;
/// the reader task feeds inbound dispatch. Both are aborted on close.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::UnboundedSender<String>,
    pub writer: Option<JoinHandle<()>>,
    pub reader: Option<JoinHandle<()>>,
    /// Identifies this transport instance; stale reader callbacks from a
    /// replaced transport are ignored by comparing generations.
    pub generation: u64,
}

impl Link {
    pub fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}

type ResponseWaiter = oneshot::Sender<Result<Envelope, ClientError>>;

#[derive(Debug)]
pub struct ConnectionState {
    pub phase: LinkPhase,
    pub link: Option<Link>,
    pub token: Option<String>,
    pub login_id: Option<String>,

    pub reconnect_attempts: u32,
    /// Guard preventing overlapping reconnect attempts.
    pub reconnecting: bool,
    pub reconnect_timer: Option<JoinHandle<()>>,
    /// Set when the reconnect attempt cap is exhausted; only a fresh
    /// `connect` clears it.
    pub link_down: bool,

    pub tick_subscription_id: Option<String>,
    pub proposal_subscription_id: Option<String>,
    pub open_contract_subscription_id: Option<String>,

    /// What the caller wants subscribed, remembered independently of the
    /// venue-assigned ids so it can be re-issued after a reconnect.
    pub desired_symbol: Option<String>,
    pub desired_proposal: Option<ProposalConfig>,

    pub pending_purchase: Option<PendingPurchase>,
    pub ticks: TickBuffer,

    /// In-flight request waiters keyed by `req_id`.
    pub waiters: HashMap<i64, ResponseWaiter>,
    next_generation: u64,
}

impl ConnectionState {
    pub fn new(max_ticks: usize) -> Self {
        ConnectionState {
            phase: LinkPhase::Disconnected,
            link: None,
            token: None,
            login_id: None,
            reconnect_attempts: 0,
            reconnecting: false,
            reconnect_timer: None,
            link_down: false,
            tick_subscription_id: None,
            proposal_subscription_id: None,
            open_contract_subscription_id: None,
            desired_symbol: None,
            desired_proposal: None,
            pending_purchase: None,
            ticks: TickBuffer::new(max_ticks),
            waiters: HashMap::new(),
            next_generation: 0,
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.phase == LinkPhase::Authorized
    }

    /// Gate for trading operations: a typed error instead of a silent drop.
    pub fn ensure_authorized(&self) -> Result<(), ClientError> {
        if self.link_down {
            Err(ClientError::LinkDown)
        } else if !self.is_authorized() {
            Err(ClientError::NotAuthorized)
        } else {
            Ok(())
        }
    }

    pub fn set_phase(&mut self, phase: LinkPhase) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "link phase transition");
            self.phase = phase;
        }
    }

    pub fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Installs a fresh transport, closing any previous one first. At most
    /// one live transport per connection.
    pub fn install_link(&mut self, link: Link) {
        self.close_link();
        self.link = Some(link);
    }

    pub fn close_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
        }
        // Dropping the waiters' senders wakes every in-flight caller with a
        // closed-channel error.
        self.waiters.clear();
    }

    pub fn cancel_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    /// Full teardown for an explicit disconnect: no transport, no
    /// authorization, no buffered ticks, no stale subscription ids.
    pub fn reset_for_disconnect(&mut self) {
        self.cancel_reconnect_timer();
        self.close_link();
        self.set_phase(LinkPhase::Disconnected);
        self.reconnecting = false;
        self.link_down = false;
        self.ticks.clear();
        self.tick_subscription_id = None;
        self.proposal_subscription_id = None;
        self.open_contract_subscription_id = None;
        self.pending_purchase = None;
    }
}

impl Drop for ConnectionState {
    fn drop(&mut self) {
        self.cancel_reconnect_timer();
        self.close_link();
    }
}
