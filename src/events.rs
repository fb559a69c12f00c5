/// file: src/events.rs
/// description: Typed per-category observer registry for push events. Each
/// category is its own broadcast channel; dropping a receiver deregisters it.
use crate::protocol::{
    BalanceUpdate, OpenContract, PriceProposal, SellAck, TickSample, TradeContract,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

// Slow observers fall behind (broadcast lag) instead of blocking dispatch.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Link lifecycle notifications.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    Authorized { login_id: String },
    Disconnected,
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// Reconnect attempt cap exceeded; no further automatic recovery.
    LinkDown { attempts: u32 },
}

/// Read-only catalog responses.
#[derive(Debug, Clone)]
pub enum CatalogEvent {
    ContractsFor(Arc<Value>),
    TradingDurations(Arc<Value>),
    ActiveSymbols(Arc<Value>),
}

/// A post-authorization venue error no caller is synchronously waiting on.
#[derive(Debug, Clone)]
pub struct VenueErrorEvent {
    pub code: String,
    pub message: String,
    pub msg_type: String,
}

#[derive(Debug, Clone)]
pub struct EventBus {
    ticks: broadcast::Sender<TickSample>,
    history: broadcast::Sender<Arc<Vec<TickSample>>>,
    proposals: broadcast::Sender<PriceProposal>,
    buys: broadcast::Sender<TradeContract>,
    sells: broadcast::Sender<SellAck>,
    contract_updates: broadcast::Sender<Arc<OpenContract>>,
    balances: broadcast::Sender<BalanceUpdate>,
    catalogs: broadcast::Sender<CatalogEvent>,
    errors: broadcast::Sender<VenueErrorEvent>,
    link: broadcast::Sender<LinkEvent>,
}

macro_rules! channel {
    () => {
        broadcast::channel(EVENT_CHANNEL_CAPACITY).0
    };
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus {
            ticks: channel!(),
            history: channel!(),
            proposals: channel!(),
            buys: channel!(),
            sells: channel!(),
            contract_updates: channel!(),
            balances: channel!(),
            catalogs: channel!(),
            errors: channel!(),
            link: channel!(),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_ticks(&self) -> broadcast::Receiver<TickSample> {
        self.ticks.subscribe()
    }

    pub fn subscribe_history(&self) -> broadcast::Receiver<Arc<Vec<TickSample>>> {
        self.history.subscribe()
    }

    pub fn subscribe_proposals(&self) -> broadcast::Receiver<PriceProposal> {
        self.proposals.subscribe()
    }

    pub fn subscribe_buys(&self) -> broadcast::Receiver<TradeContract> {
        self.buys.subscribe()
    }

    pub fn subscribe_sells(&self) -> broadcast::Receiver<SellAck> {
        self.sells.subscribe()
    }

    pub fn subscribe_contract_updates(&self) -> broadcast::Receiver<Arc<OpenContract>> {
        self.contract_updates.subscribe()
    }

    pub fn subscribe_balances(&self) -> broadcast::Receiver<BalanceUpdate> {
        self.balances.subscribe()
    }

    pub fn subscribe_catalogs(&self) -> broadcast::Receiver<CatalogEvent> {
        self.catalogs.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<VenueErrorEvent> {
        self.errors.subscribe()
    }

    pub fn subscribe_link(&self) -> broadcast::Receiver<LinkEvent> {
        self.link.subscribe()
    }

    // Emission is infallible by design: a send error only means no observer
    // is currently registered for that category.

    pub(crate) fn emit_tick(&self, tick: TickSample) {
        let _ = self.ticks.send(tick);
    }

    pub(crate) fn emit_history(&self, samples: Vec<TickSample>) {
        let _ = self.history.send(Arc::new(samples));
    }

    pub(crate) fn emit_proposal(&self, proposal: PriceProposal) {
        let _ = self.proposals.send(proposal);
    }

    pub(crate) fn emit_buy(&self, contract: TradeContract) {
        let _ = self.buys.send(contract);
    }

    pub(crate) fn emit_sell(&self, sell: SellAck) {
        let _ = self.sells.send(sell);
    }

    pub(crate) fn emit_contract_update(&self, update: OpenContract) {
        let _ = self.contract_updates.send(Arc::new(update));
    }

    pub(crate) fn emit_balance(&self, balance: BalanceUpdate) {
        let _ = self.balances.send(balance);
    }

    pub(crate) fn emit_catalog(&self, event: CatalogEvent) {
        let _ = self.catalogs.send(event);
    }

    pub(crate) fn emit_error(&self, event: VenueErrorEvent) {
        let _ = self.errors.send(event);
    }

    pub(crate) fn emit_link(&self, event: LinkEvent) {
        let _ = self.link.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn multiple_observers_each_receive_events() {
        let bus = EventBus::new();
        let mut a = bus.subscribe_ticks();
        let mut b = bus.subscribe_ticks();

        bus.emit_tick(TickSample { quote: 1.5, epoch: 10 });

        assert_eq!(a.recv().await.unwrap().epoch, 10);
        assert_eq!(b.recv().await.unwrap().epoch, 10);
    }

    #[tokio::test]
    async fn dropped_receiver_does_not_block_emission() {
        let bus = EventBus::new();
        let rx = bus.subscribe_link();
        drop(rx);
        // No observer left; emission is a no-op.
        bus.emit_link(LinkEvent::Disconnected);
    }
}
