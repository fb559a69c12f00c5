// file: src/client.rs
// description: Per-user protocol client for the trading venue: connection state
// machine, authorization handshake, inbound dispatch, trading operations, and
// reconnection with exponential backoff.

use crate::{
    config::Config,
    error::{ClientError, ALREADY_SUBSCRIBED_CODE},
    events::{CatalogEvent, EventBus, LinkEvent, VenueErrorEvent},
    monitoring::{CONNECTED_GAUGE, MESSAGES_RECEIVED_COUNTER, RECONNECT_COUNTER, TICK_COUNTER},
    protocol::{
        request, BuyConfig, Envelope, PendingPurchase, PriceProposal, ProposalConfig, TickSample,
        TradeContract,
    },
    state::{ConnectionState, Link, LinkPhase},
};
use futures_util::{future::BoxFuture, SinkExt, StreamExt};
use serde_json::Value;
use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Cheap-clone handle to one user's venue link. All clones share the same
/// connection state; the manager hands the same handle to every caller for a
/// given user.
#[derive(Clone)]
pub struct ProtocolClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: Arc<Config>,
    user_id: String,
    state: Mutex<ConnectionState>,
    events: EventBus,
    next_req_id: AtomicI64,
}

impl ProtocolClient {
    pub fn new(config: Arc<Config>, user_id: impl Into<String>) -> Self {
        let max_ticks = config.max_ticks;
        ProtocolClient {
            inner: Arc::new(ClientInner {
                config,
                user_id: user_id.into(),
                state: Mutex::new(ConnectionState::new(max_ticks)),
                events: EventBus::new(),
                next_req_id: AtomicI64::new(1),
            }),
        }
    }

    /// True when both handles refer to the same underlying client.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    /// Observer registration for push events.
    pub fn events(&self) -> EventBus {
        self.inner.events.clone()
    }

    pub async fn is_authorized(&self) -> bool {
        self.inner.state.lock().await.is_authorized()
    }

    // --- connection lifecycle ----------------------------------------------

    /// Establishes the link and authorizes with the venue. Idempotent fast
    /// path: already authorized with identical credentials means no new
    /// transport is created.
    pub async fn connect(
        &self,
        token: &str,
        login_id: Option<&str>,
    ) -> Result<(), ClientError> {
        if token.is_empty() {
            return Err(ClientError::MissingToken);
        }

        {
            let state = self.inner.state.lock().await;
            let same_token = state.token.as_deref() == Some(token);
            let same_login = match login_id {
                Some(login) => state.login_id.as_deref() == Some(login),
                None => true,
            };
            if state.is_authorized() && same_token && same_login {
                debug!(user = %self.inner.user_id, "already authorized, reusing link");
                return Ok(());
            }
        }

        self.establish(token, login_id).await
    }

    /// Tears down any existing transport, dials, and runs the authorization
    /// handshake under the connect timeout. Shared by `connect` and the
    /// reconnect path.
    async fn establish(&self, token: &str, login_id: Option<&str>) -> Result<(), ClientError> {
        {
            let mut state = self.inner.state.lock().await;
            state.cancel_reconnect_timer();
            state.link_down = false;
            state.token = Some(token.to_string());
            if let Some(login) = login_id {
                state.login_id = Some(login.to_string());
            }
            state.set_phase(LinkPhase::Connecting);
            state.close_link();
        }

        let connect_timeout = self.inner.config.websocket.connect_timeout;
        match timeout(connect_timeout, self.dial_and_authorize(token)).await {
            Ok(Ok(())) => {
                self.resume_subscriptions().await;
                Ok(())
            }
            Ok(Err(e)) => {
                self.teardown_failed_connect().await;
                Err(e)
            }
            Err(_) => {
                self.teardown_failed_connect().await;
                Err(ClientError::HandshakeTimeout)
            }
        }
    }

    async fn dial_and_authorize(&self, token: &str) -> Result<(), ClientError> {
        let url = self.inner.config.websocket.url.clone();
        let (socket, _) = connect_async(url.as_str()).await?;
        info!(user = %self.inner.user_id, endpoint = %url, "transport established");

        let generation = {
            let mut state = self.inner.state.lock().await;
            state.next_generation()
        };
        let outbound_tx = self.spawn_link_tasks(socket, generation).await;

        // Authorization handshake: register the waiter before the frame can
        // possibly be answered.
        let req_id = self.next_req_id();
        let (waiter_tx, waiter_rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock().await;
            state.set_phase(LinkPhase::Authorizing);
            state.waiters.insert(req_id, waiter_tx);
        }
        outbound_tx
            .send(request::authorize(token, req_id).to_string())
            .map_err(|_| ClientError::SendFailed)?;

        match waiter_rx.await {
            Ok(Ok(_ack)) => Ok(()),
            Ok(Err(e)) => Err(e),
            // Sender dropped: the transport closed before the handshake
            // resolved.
            Err(_) => Err(ClientError::ClosedBeforeAuth),
        }
    }

    /// Splits the socket into writer/reader tasks and installs the link.
    async fn spawn_link_tasks(
        &self,
        socket: WsStream,
        generation: u64,
    ) -> mpsc::UnboundedSender<String> {
        let (mut sink, mut stream) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

        let writer = tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_client = self.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => reader_client.dispatch_text(&text).await,
                    Ok(Message::Close(frame)) => {
                        debug!(user = %reader_client.inner.user_id, ?frame, "close frame");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(user = %reader_client.inner.user_id, error = %e, "stream error");
                        break;
                    }
                }
            }
            reader_client.on_link_closed(generation).await;
        });

        {
            let mut state = self.inner.state.lock().await;
            state.install_link(Link {
                outbound: outbound_tx.clone(),
                writer: Some(writer),
                reader: Some(reader),
                generation,
            });
        }
        outbound_tx
    }

    async fn teardown_failed_connect(&self) {
        let mut state = self.inner.state.lock().await;
        state.close_link();
        state.set_phase(LinkPhase::Disconnected);
        CONNECTED_GAUGE.set(0.0);
    }

    /// Explicit disconnect: cancels any pending reconnect, closes the
    /// transport, clears authorization, the tick buffer, and subscription ids.
    pub async fn disconnect(&self) {
        {
            let mut state = self.inner.state.lock().await;
            state.reset_for_disconnect();
        }
        CONNECTED_GAUGE.set(0.0);
        self.inner.events.emit_link(LinkEvent::Disconnected);
        info!(user = %self.inner.user_id, "disconnected");
    }

    // --- reconnection ------------------------------------------------------

    /// Reader-task callback when a transport dies. Stale generations from a
    /// replaced transport are ignored.
    async fn on_link_closed(&self, generation: u64) {
        let was_authorized = {
            let mut state = self.inner.state.lock().await;
            match state.link.take() {
                Some(mut link) if link.generation == generation => {
                    // This callback runs on the reader task itself; detach
                    // the reader handle so closing does not cancel the
                    // reconnect scheduling below.
                    link.reader.take();
                    link.close();
                }
                Some(link) => {
                    state.link = Some(link);
                    return;
                }
                None => return,
            }
            // Wake every in-flight waiter with a closed-channel error.
            state.waiters.clear();
            let was_authorized = state.is_authorized();
            state.set_phase(if was_authorized {
                LinkPhase::Reconnecting
            } else {
                LinkPhase::Disconnected
            });
            was_authorized
        };

        CONNECTED_GAUGE.set(0.0);
        self.inner.events.emit_link(LinkEvent::Disconnected);

        if was_authorized {
            warn!(user = %self.inner.user_id, "transport closed unexpectedly");
            self.schedule_reconnect().await;
        }
    }

    async fn schedule_reconnect(&self) {
        let (attempt, delay) = {
            let mut state = self.inner.state.lock().await;
            if state.reconnecting {
                return;
            }
            if state.reconnect_attempts >= self.inner.config.reconnect.max_attempts {
                let attempts = state.reconnect_attempts;
                state.link_down = true;
                state.set_phase(LinkPhase::Disconnected);
                error!(
                    user = %self.inner.user_id,
                    attempts,
                    "reconnect attempt cap exceeded, link is down for good"
                );
                self.inner.events.emit_link(LinkEvent::LinkDown { attempts });
                return;
            }
            state.reconnecting = true;
            state.reconnect_attempts += 1;
            let attempt = state.reconnect_attempts;
            (attempt, self.inner.config.reconnect.delay_for_attempt(attempt))
        };

        RECONNECT_COUNTER.increment(1);
        warn!(
            user = %self.inner.user_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        self.inner.events.emit_link(LinkEvent::Reconnecting {
            attempt,
            delay_ms: delay.as_millis() as u64,
        });

        let client = self.clone();
        let timer = tokio::spawn(async move {
            sleep(delay).await;
            client.reconnect_once().await;
        });
        let mut state = self.inner.state.lock().await;
        state.reconnect_timer = Some(timer);
    }

    /// Boxed: the retry chain (timer task, establish, reader task,
    /// `schedule_reconnect`) would otherwise form a self-referential opaque
    /// future type.
    fn reconnect_once(&self) -> BoxFuture<'static, ()> {
        let client = self.clone();
        Box::pin(async move {
            let (token, login_id) = {
                let mut state = client.inner.state.lock().await;
                // This task is the pending timer; detach the handle so the
                // establish path does not abort its own execution.
                state.reconnect_timer.take();
                (state.token.clone(), state.login_id.clone())
            };
            let Some(token) = token else {
                let mut state = client.inner.state.lock().await;
                state.reconnecting = false;
                state.set_phase(LinkPhase::Disconnected);
                return;
            };

            let result = client.establish(&token, login_id.as_deref()).await;
            {
                let mut state = client.inner.state.lock().await;
                state.reconnecting = false;
            }
            match result {
                Ok(()) => {
                    info!(user = %client.inner.user_id, "reconnected and re-authorized");
                }
                Err(e) => {
                    warn!(user = %client.inner.user_id, error = %e, "reconnect attempt failed");
                    {
                        let mut state = client.inner.state.lock().await;
                        state.set_phase(LinkPhase::Reconnecting);
                    }
                    client.schedule_reconnect().await;
                }
            }
        })
    }

    /// Re-issues the desired subscriptions after a successful (re)authorize.
    async fn resume_subscriptions(&self) {
        let (symbol, proposal) = {
            let state = self.inner.state.lock().await;
            (state.desired_symbol.clone(), state.desired_proposal.clone())
        };
        if let Some(symbol) = symbol {
            debug!(user = %self.inner.user_id, %symbol, "resuming tick subscription");
            let frame = request::ticks_history(&symbol, self.inner.config.max_ticks, self.next_req_id());
            let _ = self.send_frame(frame).await;
        }
        if let Some(config) = proposal {
            debug!(user = %self.inner.user_id, symbol = %config.symbol, "resuming proposal subscription");
            let frame = request::proposal(&config, self.next_req_id());
            let _ = self.send_frame(frame).await;
        }
    }

    // --- outbound operations -----------------------------------------------

    /// Requests backfill plus a live tick stream for the symbol, superseding
    /// any previous tick subscription.
    pub async fn subscribe_to_symbol(&self, symbol: &str) -> Result<(), ClientError> {
        {
            let mut state = self.inner.state.lock().await;
            state.ensure_authorized()?;
            state.desired_symbol = Some(symbol.to_string());
        }
        let frame = request::ticks_history(symbol, self.inner.config.max_ticks, self.next_req_id());
        self.send_frame(frame).await
    }

    /// Cancels any live proposal stream and requests a new quote stream for
    /// the given contract parameters.
    pub async fn subscribe_to_proposal(&self, config: ProposalConfig) -> Result<(), ClientError> {
        let superseded = {
            let mut state = self.inner.state.lock().await;
            state.ensure_authorized()?;
            state.desired_proposal = Some(config.clone());
            state.proposal_subscription_id.take()
        };
        if let Some(id) = superseded {
            let _ = self.send_frame(request::forget(&id, self.next_req_id())).await;
        }
        self.send_frame(request::proposal(&config, self.next_req_id())).await
    }

    /// Sends a purchase-by-proposal-id request. The contract parameters are
    /// staged so the buy acknowledgment can be enriched with them.
    pub async fn buy_contract(&self, config: BuyConfig) -> Result<(), ClientError> {
        {
            let mut state = self.inner.state.lock().await;
            state.ensure_authorized()?;
            state.pending_purchase = Some(PendingPurchase {
                contract_type: config.contract_type.clone(),
                duration: config.duration,
                duration_unit: config.duration_unit.clone(),
                barrier: config.kind.barrier().map(str::to_string),
            });
        }
        self.send_frame(request::buy(&config, self.next_req_id())).await
    }

    pub async fn sell_contract(&self, contract_id: i64, price: f64) -> Result<(), ClientError> {
        self.require_authorized().await?;
        self.send_frame(request::sell(contract_id, price, self.next_req_id())).await
    }

    /// Available contract types for a symbol. Request/response with the
    /// caller suspended until the correlated reply or timeout.
    pub async fn contracts_for(&self, symbol: &str, currency: &str) -> Result<Value, ClientError> {
        self.require_authorized().await?;
        let req_id = self.next_req_id();
        let env = self
            .request_response(request::contracts_for(symbol, currency, req_id), req_id)
            .await?;
        env.contracts_for
            .ok_or_else(|| ClientError::Protocol("contracts_for payload missing".into()))
    }

    pub async fn trading_durations(&self, landing_company: &str) -> Result<Value, ClientError> {
        self.require_authorized().await?;
        let req_id = self.next_req_id();
        let env = self
            .request_response(request::trading_durations(landing_company, req_id), req_id)
            .await?;
        env.trading_durations
            .ok_or_else(|| ClientError::Protocol("trading_durations payload missing".into()))
    }

    pub async fn active_symbols(&self) -> Result<Value, ClientError> {
        self.require_authorized().await?;
        let req_id = self.next_req_id();
        let env = self
            .request_response(request::active_symbols(req_id), req_id)
            .await?;
        env.active_symbols
            .ok_or_else(|| ClientError::Protocol("active_symbols payload missing".into()))
    }

    /// Forgets an arbitrary venue-assigned subscription id, clearing any
    /// local bookkeeping that refers to it.
    pub async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), ClientError> {
        {
            let mut state = self.inner.state.lock().await;
            state.ensure_authorized()?;
            if state.tick_subscription_id.as_deref() == Some(subscription_id) {
                state.tick_subscription_id = None;
                state.desired_symbol = None;
            }
            if state.proposal_subscription_id.as_deref() == Some(subscription_id) {
                state.proposal_subscription_id = None;
                state.desired_proposal = None;
            }
            if state.open_contract_subscription_id.as_deref() == Some(subscription_id) {
                state.open_contract_subscription_id = None;
            }
        }
        self.send_frame(request::forget(subscription_id, self.next_req_id())).await
    }

    pub async fn cancel_tick_subscription(&self) -> Result<(), ClientError> {
        let id = {
            let mut state = self.inner.state.lock().await;
            state.ensure_authorized()?;
            state.desired_symbol = None;
            state.tick_subscription_id.take()
        };
        match id {
            Some(id) => self.send_frame(request::forget(&id, self.next_req_id())).await,
            None => Ok(()),
        }
    }

    pub async fn cancel_proposal_subscription(&self) -> Result<(), ClientError> {
        let id = {
            let mut state = self.inner.state.lock().await;
            state.ensure_authorized()?;
            state.desired_proposal = None;
            state.proposal_subscription_id.take()
        };
        match id {
            Some(id) => self.send_frame(request::forget(&id, self.next_req_id())).await,
            None => Ok(()),
        }
    }

    /// Forgets every subscription of one stream type (`"ticks"`,
    /// `"proposal"`, `"proposal_open_contract"`, ...), clearing the matching
    /// local bookkeeping.
    pub async fn cancel_all_subscriptions(&self, stream_type: &str) -> Result<(), ClientError> {
        {
            let mut state = self.inner.state.lock().await;
            state.ensure_authorized()?;
            match stream_type {
                "ticks" => {
                    state.desired_symbol = None;
                    state.tick_subscription_id = None;
                }
                "proposal" => {
                    state.desired_proposal = None;
                    state.proposal_subscription_id = None;
                }
                "proposal_open_contract" => {
                    state.open_contract_subscription_id = None;
                }
                _ => {}
            }
        }
        self.send_frame(request::forget_all(stream_type, self.next_req_id())).await
    }

    /// Immutable snapshot of the tick buffer, oldest first.
    pub async fn ticks(&self) -> Vec<TickSample> {
        self.inner.state.lock().await.ticks.snapshot()
    }

    async fn require_authorized(&self) -> Result<(), ClientError> {
        self.inner.state.lock().await.ensure_authorized()
    }

    fn next_req_id(&self) -> i64 {
        self.inner.next_req_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn send_frame(&self, frame: Value) -> Result<(), ClientError> {
        let state = self.inner.state.lock().await;
        let link = state.link.as_ref().ok_or(ClientError::SendFailed)?;
        link.outbound
            .send(frame.to_string())
            .map_err(|_| ClientError::SendFailed)
    }

    /// Registers a waiter for `req_id`, sends the frame, and suspends until
    /// the correlated reply or the request timeout.
    async fn request_response(&self, frame: Value, req_id: i64) -> Result<Envelope, ClientError> {
        let (waiter_tx, waiter_rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock().await;
            state.waiters.insert(req_id, waiter_tx);
        }
        if let Err(e) = self.send_frame(frame).await {
            let mut state = self.inner.state.lock().await;
            state.waiters.remove(&req_id);
            return Err(e);
        }

        match timeout(self.inner.config.websocket.request_timeout, waiter_rx).await {
            Ok(Ok(result)) => result,
            // Waiter sender dropped: the link died under the request.
            Ok(Err(_)) => Err(ClientError::LinkClosed),
            Err(_) => {
                let mut state = self.inner.state.lock().await;
                state.waiters.remove(&req_id);
                Err(ClientError::RequestTimeout)
            }
        }
    }

    // --- inbound dispatch --------------------------------------------------

    pub(crate) async fn dispatch_text(&self, text: &str) {
        MESSAGES_RECEIVED_COUNTER.increment(1);
        match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => self.dispatch(envelope).await,
            Err(e) => {
                warn!(
                    user = %self.inner.user_id,
                    error = %e,
                    snippet = %text.chars().take(120).collect::<String>(),
                    "dropping malformed venue message"
                );
            }
        }
    }

    async fn dispatch(&self, envelope: Envelope) {
        if envelope.error.is_some() {
            self.handle_error_payload(envelope).await;
            return;
        }

        match envelope.msg_type.as_str() {
            "authorize" => self.handle_authorize(&envelope).await,
            "history" | "ticks_history" => self.handle_history(&envelope).await,
            "tick" => self.handle_tick(&envelope).await,
            "proposal" => self.handle_proposal(&envelope).await,
            "buy" => self.handle_buy(&envelope).await,
            "sell" => self.handle_sell(&envelope).await,
            "proposal_open_contract" => self.handle_open_contract(&envelope).await,
            "balance" => self.handle_balance(&envelope).await,
            "contracts_for" => {
                if let Some(payload) = &envelope.contracts_for {
                    self.inner
                        .events
                        .emit_catalog(CatalogEvent::ContractsFor(Arc::new(payload.clone())));
                }
            }
            "trading_durations" => {
                if let Some(payload) = &envelope.trading_durations {
                    self.inner
                        .events
                        .emit_catalog(CatalogEvent::TradingDurations(Arc::new(payload.clone())));
                }
            }
            "active_symbols" => {
                if let Some(payload) = &envelope.active_symbols {
                    self.inner
                        .events
                        .emit_catalog(CatalogEvent::ActiveSymbols(Arc::new(payload.clone())));
                }
            }
            "forget" | "forget_all" => {
                debug!(user = %self.inner.user_id, msg_type = %envelope.msg_type, "subscription forgotten");
            }
            other => {
                warn!(user = %self.inner.user_id, msg_type = other, "unrecognized venue message");
            }
        }

        self.resolve_waiter(envelope).await;
    }

    async fn resolve_waiter(&self, envelope: Envelope) {
        let Some(req_id) = envelope.req_id else { return };
        let waiter = {
            let mut state = self.inner.state.lock().await;
            state.waiters.remove(&req_id)
        };
        if let Some(waiter) = waiter {
            let _ = waiter.send(Ok(envelope));
        }
    }

    async fn handle_error_payload(&self, envelope: Envelope) {
        let Some(err) = envelope.error.clone() else { return };
        let waiter = {
            let mut state = self.inner.state.lock().await;
            envelope.req_id.and_then(|id| state.waiters.remove(&id))
        };

        if let Some(waiter) = waiter {
            let client_err = if envelope.msg_type == "authorize" {
                ClientError::from_auth_rejection(&err.code, &err.message)
            } else {
                ClientError::RequestRejected {
                    code: err.code,
                    message: err.message,
                }
            };
            let _ = waiter.send(Err(client_err));
            return;
        }

        if err.code == ALREADY_SUBSCRIBED_CODE {
            debug!(user = %self.inner.user_id, msg_type = %envelope.msg_type, "already subscribed, ignoring");
            return;
        }

        warn!(
            user = %self.inner.user_id,
            code = %err.code,
            message = %err.message,
            msg_type = %envelope.msg_type,
            "venue error"
        );
        self.inner.events.emit_error(VenueErrorEvent {
            code: err.code,
            message: err.message,
            msg_type: envelope.msg_type,
        });
    }

    async fn handle_authorize(&self, envelope: &Envelope) {
        let Some(ack) = &envelope.authorize else {
            warn!(user = %self.inner.user_id, "authorize ack without payload");
            return;
        };
        {
            let mut state = self.inner.state.lock().await;
            state.login_id = Some(ack.loginid.clone());
            state.reconnect_attempts = 0;
            state.reconnecting = false;
            state.set_phase(LinkPhase::Authorized);
        }
        CONNECTED_GAUGE.set(1.0);
        info!(user = %self.inner.user_id, login_id = %ack.loginid, "authorized");
        self.inner.events.emit_link(LinkEvent::Authorized {
            login_id: ack.loginid.clone(),
        });
    }

    async fn handle_history(&self, envelope: &Envelope) {
        let Some(history) = &envelope.history else {
            warn!(user = %self.inner.user_id, "history message without payload");
            return;
        };
        let snapshot = {
            let mut state = self.inner.state.lock().await;
            state.ticks.seed(history.samples());
            if let Some(sub) = &envelope.subscription {
                state.tick_subscription_id = Some(sub.id.clone());
            }
            state.ticks.snapshot()
        };
        debug!(user = %self.inner.user_id, samples = snapshot.len(), "tick backfill seeded");
        self.inner.events.emit_history(snapshot);
    }

    async fn handle_tick(&self, envelope: &Envelope) {
        let Some(tick) = &envelope.tick else {
            warn!(user = %self.inner.user_id, "tick message without payload");
            return;
        };
        let sample = TickSample {
            quote: tick.quote,
            epoch: tick.epoch,
        };
        {
            let mut state = self.inner.state.lock().await;
            state.ticks.push(sample);
            if state.tick_subscription_id.is_none() {
                if let Some(id) = &tick.id {
                    state.tick_subscription_id = Some(id.clone());
                }
            }
        }
        TICK_COUNTER.increment(1);
        self.inner.events.emit_tick(sample);
    }

    async fn handle_proposal(&self, envelope: &Envelope) {
        let Some(proposal) = &envelope.proposal else {
            warn!(user = %self.inner.user_id, "proposal message without payload");
            return;
        };
        {
            let mut state = self.inner.state.lock().await;
            let id = envelope
                .subscription
                .as_ref()
                .map(|s| s.id.clone())
                .unwrap_or_else(|| proposal.id.clone());
            state.proposal_subscription_id = Some(id);
        }
        self.inner.events.emit_proposal(PriceProposal {
            id: proposal.id.clone(),
            ask_price: proposal.ask_price,
            payout: proposal.payout,
            spot: proposal.spot,
            date_start: proposal.date_start,
            longcode: proposal.longcode.clone(),
        });
    }

    async fn handle_buy(&self, envelope: &Envelope) {
        let Some(ack) = &envelope.buy else {
            warn!(user = %self.inner.user_id, "buy ack without payload");
            return;
        };
        let (pending, symbol) = {
            let mut state = self.inner.state.lock().await;
            (state.pending_purchase.take(), state.desired_symbol.clone())
        };

        // Staged purchase metadata wins over whatever the venue echoes back.
        let contract = match pending {
            Some(meta) => TradeContract {
                contract_id: ack.contract_id,
                buy_price: ack.buy_price,
                payout: ack.payout.unwrap_or_default(),
                symbol,
                contract_type: meta.contract_type,
                duration: meta.duration,
                duration_unit: meta.duration_unit,
                entry_spot: None,
                entry_time: ack.start_time,
                barrier: meta.barrier,
            },
            None => {
                warn!(
                    user = %self.inner.user_id,
                    contract_id = ack.contract_id,
                    "buy ack without staged purchase metadata"
                );
                TradeContract {
                    contract_id: ack.contract_id,
                    buy_price: ack.buy_price,
                    payout: ack.payout.unwrap_or_default(),
                    symbol,
                    contract_type: String::new(),
                    duration: 0,
                    duration_unit: String::new(),
                    entry_spot: None,
                    entry_time: ack.start_time,
                    barrier: None,
                }
            }
        };

        info!(
            user = %self.inner.user_id,
            contract_id = contract.contract_id,
            buy_price = contract.buy_price,
            "contract purchased"
        );

        // Track the contract's lifecycle from the moment of purchase.
        let frame = request::open_contract_subscribe(ack.contract_id, self.next_req_id());
        if let Err(e) = self.send_frame(frame).await {
            warn!(user = %self.inner.user_id, error = %e, "failed to subscribe to contract updates");
        }

        self.inner.events.emit_buy(contract);
    }

    async fn handle_sell(&self, envelope: &Envelope) {
        let Some(ack) = &envelope.sell else {
            warn!(user = %self.inner.user_id, "sell ack without payload");
            return;
        };
        info!(
            user = %self.inner.user_id,
            contract_id = ack.contract_id,
            sold_for = ack.sold_for,
            "contract sold"
        );
        self.inner.events.emit_sell(ack.clone());
    }

    async fn handle_open_contract(&self, envelope: &Envelope) {
        let Some(update) = &envelope.proposal_open_contract else {
            warn!(user = %self.inner.user_id, "open contract update without payload");
            return;
        };
        {
            let mut state = self.inner.state.lock().await;
            if let Some(sub) = &envelope.subscription {
                state.open_contract_subscription_id = Some(sub.id.clone());
            }
        }
        self.inner.events.emit_contract_update(update.clone());
    }

    async fn handle_balance(&self, envelope: &Envelope) {
        let Some(balance) = &envelope.balance else {
            warn!(user = %self.inner.user_id, "balance message without payload");
            return;
        };
        self.inner.events.emit_balance(balance.clone());
    }

    // --- test support ------------------------------------------------------

    /// Installs a channel-backed link and marks the client authorized so
    /// dispatch and outbound paths can be exercised without a socket.
    #[cfg(test)]
    pub(crate) async fn install_test_link(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.inner.state.lock().await;
        let generation = state.next_generation();
        state.install_link(Link {
            outbound: tx,
            writer: None,
            reader: None,
            generation,
        });
        state.token = Some("test-token".into());
        state.set_phase(LinkPhase::Authorized);
        rx
    }

    #[cfg(test)]
    pub(crate) async fn state_snapshot<T>(
        &self,
        inspect: impl FnOnce(&ConnectionState) -> T,
    ) -> T {
        let state = self.inner.state.lock().await;
        inspect(&state)
    }

    #[cfg(test)]
    pub(crate) async fn with_state_mut<T>(
        &self,
        mutate: impl FnOnce(&mut ConnectionState) -> T,
    ) -> T {
        let mut state = self.inner.state.lock().await;
        mutate(&mut state)
    }
}
