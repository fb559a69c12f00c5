/// file: src/protocol.rs
/// description: Wire types for the venue's JSON WebSocket api: outbound request
/// builders and the inbound message envelope decoded at the dispatch boundary.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One timestamped price sample for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickSample {
    pub quote: f64,
    pub epoch: i64,
}

impl TickSample {
    pub fn datetime_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.epoch, 0).unwrap_or_else(Utc::now)
    }
}

/// Shape variants certain contract types add on top of the common fields.
/// Digit predictions carry a barrier, multipliers carry a multiplier,
/// everything else carries neither.
#[derive(Debug, Clone, PartialEq)]
pub enum ContractKind {
    Digit { barrier: String },
    Multiplier { multiplier: f64 },
    Vanilla,
}

impl ContractKind {
    pub fn barrier(&self) -> Option<&str> {
        match self {
            ContractKind::Digit { barrier } => Some(barrier),
            _ => None,
        }
    }
}

/// Parameters for a proposal (quote) subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposalConfig {
    pub symbol: String,
    pub contract_type: String,
    pub duration: u32,
    pub duration_unit: String,
    pub stake: f64,
    pub currency: String,
    pub kind: ContractKind,
}

/// Parameters for a purchase by proposal id.
#[derive(Debug, Clone)]
pub struct BuyConfig {
    pub proposal_id: String,
    /// Maximum price the caller will pay.
    pub price: f64,
    pub contract_type: String,
    pub duration: u32,
    pub duration_unit: String,
    pub kind: ContractKind,
}

/// Contract parameters staged between a `buy` send and its acknowledgment.
/// The venue's echo of these fields is only a fallback.
#[derive(Debug, Clone)]
pub struct PendingPurchase {
    pub contract_type: String,
    pub duration: u32,
    pub duration_unit: String,
    pub barrier: Option<String>,
}

/// An ephemeral quote, superseded by re-subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceProposal {
    pub id: String,
    pub ask_price: f64,
    pub payout: f64,
    pub spot: f64,
    pub date_start: i64,
    #[serde(default)]
    pub longcode: Option<String>,
}

/// A purchased position.
#[derive(Debug, Clone)]
pub struct TradeContract {
    pub contract_id: i64,
    pub buy_price: f64,
    pub payout: f64,
    pub symbol: Option<String>,
    pub contract_type: String,
    pub duration: u32,
    pub duration_unit: String,
    pub entry_spot: Option<f64>,
    pub entry_time: Option<i64>,
    pub barrier: Option<String>,
}

// --- inbound ---------------------------------------------------------------

/// Structured `{code, message}` error the venue attaches to any response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionInfo {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeAck {
    pub loginid: String,
    #[serde(default)]
    pub balance: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub landing_company_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickEvent {
    #[serde(default)]
    pub id: Option<String>,
    pub symbol: String,
    pub quote: f64,
    pub epoch: i64,
}

/// Bulk tick backfill: parallel price/time arrays, oldest first.
#[derive(Debug, Clone, Deserialize)]
pub struct TickHistory {
    pub prices: Vec<f64>,
    pub times: Vec<i64>,
}

impl TickHistory {
    pub fn samples(&self) -> impl Iterator<Item = TickSample> + '_ {
        self.prices
            .iter()
            .zip(self.times.iter())
            .map(|(&quote, &epoch)| TickSample { quote, epoch })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuyAck {
    pub contract_id: i64,
    pub buy_price: f64,
    #[serde(default)]
    pub payout: Option<f64>,
    #[serde(default)]
    pub longcode: Option<String>,
    #[serde(default)]
    pub shortcode: Option<String>,
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub transaction_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SellAck {
    pub contract_id: i64,
    pub sold_for: f64,
    #[serde(default)]
    pub transaction_id: Option<i64>,
}

/// Full open-contract snapshot pushed on every update. The venue sends many
/// more fields; only the ones the application consumes are modeled, the rest
/// ride along in `extra`.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenContract {
    pub contract_id: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub profit: Option<f64>,
    #[serde(default)]
    pub current_spot: Option<f64>,
    #[serde(default)]
    pub entry_spot: Option<f64>,
    #[serde(default)]
    pub entry_tick_time: Option<i64>,
    #[serde(default)]
    pub is_sold: Option<u8>,
    #[serde(default)]
    pub sell_price: Option<f64>,
    #[serde(flatten)]
    pub extra: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceUpdate {
    pub balance: f64,
    pub currency: String,
    pub loginid: String,
}

/// Every inbound frame decodes into this envelope once; `msg_type` selects
/// which payload field is populated. `req_id` is the venue's echo of the
/// locally generated correlation id.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub msg_type: String,
    #[serde(default)]
    pub req_id: Option<i64>,
    #[serde(default)]
    pub error: Option<ApiError>,
    #[serde(default)]
    pub subscription: Option<SubscriptionInfo>,
    #[serde(default)]
    pub authorize: Option<AuthorizeAck>,
    #[serde(default)]
    pub tick: Option<TickEvent>,
    #[serde(default)]
    pub history: Option<TickHistory>,
    #[serde(default)]
    pub proposal: Option<PriceProposal>,
    #[serde(default)]
    pub buy: Option<BuyAck>,
    #[serde(default)]
    pub sell: Option<SellAck>,
    #[serde(default)]
    pub proposal_open_contract: Option<OpenContract>,
    #[serde(default)]
    pub balance: Option<BalanceUpdate>,
    #[serde(default)]
    pub contracts_for: Option<Value>,
    #[serde(default)]
    pub trading_durations: Option<Value>,
    #[serde(default)]
    pub active_symbols: Option<Value>,
    #[serde(default)]
    pub forget: Option<Value>,
    #[serde(default)]
    pub forget_all: Option<Value>,
}

// --- outbound --------------------------------------------------------------

/// Builders for outbound request frames. Field names match the venue's api
/// verbatim, so these serialize directly.
pub mod request {
    use super::{BuyConfig, ContractKind, ProposalConfig};
    use serde_json::{json, Value};

    pub fn authorize(token: &str, req_id: i64) -> Value {
        json!({ "authorize": token, "req_id": req_id })
    }

    pub fn ticks_history(symbol: &str, count: usize, req_id: i64) -> Value {
        json!({
            "ticks_history": symbol,
            "adjust_start_time": 1,
            "count": count,
            "end": "latest",
            "style": "ticks",
            "subscribe": 1,
            "req_id": req_id,
        })
    }

    pub fn proposal(config: &ProposalConfig, req_id: i64) -> Value {
        let mut req = json!({
            "proposal": 1,
            "amount": config.stake,
            "basis": "stake",
            "contract_type": config.contract_type,
            "currency": config.currency,
            "duration": config.duration,
            "duration_unit": config.duration_unit,
            "symbol": config.symbol,
            "subscribe": 1,
            "req_id": req_id,
        });
        match &config.kind {
            ContractKind::Digit { barrier } => {
                req["barrier"] = json!(barrier);
            }
            ContractKind::Multiplier { multiplier } => {
                req["multiplier"] = json!(multiplier);
            }
            ContractKind::Vanilla => {}
        }
        req
    }

    pub fn buy(config: &BuyConfig, req_id: i64) -> Value {
        json!({ "buy": config.proposal_id, "price": config.price, "req_id": req_id })
    }

    pub fn sell(contract_id: i64, price: f64, req_id: i64) -> Value {
        json!({ "sell": contract_id, "price": price, "req_id": req_id })
    }

    pub fn open_contract_subscribe(contract_id: i64, req_id: i64) -> Value {
        json!({
            "proposal_open_contract": 1,
            "contract_id": contract_id,
            "subscribe": 1,
            "req_id": req_id,
        })
    }

    pub fn contracts_for(symbol: &str, currency: &str, req_id: i64) -> Value {
        json!({ "contracts_for": symbol, "currency": currency, "req_id": req_id })
    }

    pub fn trading_durations(landing_company: &str, req_id: i64) -> Value {
        json!({ "trading_durations": 1, "landing_company": landing_company, "req_id": req_id })
    }

    pub fn active_symbols(req_id: i64) -> Value {
        json!({ "active_symbols": "brief", "req_id": req_id })
    }

    pub fn forget(subscription_id: &str, req_id: i64) -> Value {
        json!({ "forget": subscription_id, "req_id": req_id })
    }

    pub fn forget_all(stream_type: &str, req_id: i64) -> Value {
        json!({ "forget_all": stream_type, "req_id": req_id })
    }
}
