use crate::error::VenueError;
use crate::models::{Bar, FillSide};
use serde::{Deserialize, Serialize};

/// Order lifecycle as the coordinator tracks it. Orders enter as
/// `Submitted` and move to exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    Submitted,
    Filled,
    Rejected,
    Cancelled,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Submitted => "submitted",
            OrderState::Filled => "filled",
            OrderState::Rejected => "rejected",
            OrderState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderState::Submitted)
    }
}

/// Venue acknowledgement of a newly placed order.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub state: OrderState,
}

/// Point-in-time view of one order.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderUpdate {
    pub order_id: String,
    pub state: OrderState,
    pub filled_quantity: f64,
    pub avg_fill_price: Option<f64>,
}

/// Account view used at startup reconciliation and for sizing checks.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountSnapshot {
    pub cash: f64,
    pub equity: f64,
    pub position_quantity: f64,
    pub open_orders: Vec<OrderUpdate>,
}

/// Execution surface of a trading venue. The coordinator talks only to
/// this trait, so simulations plug in a scripted venue and live runs plug
/// in the REST client.
#[allow(async_fn_in_trait)]
pub trait Venue: Send + Sync {
    async fn place_market_order(
        &self,
        side: FillSide,
        quantity: f64,
    ) -> Result<OrderAck, VenueError>;

    async fn order_status(&self, order_id: &str) -> Result<OrderUpdate, VenueError>;

    /// Returns false if the order was already in a terminal state.
    async fn cancel_order(&self, order_id: &str) -> Result<bool, VenueError>;

    async fn account_snapshot(&self) -> Result<AccountSnapshot, VenueError>;

    /// Most recent closed bars, oldest first.
    async fn recent_bars(&self, limit: usize) -> Result<Vec<Bar>, VenueError>;
}
