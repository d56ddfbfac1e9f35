use crate::error::VenueError;
use crate::models::{Bar, FillSide};
use crate::venue::{AccountSnapshot, OrderAck, OrderState, OrderUpdate, Venue};
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use log::{info, warn};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;

const REQUEST_DELAY: Duration = Duration::from_millis(350);

/// Credentials and routing for the venue REST API. Secrets come from the
/// environment, never from config files.
#[derive(Debug, Clone)]
pub struct VenueCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
}

impl VenueCredentials {
    pub fn from_env(base_url: String) -> Result<Self> {
        Ok(Self {
            api_key: std::env::var("VENUE_API_KEY").context("VENUE_API_KEY is not set")?,
            api_secret: std::env::var("VENUE_API_SECRET").context("VENUE_API_SECRET is not set")?,
            base_url,
        })
    }
}

/// REST client for a single trading symbol on the venue. Each request
/// carries the key headers; a small delay between requests keeps the
/// client under the venue rate limit.
pub struct RestVenue {
    http: Client,
    base_url: String,
    headers: HeaderMap,
    symbol: String,
}

impl RestVenue {
    pub fn new(creds: &VenueCredentials, symbol: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-API-KEY",
            HeaderValue::from_str(&creds.api_key).context("invalid venue API key")?,
        );
        headers.insert(
            "X-API-SECRET",
            HeaderValue::from_str(&creds.api_secret).context("invalid venue API secret")?,
        );

        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: creds.base_url.trim_end_matches('/').to_string(),
            headers,
            symbol: symbol.to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, VenueError> {
        sleep(REQUEST_DELAY).await;
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(url)
            .headers(self.headers.clone())
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, VenueError> {
        sleep(REQUEST_DELAY).await;
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(url)
            .headers(self.headers.clone())
            .query(query)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, VenueError> {
        sleep(REQUEST_DELAY).await;
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(url)
            .headers(self.headers.clone())
            .json(body)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, VenueError> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(VenueError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json::<T>().await?)
    }
}

impl Venue for RestVenue {
    async fn place_market_order(
        &self,
        side: FillSide,
        quantity: f64,
    ) -> Result<OrderAck, VenueError> {
        let body = json!({
            "symbol": self.symbol,
            "side": side.as_str(),
            "type": "market",
            "quantity": quantity,
        });
        let order: VenueOrder = self.post("/orders", &body).await?;
        info!(
            "Placed {} market order {} for {:.8} {}",
            side.as_str(),
            order.id,
            quantity,
            self.symbol
        );
        Ok(OrderAck {
            state: order.normalized_state(),
            order_id: order.id,
        })
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderUpdate, VenueError> {
        let order: VenueOrder = match self.get(&format!("/orders/{}", order_id)).await {
            Ok(order) => order,
            Err(VenueError::Rejected { status: 404, .. }) => {
                return Err(VenueError::UnknownOrder(order_id.to_string()))
            }
            Err(err) => return Err(err),
        };
        Ok(order.into_update())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool, VenueError> {
        sleep(REQUEST_DELAY).await;
        let url = format!("{}/orders/{}", self.base_url, order_id);
        let response = self
            .http
            .delete(url)
            .headers(self.headers.clone())
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            warn!("Venue reported order {} missing while cancelling", order_id);
            return Ok(false);
        }
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            info!(
                "Venue refused to cancel order {} because it is no longer cancelable",
                order_id
            );
            return Ok(false);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(VenueError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(true)
    }

    async fn account_snapshot(&self) -> Result<AccountSnapshot, VenueError> {
        let account: VenueAccount = self.get("/account").await?;
        let orders: Vec<VenueOrder> = self
            .get_with_query("/orders", &[("symbol", self.symbol.as_str()), ("status", "open")])
            .await?;
        let positions: Vec<VenuePosition> = self.get("/positions").await?;

        let position_quantity = positions
            .iter()
            .filter(|p| p.symbol.eq_ignore_ascii_case(&self.symbol))
            .map(|p| p.quantity)
            .sum();

        Ok(AccountSnapshot {
            cash: account.cash,
            equity: account.equity,
            position_quantity,
            open_orders: orders.into_iter().map(VenueOrder::into_update).collect(),
        })
    }

    async fn recent_bars(&self, limit: usize) -> Result<Vec<Bar>, VenueError> {
        let limit = limit.to_string();
        let rows: Vec<VenueBar> = self
            .get_with_query(
                "/bars",
                &[
                    ("symbol", self.symbol.as_str()),
                    ("interval", "1h"),
                    ("limit", limit.as_str()),
                ],
            )
            .await?;
        let mut bars: Vec<Bar> = rows
            .into_iter()
            .filter_map(|row| row.into_bar())
            .collect();
        bars.sort_by_key(|b| b.timestamp);
        Ok(bars)
    }
}

#[derive(Debug, Deserialize)]
struct VenueAccount {
    cash: f64,
    equity: f64,
}

#[derive(Debug, Deserialize)]
struct VenuePosition {
    symbol: String,
    quantity: f64,
}

#[derive(Debug, Deserialize)]
struct VenueOrder {
    id: String,
    status: String,
    #[serde(default)]
    filled_quantity: f64,
    #[serde(default)]
    avg_fill_price: Option<f64>,
}

impl VenueOrder {
    fn normalized_state(&self) -> OrderState {
        match self.status.trim().to_ascii_lowercase().as_str() {
            "filled" => OrderState::Filled,
            "rejected" | "expired" => OrderState::Rejected,
            value if is_cancel_status(value) => OrderState::Cancelled,
            _ => OrderState::Submitted,
        }
    }

    fn into_update(self) -> OrderUpdate {
        OrderUpdate {
            state: self.normalized_state(),
            order_id: self.id,
            filled_quantity: self.filled_quantity,
            avg_fill_price: self.avg_fill_price,
        }
    }
}

#[derive(Debug, Deserialize)]
struct VenueBar {
    timestamp: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl VenueBar {
    fn into_bar(self) -> Option<Bar> {
        let timestamp: DateTime<Utc> = Utc.timestamp_millis_opt(self.timestamp).single()?;
        Some(Bar {
            timestamp,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        })
    }
}

fn is_cancel_status(status: &str) -> bool {
    matches!(
        status,
        "canceled" | "cancelled" | "pending_cancel" | "done_for_day" | "stopped"
    )
}
