// =============================================================================
// Futures REST Client — HMAC-SHA256 signed requests against USDT-M futures
// =============================================================================
//
// Implements both collaborator seams consumed by the heartbeat engine:
// `MarketDataProvider` (positions, mark/funding, equity, trigger orders) and
// `OrderGateway` (stop/TP replacement, reduce-only closes).
//
// The secret never leaves this module: it exists only to sign query
// strings in `authenticate`. The API key travels as a default header on
// the HTTP client, and every private call carries a 5 s recvWindow so a
// modestly drifted clock does not invalidate the request.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, instrument};

use crate::collaborators::{
    MarkInfo, MarketDataProvider, OpenPosition, OrderAck, OrderError, OrderGateway, TriggerKind,
    TriggerOrder,
};
use crate::exchange::weight::WeightGuard;
use crate::types::PositionSide;

type HmacSha256 = Hmac<Sha256>;

/// recvWindow attached to every private call, in milliseconds.
const RECV_WINDOW: u64 = 5000;

#[derive(Debug, Clone, Copy)]
enum Method {
    Get,
    Post,
    Delete,
}

/// Signed REST client for the USDT-M futures API.
pub struct FuturesClient {
    secret: String,
    base_url: String,
    client: reqwest::Client,
    weight: WeightGuard,
}

impl FuturesClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Build a client for the given credentials. The API key goes into a
    /// default header; the secret stays private to [`Self::authenticate`].
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!("futures client ready (https://fapi.binance.com)");

        Self {
            secret,
            base_url: "https://fapi.binance.com".to_string(),
            client,
            weight: WeightGuard::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Request authentication
    // -------------------------------------------------------------------------

    /// Turn `params` into the final query string for a private endpoint:
    /// the caller's params, then `timestamp` and `recvWindow`, then an
    /// HMAC-SHA256 signature over everything that precedes it. The
    /// signature must be the last parameter.
    fn authenticate(&self, params: &str) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis();

        let mut query = String::with_capacity(params.len() + 112);
        if !params.is_empty() {
            query.push_str(params);
            query.push('&');
        }
        query.push_str(&format!("timestamp={now}&recvWindow={RECV_WINDOW}"));

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        query.push_str("&signature=");
        query.push_str(&hex::encode(mac.finalize().into_bytes()));

        query
    }

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------

    async fn signed_request(
        &self,
        method: Method,
        path: &str,
        params: &str,
        weight: u32,
    ) -> Result<serde_json::Value, OrderError> {
        if !self.weight.can_send(weight) {
            return Err(OrderError::Transport(
                "request weight budget exhausted".to_string(),
            ));
        }

        let qs = self.authenticate(params);
        let url = format!("{}{}?{}", self.base_url, path, qs);

        let req = match method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Delete => self.client.delete(&url),
        };

        let resp = req
            .send()
            .await
            .map_err(|e| OrderError::Transport(e.to_string()))?;

        self.weight.update_from_headers(resp.headers());
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            let snippet: String = body.chars().take(400).collect();
            return Err(OrderError::Rejected(format!("{}: {}", status.as_u16(), snippet)));
        }

        serde_json::from_str(&body).map_err(|e| OrderError::Transport(e.to_string()))
    }

    async fn public_get(&self, path: &str, params: &str) -> Result<serde_json::Value> {
        let url = if params.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, params)
        };
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;

        self.weight.update_from_headers(resp.headers());
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {path} response"))?;

        if !status.is_success() {
            anyhow::bail!("{path} returned {}: {}", status, body);
        }
        Ok(body)
    }

    // -------------------------------------------------------------------------
    // Position helpers
    // -------------------------------------------------------------------------

    /// Signed position amount for `symbol`: positive long, negative short.
    async fn position_amount(&self, symbol: &str) -> Result<(PositionSide, f64), OrderError> {
        let body = self
            .signed_request(
                Method::Get,
                "/fapi/v2/positionRisk",
                &format!("symbol={symbol}"),
                5,
            )
            .await?;

        let arr = body
            .as_array()
            .ok_or_else(|| OrderError::Transport("positionRisk response is not an array".into()))?;

        for entry in arr {
            let amt = str_f64(entry, "positionAmt");
            if amt != 0.0 {
                let side = if amt > 0.0 {
                    PositionSide::Long
                } else {
                    PositionSide::Short
                };
                return Ok((side, amt.abs()));
            }
        }
        Err(OrderError::Rejected(format!("no open position for {symbol}")))
    }

    /// Cancel every resting trigger order of `kind` for the symbol. Done
    /// before placing a replacement so only one protective order rests.
    async fn cancel_trigger_orders(
        &self,
        symbol: &str,
        kind: TriggerKind,
    ) -> Result<(), OrderError> {
        let orders = self
            .trigger_orders(symbol)
            .await
            .map_err(|e| OrderError::Transport(e.to_string()))?;
        for order in orders.into_iter().filter(|o| o.tpsl == kind) {
            self.signed_request(
                Method::Delete,
                "/fapi/v1/order",
                &format!("symbol={symbol}&orderId={}", order.order_id),
                1,
            )
            .await?;
            debug!(symbol, order_id = %order.order_id, "stale trigger order cancelled");
        }
        Ok(())
    }

    async fn trigger_orders(&self, symbol: &str) -> Result<Vec<TriggerOrder>> {
        let body = self
            .signed_request(
                Method::Get,
                "/fapi/v1/openOrders",
                &format!("symbol={symbol}"),
                1,
            )
            .await?;

        let arr = body
            .as_array()
            .context("openOrders response is not an array")?;

        let mut out = Vec::new();
        for o in arr {
            let kind = match o.get("type").and_then(|v| v.as_str()) {
                Some("STOP_MARKET") | Some("STOP") => TriggerKind::Sl,
                Some("TAKE_PROFIT_MARKET") | Some("TAKE_PROFIT") => TriggerKind::Tp,
                _ => continue,
            };
            let order_id = o
                .get("orderId")
                .and_then(|v| v.as_u64())
                .map(|id| id.to_string())
                .unwrap_or_default();
            out.push(TriggerOrder {
                order_id,
                tpsl: kind,
                trigger_px: str_f64(o, "stopPrice"),
            });
        }
        Ok(out)
    }

    /// Place a close-position trigger order (STOP_MARKET / TAKE_PROFIT_MARKET).
    async fn place_trigger(
        &self,
        symbol: &str,
        side: PositionSide,
        kind: TriggerKind,
        trigger_px: f64,
    ) -> Result<OrderAck, OrderError> {
        let order_side = match side {
            PositionSide::Long => "SELL",
            PositionSide::Short => "BUY",
        };
        let order_type = match kind {
            TriggerKind::Sl => "STOP_MARKET",
            TriggerKind::Tp => "TAKE_PROFIT_MARKET",
        };
        let params = format!(
            "symbol={symbol}&side={order_side}&type={order_type}&stopPrice={trigger_px}&closePosition=true&workingType=MARK_PRICE"
        );
        let body = self
            .signed_request(Method::Post, "/fapi/v1/order", &params, 1)
            .await?;

        let order_id = body
            .get("orderId")
            .and_then(|v| v.as_u64())
            .map(|id| id.to_string());
        info!(symbol, order_type, trigger_px, order_id = ?order_id, "trigger order placed");

        Ok(OrderAck {
            order_id,
            detail: format!("{order_type} at {trigger_px}"),
        })
    }

    /// Place a reduce-only MARKET order for `quantity` base units.
    async fn reduce_market(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: f64,
    ) -> Result<OrderAck, OrderError> {
        let order_side = match side {
            PositionSide::Long => "SELL",
            PositionSide::Short => "BUY",
        };
        let params = format!(
            "symbol={symbol}&side={order_side}&type=MARKET&quantity={quantity:.3}&reduceOnly=true"
        );
        let body = self
            .signed_request(Method::Post, "/fapi/v1/order", &params, 1)
            .await?;

        let order_id = body
            .get("orderId")
            .and_then(|v| v.as_u64())
            .map(|id| id.to_string());
        info!(symbol, quantity, order_id = ?order_id, "reduce-only market order placed");

        Ok(OrderAck {
            order_id,
            detail: format!("reduce-only MARKET {quantity:.3}"),
        })
    }
}

// ---------------------------------------------------------------------------
// MarketDataProvider
// ---------------------------------------------------------------------------

#[async_trait]
impl MarketDataProvider for FuturesClient {
    #[instrument(skip(self), name = "futures::list_open_positions")]
    async fn list_open_positions(&self) -> Result<Vec<OpenPosition>> {
        let body = self
            .signed_request(Method::Get, "/fapi/v2/positionRisk", "", 5)
            .await?;

        let arr = body
            .as_array()
            .context("positionRisk response is not an array")?;

        let mut positions = Vec::new();
        for entry in arr {
            let amt = str_f64(entry, "positionAmt");
            if amt == 0.0 {
                continue;
            }
            let symbol = entry
                .get("symbol")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let mark = str_f64(entry, "markPrice");
            let notional = str_f64(entry, "notional").abs();
            let margin = {
                let isolated = str_f64(entry, "isolatedMargin");
                if isolated > 0.0 {
                    isolated
                } else {
                    str_f64(entry, "initialMargin")
                }
            };

            positions.push(OpenPosition {
                symbol,
                side: if amt > 0.0 {
                    PositionSide::Long
                } else {
                    PositionSide::Short
                },
                size: if notional > 0.0 { notional } else { amt.abs() * mark },
                entry_price: str_f64(entry, "entryPrice"),
                liquidation_price: str_f64(entry, "liquidationPrice"),
                margin_used: margin,
            });
        }

        debug!(count = positions.len(), "open positions listed");
        Ok(positions)
    }

    #[instrument(skip(self), name = "futures::get_mark")]
    async fn get_mark(&self, symbol: &str) -> Result<MarkInfo> {
        let body = self
            .public_get("/fapi/v1/premiumIndex", &format!("symbol={symbol}"))
            .await?;

        Ok(MarkInfo {
            mark_price: str_f64(&body, "markPrice"),
            funding_rate: str_f64(&body, "lastFundingRate"),
        })
    }

    #[instrument(skip(self), name = "futures::get_equity")]
    async fn get_equity(&self) -> Result<f64> {
        let body = self
            .signed_request(Method::Get, "/fapi/v2/account", "", 5)
            .await?;
        Ok(str_f64(&body, "totalMarginBalance"))
    }

    #[instrument(skip(self), name = "futures::list_open_trigger_orders")]
    async fn list_open_trigger_orders(&self, symbol: &str) -> Result<Vec<TriggerOrder>> {
        self.trigger_orders(symbol).await
    }
}

// ---------------------------------------------------------------------------
// OrderGateway
// ---------------------------------------------------------------------------

#[async_trait]
impl OrderGateway for FuturesClient {
    #[instrument(skip(self), name = "futures::tighten_stop")]
    async fn tighten_stop(&self, symbol: &str, new_price: f64) -> Result<OrderAck, OrderError> {
        let (side, _qty) = self.position_amount(symbol).await?;
        self.cancel_trigger_orders(symbol, TriggerKind::Sl).await?;
        self.place_trigger(symbol, side, TriggerKind::Sl, new_price).await
    }

    #[instrument(skip(self), name = "futures::adjust_take_profit")]
    async fn adjust_take_profit(
        &self,
        symbol: &str,
        new_price: f64,
    ) -> Result<OrderAck, OrderError> {
        let (side, _qty) = self.position_amount(symbol).await?;
        self.cancel_trigger_orders(symbol, TriggerKind::Tp).await?;
        self.place_trigger(symbol, side, TriggerKind::Tp, new_price).await
    }

    #[instrument(skip(self), name = "futures::partial_close")]
    async fn partial_close(&self, symbol: &str, fraction: f64) -> Result<OrderAck, OrderError> {
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(OrderError::Rejected(format!(
                "fraction {fraction} outside (0, 1)"
            )));
        }
        let (side, qty) = self.position_amount(symbol).await?;
        self.reduce_market(symbol, side, qty * fraction).await
    }

    #[instrument(skip(self), name = "futures::close_position")]
    async fn close_position(&self, symbol: &str, reason: &str) -> Result<OrderAck, OrderError> {
        let (side, qty) = self.position_amount(symbol).await?;
        info!(symbol, reason, qty, "closing position");
        let mut ack = self.reduce_market(symbol, side, qty).await?;
        ack.detail = format!("{} ({reason})", ack.detail);
        Ok(ack)
    }
}

/// Parse a stringly-typed numeric field, 0.0 when absent or garbled.
fn str_f64(v: &serde_json::Value, key: &str) -> f64 {
    match v.get(key) {
        Some(serde_json::Value::String(s)) => s.parse().unwrap_or(0.0),
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn str_f64_handles_strings_numbers_and_absence() {
        let v = serde_json::json!({
            "a": "70123.45",
            "b": 2.5,
            "c": "garbage",
        });
        assert_eq!(str_f64(&v, "a"), 70123.45);
        assert_eq!(str_f64(&v, "b"), 2.5);
        assert_eq!(str_f64(&v, "c"), 0.0);
        assert_eq!(str_f64(&v, "missing"), 0.0);
    }

    #[test]
    fn authenticated_query_ends_with_hex_signature() {
        let client = FuturesClient::new("key", "secret");
        let qs = client.authenticate("symbol=ETHUSDT");
        assert!(qs.starts_with("symbol=ETHUSDT&timestamp="));
        assert!(qs.contains("&recvWindow=5000&signature="));

        let signature = qs.rsplit('=').next().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn empty_params_still_authenticate() {
        let client = FuturesClient::new("key", "secret");
        let qs = client.authenticate("");
        assert!(qs.starts_with("timestamp="));
        assert!(qs.contains("&recvWindow=5000&signature="));
    }
}
