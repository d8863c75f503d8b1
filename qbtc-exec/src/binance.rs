//! Binance USD-M futures adapter for the exchange port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use qbtc_connectors::{BinanceOrderResponse, BinanceRestClient};
use qbtc_domain::{Kline, OrderBook, OrderRequest, OrderStatus, Price, Side, Symbol};

use crate::error::ExecError;
use crate::ports::{AccountSnapshot, ExchangePort, ExchangePosition, OrderResult};

/// Default taker fee (0.04%); the RESULT response carries no commission
const DEFAULT_TAKER_FEE_RATE: Decimal = Decimal::from_parts(4, 0, 0, false, 4);

/// Exchange port backed by the Binance REST client.
pub struct BinanceExchange {
    client: BinanceRestClient,
    taker_fee_rate: Decimal,
}

impl BinanceExchange {
    /// Wrap a REST client.
    pub fn new(client: BinanceRestClient) -> Self {
        Self { client, taker_fee_rate: DEFAULT_TAKER_FEE_RATE }
    }

    /// Override the fee rate used to estimate commissions.
    #[must_use]
    pub fn with_taker_fee_rate(mut self, rate: Decimal) -> Self {
        self.taker_fee_rate = rate;
        self
    }

    /// Underlying REST client (listen keys, raw queries).
    pub fn client(&self) -> &BinanceRestClient {
        &self.client
    }

    fn to_order_result(&self, response: BinanceOrderResponse) -> Result<OrderResult, ExecError> {
        let status = OrderStatus::parse(&response.status).ok_or_else(|| {
            ExecError::Exchange(format!("unknown order status: {}", response.status))
        })?;
        if status == OrderStatus::Rejected {
            return Err(ExecError::OrderRejected(format!("order {} rejected", response.order_id)));
        }
        let fill = response.fill_price().ok_or_else(|| {
            ExecError::Exchange(format!("order {} has no price", response.order_id))
        })?;
        let fill_price = Price::new(fill)?;
        let fee = fill * response.executed_qty * self.taker_fee_rate;
        let filled_at =
            DateTime::from_timestamp_millis(response.update_time).unwrap_or_else(Utc::now);

        Ok(OrderResult {
            exchange_order_id: response.order_id.to_string(),
            client_order_id: response.client_order_id,
            status,
            fill_price,
            filled_quantity: response.executed_qty,
            fee,
            fee_asset: "USDT".to_string(),
            filled_at,
        })
    }
}

fn parse_order_id(order_id: &str) -> Result<u64, ExecError> {
    order_id
        .parse()
        .map_err(|_| ExecError::Validation(format!("invalid order id: {}", order_id)))
}

#[async_trait]
impl ExchangePort for BinanceExchange {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult, ExecError> {
        let response = self.client.place_order(request).await?;
        debug!(order_id = response.order_id, status = %response.status, "Binance order placed");
        self.to_order_result(response)
    }

    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> Result<(), ExecError> {
        self.client.cancel_order(symbol, parse_order_id(order_id)?).await?;
        Ok(())
    }

    async fn get_order(&self, symbol: &Symbol, order_id: &str) -> Result<OrderResult, ExecError> {
        let response = self.client.get_order(symbol, parse_order_id(order_id)?).await?;
        self.to_order_result(response)
    }

    async fn get_price(&self, symbol: &Symbol) -> Result<Price, ExecError> {
        Ok(self.client.get_price(symbol).await?)
    }

    async fn get_order_book(&self, symbol: &Symbol, limit: u32) -> Result<OrderBook, ExecError> {
        Ok(self.client.get_order_book(symbol, limit).await?)
    }

    async fn get_klines(
        &self,
        symbol: &Symbol,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Kline>, ExecError> {
        Ok(self.client.get_klines(symbol, interval, limit).await?)
    }

    async fn get_account(&self) -> Result<AccountSnapshot, ExecError> {
        let account = self.client.get_account().await?;
        let positions = account
            .positions
            .into_iter()
            .filter(|p| !p.position_amt.is_zero())
            .map(|p| ExchangePosition {
                side: if p.position_amt > Decimal::ZERO { Side::Long } else { Side::Short },
                quantity: p.position_amt.abs(),
                symbol: p.symbol,
                entry_price: p.entry_price,
                unrealized_pnl: p.unrealized_profit,
            })
            .collect();

        Ok(AccountSnapshot {
            wallet_balance: account.total_wallet_balance,
            available_balance: account.available_balance,
            unrealized_pnl: account.total_unrealized_profit,
            positions,
        })
    }

    async fn health_check(&self) -> Result<(), ExecError> {
        Ok(self.client.ping().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qbtc_domain::{OrderSide, Quantity};
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn exchange(server: &MockServer) -> BinanceExchange {
        BinanceExchange::new(
            BinanceRestClient::new("key".to_string(), "secret".to_string(), true)
                .with_base_url(server.uri()),
        )
    }

    #[tokio::test]
    async fn test_place_order_maps_fill() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fapi/v1/order"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "symbol": "BTCUSDT",
                "orderId": 7,
                "clientOrderId": "cid",
                "price": "0",
                "avgPrice": "50000",
                "origQty": "1",
                "executedQty": "1",
                "cumQuote": "50000",
                "status": "FILLED",
                "side": "BUY",
                "type": "MARKET",
                "updateTime": 1700000000000i64
            })))
            .mount(&server)
            .await;

        let request = OrderRequest::market(
            Symbol::from_pair("BTCUSDT").unwrap(),
            OrderSide::Buy,
            Quantity::new(dec!(1)).unwrap(),
        );
        let result = exchange(&server).place_order(&request).await.unwrap();
        assert_eq!(result.exchange_order_id, "7");
        assert_eq!(result.status, OrderStatus::Filled);
        assert_eq!(result.fill_price.as_decimal(), dec!(50000));
        assert_eq!(result.fee, dec!(20));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v2/account"))
            .respond_with(ResponseTemplate::new(401).set_body_json(
                serde_json::json!({
                    "code": -2015,
                    "msg": "Invalid API-key, IP, or permissions for action."
                }),
            ))
            .mount(&server)
            .await;

        let err = exchange(&server).get_account().await.unwrap_err();
        assert!(matches!(err, ExecError::Api { status: 401, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_account_keeps_only_open_positions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v2/account"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "totalWalletBalance": "1000",
                "totalUnrealizedProfit": "0",
                "totalMarginBalance": "1000",
                "availableBalance": "900",
                "positions": [
                    {
                        "symbol": "BTCUSDT", "positionAmt": "0", "entryPrice": "0",
                        "unrealizedProfit": "0", "leverage": "20"
                    },
                    {
                        "symbol": "ETHUSDT", "positionAmt": "-2", "entryPrice": "3000",
                        "unrealizedProfit": "5", "leverage": "5"
                    }
                ]
            })))
            .mount(&server)
            .await;

        let account = exchange(&server).get_account().await.unwrap();
        assert_eq!(account.positions.len(), 1);
        assert_eq!(account.positions[0].side, Side::Short);
        assert_eq!(account.positions[0].quantity, dec!(2));
    }

    #[tokio::test]
    async fn test_invalid_order_id() {
        let server = MockServer::start().await;
        let err = exchange(&server)
            .cancel_order(&Symbol::from_pair("BTCUSDT").unwrap(), "STUB-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Validation(_)));
    }
}
