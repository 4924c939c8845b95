// ===============================
// src/remote.rs
// ===============================
use std::sync::Arc;

use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use rand::Rng;
use reqwest::Method;
use serde::de::DeserializeOwned;
use tokio::{
    sync::{Mutex, RwLock, Semaphore},
    task::JoinHandle,
    time::{sleep, Duration, Instant},
};
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};
use url::Url;

use crate::broker::{Broker, BrokerError, Credentials};
use crate::domain::{
    BestPrice, Order, OrderBookEntry, OrderBookType, PortfolioItem, PortfolioSummary,
};
use crate::metrics::BROKER_ERRORS;
use crate::wire::{
    encode_query, from_ticks, sign_query, timestamp_ms, WireBestPrice, WireBookEntry, WireOrder,
    WirePortfolioItem, WireSession, WireSummary, WireTime, WsBookTicker,
};

#[derive(Debug, Clone)]
pub struct RemoteCfg {
    pub rest_base: String,
    pub ws_base: String,
    pub api_key: String,
    pub api_secret: String,
    pub recv_window_ms: u64,
    /// batas request in-flight bersamaan dari semua task ticker
    pub max_inflight: usize,
}

/// Quote lebih tua dari ini dianggap basi; best_price jatuh ke REST.
const BOOK_MAX_AGE: Duration = Duration::from_secs(3);

/// symbol -> (best price, waktu terima)
type BookCache = Arc<RwLock<HashMap<String, (BestPrice, Instant)>>>;

/// Client for a remote simulator: signed REST calls plus a best-price stream.
pub struct RemoteBroker {
    http: reqwest::Client,
    cfg: RemoteCfg,
    token: RwLock<Option<String>>,
    books: BookCache,
    inflight: Semaphore,
    stream: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteBroker {
    pub fn new(cfg: RemoteCfg) -> Self {
        let permits = cfg.max_inflight.max(1);
        Self {
            http: reqwest::Client::new(),
            cfg,
            token: RwLock::new(None),
            books: Arc::new(RwLock::new(HashMap::new())),
            inflight: Semaphore::new(permits),
            stream: Mutex::new(None),
        }
    }

    /// Signed query string for `params` (timestamp + recvWindow appended).
    pub fn signed_query(&self, params: &[(&str, String)]) -> String {
        let mut all: Vec<(&str, String)> = params.to_vec();
        all.push(("timestamp", timestamp_ms().to_string()));
        all.push(("recvWindow", self.cfg.recv_window_ms.to_string()));
        let query = encode_query(&all);
        let sig = sign_query(&self.cfg.api_secret, &query);
        format!("{query}&signature={sig}")
    }

    /// Stream quote for `symbol` if it arrived within `BOOK_MAX_AGE`.
    async fn cached_best(&self, symbol: &str) -> Option<BestPrice> {
        let books = self.books.read().await;
        let (bp, at) = books.get(symbol)?;
        (at.elapsed() <= BOOK_MAX_AGE).then_some(*bp)
    }

    /// Session login: credentials travel in the form body, only
    /// timestamp/recvWindow are signed into the URL.
    fn session_request(&self, creds: &Credentials) -> reqwest::RequestBuilder {
        let url = format!("{}/api/v1/session?{}", self.cfg.rest_base, self.signed_query(&[]));
        self.http
            .post(url)
            .header("X-API-KEY", &self.cfg.api_key)
            .form(&[("username", creds.username.as_str()), ("password", creds.password.as_str())])
    }

    async fn call<T: DeserializeOwned>(
        &self,
        op: &'static str,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, BrokerError> {
        let res = self.call_inner(method, path, params).await;
        if res.is_err() {
            BROKER_ERRORS.with_label_values(&[op]).inc();
        }
        let body = res?;
        serde_json::from_str::<T>(&body).map_err(|e| {
            BROKER_ERRORS.with_label_values(&[op]).inc();
            BrokerError::Decode(format!("{op}: {e}"))
        })
    }

    async fn call_unit(
        &self,
        op: &'static str,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<(), BrokerError> {
        self.call_inner(method, path, params).await.map(|_| ()).map_err(|e| {
            BROKER_ERRORS.with_label_values(&[op]).inc();
            e
        })
    }

    async fn call_inner(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<String, BrokerError> {
        let token = self.token.read().await.clone().ok_or(BrokerError::NotConnected)?;
        let _permit = self
            .inflight
            .acquire()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        let url = format!("{}/api/v1{}?{}", self.cfg.rest_base, path, self.signed_query(params));
        let rsp = self
            .http
            .request(method, url)
            .header("X-API-KEY", &self.cfg.api_key)
            .bearer_auth(token)
            .send()
            .await?;

        let status = rsp.status();
        let body = rsp.text().await?;
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(BrokerError::UnknownSymbol(path.to_string()));
        }
        if !status.is_success() {
            return Err(BrokerError::Http { status: status.as_u16(), body });
        }
        Ok(body)
    }
}

#[async_trait]
impl Broker for RemoteBroker {
    async fn connect(&self, creds: &Credentials) -> Result<(), BrokerError> {
        let rsp = self.session_request(creds).send().await?;
        let status = rsp.status();
        if !status.is_success() {
            let body = rsp.text().await.unwrap_or_default();
            return Err(BrokerError::Http { status: status.as_u16(), body });
        }
        let session = rsp.json::<WireSession>().await?;
        *self.token.write().await = Some(session.token);
        info!(rest = %self.cfg.rest_base, username = %creds.username, "connected to simulator");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        if let Some(h) = self.stream.lock().await.take() {
            h.abort();
        }
        let res = self.call_unit("disconnect", Method::DELETE, "/session", &[]).await;
        *self.token.write().await = None;
        self.books.write().await.clear();
        info!("disconnected from simulator");
        res
    }

    async fn subscribe_all_order_books(&self) -> Result<(), BrokerError> {
        self.call_unit("subscribe", Method::POST, "/subscriptions/order_book", &[]).await?;
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            let ws_url = format!("{}/book", self.cfg.ws_base.trim_end_matches('/'));
            *guard = Some(tokio::spawn(run_book_stream(ws_url, self.books.clone())));
        }
        Ok(())
    }

    async fn last_trade_time(&self) -> Result<DateTime<Utc>, BrokerError> {
        let t: WireTime = self.call("last_trade_time", Method::GET, "/time", &[]).await?;
        Ok(t.last_trade_time)
    }

    async fn best_price(&self, symbol: &str) -> Result<BestPrice, BrokerError> {
        if self.token.read().await.is_none() {
            return Err(BrokerError::NotConnected);
        }
        if let Some(bp) = self.cached_best(symbol).await {
            return Ok(bp);
        }
        let path = format!("/best_price/{symbol}");
        let w: WireBestPrice = self.call("best_price", Method::GET, &path, &[]).await?;
        Ok(w.into())
    }

    async fn order_book(
        &self,
        symbol: &str,
        side: OrderBookType,
        max_level: usize,
    ) -> Result<Vec<OrderBookEntry>, BrokerError> {
        let path = format!("/order_book/{symbol}");
        let params = [("side", side.as_str().to_string()), ("max_level", max_level.to_string())];
        let levels: Vec<WireBookEntry> = self.call("order_book", Method::GET, &path, &params).await?;
        Ok(levels.into_iter().map(Into::into).collect())
    }

    async fn portfolio_item(&self, symbol: &str) -> Result<PortfolioItem, BrokerError> {
        let path = format!("/portfolio/items/{symbol}");
        let w: WirePortfolioItem = self.call("portfolio_item", Method::GET, &path, &[]).await?;
        Ok(w.into())
    }

    async fn portfolio_items(&self) -> Result<Vec<PortfolioItem>, BrokerError> {
        let w: Vec<WirePortfolioItem> =
            self.call("portfolio_items", Method::GET, "/portfolio/items", &[]).await?;
        Ok(w.into_iter().map(Into::into).collect())
    }

    async fn portfolio_summary(&self) -> Result<PortfolioSummary, BrokerError> {
        let w: WireSummary = self.call("portfolio_summary", Method::GET, "/portfolio/summary", &[]).await?;
        Ok(w.into())
    }

    async fn waiting_list(&self) -> Result<Vec<Order>, BrokerError> {
        let w: Vec<WireOrder> = self.call("waiting_list", Method::GET, "/orders/waiting", &[]).await?;
        w.into_iter().map(Order::try_from).collect()
    }

    async fn submitted_orders(&self) -> Result<Vec<Order>, BrokerError> {
        let w: Vec<WireOrder> = self.call("submitted_orders", Method::GET, "/orders/submitted", &[]).await?;
        w.into_iter().map(Order::try_from).collect()
    }

    async fn executed_orders(&self, order_id: &str) -> Result<Vec<Order>, BrokerError> {
        let path = format!("/orders/{}/executions", urlencoding::encode(order_id));
        let w: Vec<WireOrder> = self.call("executed_orders", Method::GET, &path, &[]).await?;
        w.into_iter().map(Order::try_from).collect()
    }

    async fn submit_order(&self, order: &Order) -> Result<(), BrokerError> {
        let w = WireOrder::from(order);
        let mut params = vec![
            ("id", w.id),
            ("symbol", w.symbol),
            ("type", w.order_type),
            ("size", w.size.to_string()),
        ];
        if let Some(px) = order.price {
            params.push(("price", format!("{:.2}", from_ticks(px))));
        }
        self.call_unit("submit_order", Method::POST, "/orders", &params).await
    }

    async fn submit_cancellation(&self, order: &Order) -> Result<(), BrokerError> {
        let path = format!("/orders/{}/cancel", urlencoding::encode(&order.id));
        let params = [("symbol", order.symbol.clone())];
        self.call_unit("submit_cancellation", Method::POST, &path, &params).await
    }
}

/// Keep the best-price cache fed from the stream; reconnects with back-off.
async fn run_book_stream(ws_url: String, books: BookCache) {
    let mut attempt: u32 = 0;
    loop {
        let url = match Url::parse(&ws_url) {
            Ok(u) => u,
            Err(e) => {
                error!(?e, %ws_url, "bad ws url");
                return;
            }
        };

        info!(%ws_url, "connecting best-price stream");
        match connect_async(url).await {
            Ok((mut ws, _resp)) => {
                attempt = 0;
                while let Some(frame) = ws.next().await {
                    match frame {
                        Ok(m) if m.is_text() => {
                            let txt = match m.into_text() {
                                Ok(t) => t,
                                Err(e) => {
                                    warn!(?e, "failed to read text frame");
                                    continue;
                                }
                            };
                            if let Ok(t) = serde_json::from_str::<WsBookTicker>(&txt) {
                                if let Some(bp) = t.best_price() {
                                    books.write().await.insert(t.symbol, (bp, Instant::now()));
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(?e, "ws read error");
                            break;
                        }
                    }
                }
                warn!("best-price stream disconnected, will reconnect");
                // quote lama tidak boleh dipakai selama reconnect
                books.write().await.clear();
            }
            Err(e) => error!(?e, "connect best-price stream failed"),
        }

        // Exponential backoff + jitter
        attempt = attempt.saturating_add(1);
        let factor = 1u64 << attempt.min(6);
        let jitter = rand::thread_rng().gen_range(0..=250);
        sleep(Duration::from_millis(500u64.saturating_mul(factor) + jitter)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RemoteCfg {
        RemoteCfg {
            rest_base: "http://127.0.0.1:9".to_string(),
            ws_base: "ws://127.0.0.1:9/ws".to_string(),
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            recv_window_ms: 5000,
            max_inflight: 4,
        }
    }

    #[test]
    fn signed_query_carries_signature_over_params() {
        let rb = RemoteBroker::new(cfg());
        let q = rb.signed_query(&[("symbol", "BA".to_string())]);
        let (body, sig) = q.split_once("&signature=").unwrap();
        assert!(body.starts_with("symbol=BA&timestamp="));
        assert!(body.contains("&recvWindow=5000"));
        assert_eq!(sig, sign_query("secret", body));
    }

    #[tokio::test]
    async fn calls_before_connect_fail_fast() {
        let rb = RemoteBroker::new(cfg());
        assert!(matches!(rb.waiting_list().await, Err(BrokerError::NotConnected)));
    }

    async fn with_session(rb: &RemoteBroker) {
        *rb.token.write().await = Some("tok".to_string());
    }

    async fn feed(rb: &RemoteBroker, symbol: &str, bp: BestPrice) {
        rb.books.write().await.insert(symbol.to_string(), (bp, Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn best_price_prefers_fresh_stream_quote() {
        let rb = RemoteBroker::new(cfg());
        with_session(&rb).await;
        feed(&rb, "BA", BestPrice { bid: 100, ask: 102 }).await;
        assert_eq!(rb.best_price("BA").await.unwrap(), BestPrice { bid: 100, ask: 102 });
    }

    #[tokio::test(start_paused = true)]
    async fn stale_stream_quote_is_not_served() {
        let rb = RemoteBroker::new(cfg());
        with_session(&rb).await;
        feed(&rb, "BA", BestPrice { bid: 100, ask: 102 }).await;
        assert!(rb.cached_best("BA").await.is_some());

        tokio::time::advance(BOOK_MAX_AGE + Duration::from_millis(1)).await;
        assert!(rb.cached_best("BA").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cached_quote_needs_a_live_session() {
        let rb = RemoteBroker::new(cfg());
        feed(&rb, "BA", BestPrice { bid: 100, ask: 102 }).await;
        assert!(matches!(rb.best_price("BA").await, Err(BrokerError::NotConnected)));
    }

    #[tokio::test]
    async fn disconnect_drops_session_and_quotes() {
        let rb = RemoteBroker::new(cfg());
        with_session(&rb).await;
        feed(&rb, "BA", BestPrice { bid: 100, ask: 102 }).await;

        // DELETE /session gagal (tidak ada server), sesi lokal tetap ditutup
        let _ = rb.disconnect().await;
        assert!(rb.books.read().await.is_empty());
        assert!(matches!(rb.best_price("BA").await, Err(BrokerError::NotConnected)));
        assert!(matches!(rb.waiting_list().await, Err(BrokerError::NotConnected)));
    }

    #[test]
    fn login_keeps_credentials_out_of_the_url() {
        let rb = RemoteBroker::new(cfg());
        let creds = Credentials { username: "exp".to_string(), password: "s3cret".to_string() };
        let req = rb.session_request(&creds).build().unwrap();

        let query = req.url().query().unwrap_or_default();
        assert!(!query.contains("s3cret"));
        assert!(!query.contains("username"));
        assert!(query.contains("&signature="));

        let body = req.body().and_then(|b| b.as_bytes()).unwrap();
        let body = std::str::from_utf8(body).unwrap();
        assert_eq!(body, "username=exp&password=s3cret");
    }
}
