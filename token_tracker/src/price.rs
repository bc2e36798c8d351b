/// price.rs — Price supplier boundary
///
/// The engine only consumes `TokenObservation`s.  Where they come from is
/// behind `PriceSupplier`; a token the supplier cannot price this cycle is
/// simply absent from the batch.
///
/// `DexScreenerClient` is the production supplier:
///   GET {base}tokens/{address}  →  pairs[0].priceUsd
/// DexScreener has no bulk endpoint, so tokens are fetched one by one with a
/// minimum spacing between requests.
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::models::{TokenId, TokenObservation};

#[async_trait]
pub trait PriceSupplier: Send + Sync {
    /// One observation per token that could be priced.
    async fn fetch(&self, tokens: &[TokenId]) -> Vec<TokenObservation>;
}

// ── Response types ────────────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct TokensResponse {
    #[serde(default)]
    pairs: Option<Vec<Pair>>,
}

#[derive(Deserialize, Debug)]
struct Pair {
    #[serde(rename = "priceUsd")]
    price_usd:  Option<String>,
    #[serde(rename = "baseToken")]
    base_token: Option<PairToken>,
}

#[derive(Deserialize, Debug)]
struct PairToken {
    #[serde(default)]
    symbol: String,
}

/// Pull a USD price out of a `/tokens/{address}` body.
fn parse_price(body: &str) -> Result<f64> {
    let resp: TokensResponse = serde_json::from_str(body).context("Failed to parse DexScreener response")?;
    let pair = resp
        .pairs
        .and_then(|p| p.into_iter().next())
        .ok_or_else(|| anyhow!("no trading pairs"))?;
    let raw = pair.price_usd.ok_or_else(|| anyhow!("pair has no priceUsd"))?;
    let price: f64 = raw.parse().with_context(|| format!("bad priceUsd '{raw}'"))?;
    if let Some(base) = pair.base_token {
        debug!("{} priced at ${:.8}", base.symbol, price);
    }
    Ok(price)
}

// ── DexScreener client ────────────────────────────────────────────────────

pub struct DexScreenerClient {
    client:    Client,
    base_url:  String,
    spacing:   Duration,
    next_slot: Mutex<Instant>,
}

impl DexScreenerClient {
    pub fn new(base_url: &str, timeout: Duration, spacing: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("HTTP client build failed")?;
        let mut base_url = base_url.to_owned();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Ok(Self {
            client,
            base_url,
            spacing,
            next_slot: Mutex::new(Instant::now()),
        })
    }

    /// Wait until the next request slot is free.
    async fn throttle(&self) {
        let mut slot = self.next_slot.lock().await;
        sleep_until(*slot).await;
        *slot = Instant::now() + self.spacing;
    }

    /// Current USD price for one token.
    pub async fn fetch_price(&self, token: &TokenId) -> Result<f64> {
        self.throttle().await;
        let url = format!("{}tokens/{}", self.base_url, token);

        let resp = self.client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            bail!("rate limited by price API");
        }
        if status != StatusCode::OK {
            bail!("price API returned HTTP {status}");
        }

        let body = resp.text().await.context("Failed to read response body")?;
        parse_price(&body)
    }
}

#[async_trait]
impl PriceSupplier for DexScreenerClient {
    async fn fetch(&self, tokens: &[TokenId]) -> Vec<TokenObservation> {
        let mut out = Vec::with_capacity(tokens.len());
        for token in tokens {
            match self.fetch_price(token).await {
                Ok(price) => out.push(TokenObservation::new(token.clone(), price, Utc::now())),
                Err(e) => warn!("No price for {token} this cycle: {e:#}"),
            }
        }
        info!("Fetched {}/{} token prices", out.len(), tokens.len());
        out
    }
}
