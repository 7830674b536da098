//! Faucet claim endpoint.
//!
//! `POST /api/v1/retrieve` takes a wallet address and, when the address is
//! eligible, sends it the fixed drip and records the claim.
//!
//! Eligibility, checked in order:
//! - address parses as a 20-byte hex address
//! - the wallet has never claimed before
//! - the requester IP has not claimed in the last 24 hours
//! - the address has no on-chain transaction history
//! - the address holds no balance

use std::net::SocketAddr;

use anyhow::Context;
use axum::extract::{ConnectInfo, FromRequest, Request, State};
use axum::http::HeaderMap;
use axum::http::header::CONTENT_TYPE;
use axum::routing::post;
use axum::{Form, Json, Router};
use chrono::{Duration, Utc};
use ethers::types::Address;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::chain::DRIP_AMOUNT_WEI;
use crate::entities::claim;
use crate::entities::prelude::Claim;
use crate::state::AppState;

use super::HttpError;
use super::rate_limit::client_ip;

/// One claim per requester IP within this window.
pub const IP_COOLDOWN_HOURS: i64 = 24;

pub fn router() -> Router<AppState> {
    Router::new().route("/retrieve", post(retrieve))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveRequest {
    /// Recipient wallet address
    pub wallet_address: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveResponse {
    pub tx_hash: String,
    pub status: String,
}

/// Accepts the request body as JSON or form-encoded.
pub struct JsonOrForm<T>(pub T);

impl<S, T> FromRequest<S> for JsonOrForm<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = HttpError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if content_type.starts_with("application/json") {
            let Json(value) = Json::<T>::from_request(req, state)
                .await
                .map_err(|err| HttpError::bad_request(err.to_string()))?;
            return Ok(Self(value));
        }
        if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|err| HttpError::bad_request(err.to_string()))?;
            return Ok(Self(value));
        }
        Err(HttpError::bad_request(
            "Request body must be JSON or form-encoded",
        ))
    }
}

/// Request a drip for a wallet address
async fn retrieve(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    JsonOrForm(request): JsonOrForm<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, HttpError> {
    let wallet = normalize_address(&request.wallet_address)
        .ok_or_else(|| HttpError::bad_request("Invalid wallet address"))?;
    let wallet_key = format!("{wallet:#x}");
    let ip_address = client_ip(&headers, peer).to_string();

    // Held until the handler returns; a concurrent claim for the same
    // wallet cannot pass the checks below in parallel.
    let _ticket = state.inflight.begin(&wallet_key).ok_or_else(|| {
        HttpError::bad_request("A claim for this address is already in progress")
    })?;

    // Wallets claim at most once, ever.
    let prior_wallet_claim = Claim::find()
        .filter(claim::Column::WalletAddress.eq(wallet_key.as_str()))
        .one(state.database.as_ref())
        .await
        .map_err(|err| HttpError::bad_request(err.to_string()))?;
    if prior_wallet_claim.is_some() {
        return Err(HttpError::bad_request("Address has already claimed gas"));
    }

    // IPs cool down between claims, independent of the wallet used.
    let ip_cutoff = Utc::now() - Duration::hours(IP_COOLDOWN_HOURS);
    let recent_ip_claim = Claim::find()
        .filter(claim::Column::IpAddress.eq(ip_address.as_str()))
        .filter(claim::Column::LastVisit.gt(ip_cutoff))
        .one(state.database.as_ref())
        .await
        .map_err(|err| HttpError::bad_request(err.to_string()))?;
    if recent_ip_claim.is_some() {
        return Err(HttpError::bad_request(
            "IP has already claimed gas in the last 24 hours",
        ));
    }

    // Only fresh addresses are eligible: no history, no funds.
    let tx_count = state
        .chain
        .transaction_count(wallet)
        .await
        .map_err(|err| HttpError::bad_request(format!("{err:#}")))?;
    if !tx_count.is_zero() {
        return Err(HttpError::bad_request(
            "Address has existing transaction history",
        ));
    }

    let balance = state
        .chain
        .balance(wallet)
        .await
        .map_err(|err| HttpError::bad_request(format!("{err:#}")))?;
    if !balance.is_zero() {
        return Err(HttpError::bad_request("Address already holds a balance"));
    }

    let tx_hash = state
        .chain
        .send_drip(wallet)
        .await
        .map_err(|err| HttpError::bad_request(format!("{err:#}")))?;

    record_claim(&state, &wallet_key, &ip_address, &tx_hash)
        .await
        .map_err(|err| HttpError::bad_request(format!("{err:#}")))?;

    info!(
        wallet = %wallet_key,
        ip = %ip_address,
        tx_hash = %tx_hash,
        drip_wei = DRIP_AMOUNT_WEI,
        "Drip sent"
    );

    Ok(Json(RetrieveResponse {
        tx_hash,
        status: "success".to_string(),
    }))
}

/// Upserts the claim row keyed by the unique (wallet, IP) index.
async fn record_claim(
    state: &AppState,
    wallet: &str,
    ip: &str,
    tx_hash: &str,
) -> anyhow::Result<()> {
    let now = Utc::now().fixed_offset();
    let model = claim::ActiveModel {
        id: sea_orm::ActiveValue::NotSet,
        wallet_address: sea_orm::ActiveValue::Set(wallet.to_string()),
        ip_address: sea_orm::ActiveValue::Set(ip.to_string()),
        tx_hash: sea_orm::ActiveValue::Set(tx_hash.to_string()),
        last_visit: sea_orm::ActiveValue::Set(now),
    };

    // Single atomic statement, never read-then-write.
    Claim::insert(model)
        .on_conflict(
            OnConflict::columns([claim::Column::WalletAddress, claim::Column::IpAddress])
                .update_columns([claim::Column::TxHash, claim::Column::LastVisit])
                .to_owned(),
        )
        .exec(state.database.as_ref())
        .await
        .context("Failed to record claim")?;
    Ok(())
}

/// Parses a wallet address, returning `None` when malformed.
fn normalize_address(raw: &str) -> Option<Address> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > 64 {
        return None;
    }
    trimmed.parse::<Address>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::StatusCode;
    use sea_orm::{DatabaseBackend, DatabaseConnection, MockDatabase};

    use crate::chain::ChainClient;
    use crate::config::{ChainConfig, Network, RateLimitingConfig};
    use crate::http::rate_limit::RateLimiter;

    const FRESH_WALLET: &str = "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf";

    /// State over a mocked database and a gateway client that never
    /// connected; any chain call fails with "not live".
    fn offline_state(database: DatabaseConnection) -> AppState {
        let chain = ChainClient::new(&ChainConfig {
            network: Network::Testnet,
            gateway_url: None,
            private_key: Some(
                "0x0000000000000000000000000000000000000000000000000000000000000001"
                    .to_string(),
            ),
            reconnect_delay_ms: Some(500),
        })
        .expect("chain client builds");
        let limiter = RateLimiter::new(&RateLimitingConfig {
            max_requests: 100,
            window_seconds: 900,
        });
        AppState::new(database, Arc::new(chain), Arc::new(limiter))
    }

    fn claim_row(wallet: &str, ip: &str) -> claim::Model {
        claim::Model {
            id: 1,
            wallet_address: wallet.to_string(),
            ip_address: ip.to_string(),
            tx_hash: "0xfeed".to_string(),
            last_visit: Utc::now().fixed_offset(),
        }
    }

    async fn call_retrieve(
        state: AppState,
        wallet: &str,
    ) -> Result<Json<RetrieveResponse>, HttpError> {
        let peer: SocketAddr = "10.0.0.9:4000".parse().unwrap();
        retrieve(
            State(state),
            ConnectInfo(peer),
            HeaderMap::new(),
            JsonOrForm(RetrieveRequest {
                wallet_address: wallet.to_string(),
            }),
        )
        .await
    }

    #[tokio::test]
    async fn prior_wallet_claim_rejected() {
        // Wallet lookup finds an old claim; nothing after it may run
        let database = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![claim_row(
                "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf",
                "203.0.113.9",
            )]])
            .into_connection();

        let err = call_retrieve(offline_state(database), FRESH_WALLET)
            .await
            .expect_err("claimed wallet must be rejected");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Address has already claimed gas");
    }

    #[tokio::test]
    async fn ip_cooldown_rejected_for_second_wallet() {
        // Fresh wallet, but the requester IP claimed recently with another one
        let database = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([
                Vec::<claim::Model>::new(),
                vec![claim_row(
                    "0x00000000219ab540356cbb839cbe05303d7705fa",
                    "10.0.0.9",
                )],
            ])
            .into_connection();

        let err = call_retrieve(offline_state(database), FRESH_WALLET)
            .await
            .expect_err("cooling-down IP must be rejected");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "IP has already claimed gas in the last 24 hours");
    }

    #[tokio::test]
    async fn chain_checks_run_only_after_db_checks() {
        // Both record lookups come back empty; the next step is the
        // transaction-count call, which fails on the offline gateway. A
        // rejection earlier in the chain would carry a different message.
        let database = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<claim::Model>::new(), Vec::<claim::Model>::new()])
            .into_connection();

        let err = call_retrieve(offline_state(database), FRESH_WALLET)
            .await
            .expect_err("offline gateway must fail the request");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("not live"), "got: {}", err.message);
    }

    #[tokio::test]
    async fn malformed_address_rejected_before_any_lookup() {
        // Empty mock: any DB or chain access would error with another message
        let database = MockDatabase::new(DatabaseBackend::Postgres).into_connection();

        let err = call_retrieve(offline_state(database), "0x1234")
            .await
            .expect_err("malformed address must be rejected");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Invalid wallet address");
    }

    #[test]
    fn address_normalization() {
        let mixed = "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf";
        let addr = normalize_address(mixed).expect("valid address");
        assert_eq!(
            format!("{addr:#x}"),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );

        // Surrounding whitespace is tolerated
        assert!(normalize_address(" 0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf ").is_some());
    }

    #[test]
    fn malformed_addresses_rejected() {
        assert!(normalize_address("").is_none());
        assert!(normalize_address("0x1234").is_none());
        assert!(normalize_address("not hex at all").is_none());
        assert!(normalize_address("0x7e5f4552091a69125d5dfcb7b8c2659029395bdfff").is_none());
        let oversized = format!("0x{}", "a".repeat(80));
        assert!(normalize_address(&oversized).is_none());
    }

    #[test]
    fn response_uses_camel_case_keys() {
        let response = RetrieveResponse {
            tx_hash: "0xabc".to_string(),
            status: "success".to_string(),
        };
        let value = serde_json::to_value(&response).expect("serializes");
        assert_eq!(value["txHash"], "0xabc");
        assert_eq!(value["status"], "success");
    }

    #[test]
    fn request_deserializes_camel_case() {
        let request: RetrieveRequest =
            serde_json::from_str(r#"{"walletAddress":"0xabc"}"#).expect("deserializes");
        assert_eq!(request.wallet_address, "0xabc");
    }

    #[tokio::test]
    async fn body_extractor_accepts_json_and_form() {
        let json = Request::builder()
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"walletAddress":"0xabc"}"#))
            .unwrap();
        let JsonOrForm(parsed) = JsonOrForm::<RetrieveRequest>::from_request(json, &())
            .await
            .expect("json body parses");
        assert_eq!(parsed.wallet_address, "0xabc");

        let form = Request::builder()
            .method("POST")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("walletAddress=0xabc"))
            .unwrap();
        let JsonOrForm(parsed) = JsonOrForm::<RetrieveRequest>::from_request(form, &())
            .await
            .expect("form body parses");
        assert_eq!(parsed.wallet_address, "0xabc");
    }

    #[tokio::test]
    async fn body_extractor_rejects_other_content_types() {
        let plain = Request::builder()
            .header(CONTENT_TYPE, "text/plain")
            .body(Body::from("walletAddress=0xabc"))
            .unwrap();
        assert!(
            JsonOrForm::<RetrieveRequest>::from_request(plain, &())
                .await
                .is_err()
        );

        let missing = Request::builder().body(Body::empty()).unwrap();
        assert!(
            JsonOrForm::<RetrieveRequest>::from_request(missing, &())
                .await
                .is_err()
        );
    }
}
