//! Deposit webhook: the payment verifier reports "credit player N by A games"

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{error, info, warn};

use crate::app::AppState;
use crate::game::PlayerId;
use crate::store::{StoreError, UserRecord, UserStore};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Verified deposit event
#[derive(Debug, Clone, Deserialize)]
pub struct DepositEvent {
    /// Payment transaction id; each is credited at most once
    pub tx_id: String,
    pub player_id: PlayerId,
    /// Games purchased
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepositResponse {
    pub credited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub games_balance: Option<i64>,
}

/// Verify the hex HMAC-SHA256 of the raw body
pub fn verify_signature(body: &[u8], signature_hex: &str, secret: &str) -> Result<(), DepositError> {
    let provided = hex::decode(signature_hex.trim()).map_err(|_| DepositError::InvalidSignature)?;
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| DepositError::InvalidSignature)?;
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| DepositError::InvalidSignature)
}

/// Verify and credit one deposit. Returns the updated record, or None for a
/// transaction the store has already credited.
pub async fn process_deposit(
    users: &dyn UserStore,
    secret: &str,
    signature: Option<&str>,
    body: &[u8],
) -> Result<Option<UserRecord>, DepositError> {
    let signature = signature.ok_or(DepositError::MissingSignature)?;
    verify_signature(body, signature, secret)?;

    let event: DepositEvent = serde_json::from_slice(body).map_err(|e| {
        warn!(error = %e, "Failed to parse deposit event");
        DepositError::InvalidPayload
    })?;
    if event.amount <= 0 || event.tx_id.is_empty() {
        return Err(DepositError::InvalidPayload);
    }

    match users
        .credit_deposit(&event.tx_id, event.player_id, event.amount)
        .await
    {
        Ok(Some(record)) => {
            info!(
                tx_id = %event.tx_id,
                player_id = event.player_id,
                amount = event.amount,
                games_balance = record.games_balance,
                "Deposit credited"
            );
            Ok(Some(record))
        }
        Ok(None) => {
            info!(tx_id = %event.tx_id, player_id = event.player_id, "Duplicate deposit ignored");
            Ok(None)
        }
        Err(e) => {
            error!(tx_id = %event.tx_id, player_id = event.player_id, "Failed to credit deposit: {}", e);
            Err(e.into())
        }
    }
}

/// Handle deposit webhook events
pub async fn deposit_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DepositResponse>, DepositError> {
    let secret = state
        .config
        .deposit_webhook_secret
        .as_deref()
        .ok_or(DepositError::Disabled)?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let credited = process_deposit(state.users.as_ref(), secret, signature, &body).await?;

    let Some(record) = credited else {
        return Ok(Json(DepositResponse {
            credited: false,
            games_balance: None,
        }));
    };

    // Push the new balance to the player if they are online
    state
        .sessions
        .send(record.player_id, state.user_data(&record));

    Ok(Json(DepositResponse {
        credited: true,
        games_balance: Some(record.games_balance),
    }))
}

#[derive(Debug, thiserror::Error)]
pub enum DepositError {
    #[error("Deposit webhook is not configured")]
    Disabled,

    #[error("Missing X-Signature header")]
    MissingSignature,

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Invalid request payload")]
    InvalidPayload,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for DepositError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            DepositError::Disabled => StatusCode::NOT_FOUND,
            DepositError::MissingSignature => StatusCode::UNAUTHORIZED,
            DepositError::InvalidSignature => StatusCode::UNAUTHORIZED,
            DepositError::InvalidPayload => StatusCode::BAD_REQUEST,
            DepositError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            DepositError::Store(_) => StatusCode::BAD_GATEWAY,
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
