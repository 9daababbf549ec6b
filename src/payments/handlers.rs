use axum::{body::Bytes, extract::State, http::HeaderMap, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    coins::ledger::{self, CreditOutcome, LedgerError},
    payments::signature,
    state::AppState,
};

pub const SIGNATURE_HEADER: &str = "Ink-Signature";

/// Event envelope as delivered by the payment processor. Metadata values are
/// strings, processor-style, and are parsed into typed fields by
/// [`parse_event`].
#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: EventObject,
}

#[derive(Debug, Deserialize)]
pub struct EventObject {
    #[serde(default)]
    pub metadata: Option<CreditMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct CreditMetadata {
    pub user_id: String,
    pub coins: String,
    pub package_id: String,
}

/// A fully-validated credit instruction extracted from an envelope.
#[derive(Debug, PartialEq, Eq)]
pub struct CreditEvent {
    pub event_id: String,
    pub user_id: Uuid,
    pub coins: i64,
    pub package_id: Uuid,
}

/// Pull the typed credit fields out of a `payment_intent.succeeded`
/// envelope. Returns a human-readable reason when the metadata is missing or
/// malformed; the caller rejects without crediting.
pub fn parse_event(envelope: WebhookEnvelope) -> Result<CreditEvent, &'static str> {
    let metadata = envelope.data.object.metadata.ok_or("metadata missing")?;
    let user_id = metadata
        .user_id
        .parse::<Uuid>()
        .map_err(|_| "metadata.user_id is not a uuid")?;
    let coins = metadata
        .coins
        .parse::<i64>()
        .map_err(|_| "metadata.coins is not an integer")?;
    if coins <= 0 {
        return Err("metadata.coins must be positive");
    }
    let package_id = metadata
        .package_id
        .parse::<Uuid>()
        .map_err(|_| "metadata.package_id is not a uuid")?;
    Ok(CreditEvent {
        event_id: envelope.id,
        user_id,
        coins,
        package_id,
    })
}

/// Inbound payment notification. The body must be read raw: the signature
/// covers the exact bytes on the wire.
#[instrument(skip(state, headers, body))]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            warn!("webhook without signature header");
            (StatusCode::BAD_REQUEST, "Missing signature".to_string())
        })?;

    let now = OffsetDateTime::now_utc().unix_timestamp();
    signature::verify(
        &state.config.webhook_secret,
        header,
        &body,
        now,
        state.config.webhook_tolerance_secs,
    )
    .map_err(|e| {
        warn!(error = %e, "webhook signature rejected");
        (StatusCode::BAD_REQUEST, "Invalid signature".to_string())
    })?;

    let envelope: WebhookEnvelope = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "webhook body is not a valid envelope");
        (StatusCode::BAD_REQUEST, "Invalid payload".to_string())
    })?;

    if envelope.event_type != "payment_intent.succeeded" {
        info!(event_type = %envelope.event_type, event_id = %envelope.id, "ignoring event");
        return Ok(Json(json!({ "received": true, "ignored": true })));
    }

    let event = parse_event(envelope).map_err(|reason| {
        warn!(reason, "webhook metadata rejected");
        (StatusCode::BAD_REQUEST, reason.to_string())
    })?;

    match ledger::credit_purchase(
        &state.db,
        &event.event_id,
        event.user_id,
        event.coins,
        event.package_id,
    )
    .await
    {
        Ok(CreditOutcome::Credited) => Ok(Json(json!({ "received": true }))),
        Ok(CreditOutcome::AlreadyProcessed) => {
            info!(event_id = %event.event_id, "event already processed");
            Ok(Json(json!({ "received": true, "idempotent": true })))
        }
        Err(LedgerError::NotFound(what)) => {
            warn!(event_id = %event.event_id, what, "webhook references unknown entity");
            Err((StatusCode::BAD_REQUEST, format!("{what} not found")))
        }
        Err(LedgerError::InvalidAmount) => Err((
            StatusCode::BAD_REQUEST,
            "Amount must be positive".to_string(),
        )),
        Err(e) => {
            // Non-200 lets the processor's own retry redeliver the event.
            error!(error = %e, event_id = %event.event_id, user_id = %event.user_id,
                   coins = event.coins, "credit failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(metadata: serde_json::Value) -> WebhookEnvelope {
        serde_json::from_value(json!({
            "id": "evt_123",
            "type": "payment_intent.succeeded",
            "data": { "object": { "metadata": metadata } }
        }))
        .expect("envelope should deserialize")
    }

    #[test]
    fn parse_event_accepts_processor_style_metadata() {
        let user = Uuid::new_v4();
        let package = Uuid::new_v4();
        let event = parse_event(envelope(json!({
            "user_id": user.to_string(),
            "coins": "100",
            "package_id": package.to_string(),
        })))
        .expect("valid metadata");

        assert_eq!(event.event_id, "evt_123");
        assert_eq!(event.user_id, user);
        assert_eq!(event.coins, 100);
        assert_eq!(event.package_id, package);
    }

    #[test]
    fn parse_event_rejects_missing_metadata() {
        let envelope: WebhookEnvelope = serde_json::from_value(json!({
            "id": "evt_123",
            "type": "payment_intent.succeeded",
            "data": { "object": {} }
        }))
        .unwrap();
        assert_eq!(parse_event(envelope), Err("metadata missing"));
    }

    #[test]
    fn parse_event_rejects_bad_coin_amounts() {
        for coins in ["-5", "0", "ten"] {
            let err = parse_event(envelope(json!({
                "user_id": Uuid::new_v4().to_string(),
                "coins": coins,
                "package_id": Uuid::new_v4().to_string(),
            })))
            .unwrap_err();
            assert!(err.contains("coins"), "coins={coins}: {err}");
        }
    }

    #[test]
    fn parse_event_rejects_non_uuid_user() {
        let err = parse_event(envelope(json!({
            "user_id": "42",
            "coins": "10",
            "package_id": Uuid::new_v4().to_string(),
        })))
        .unwrap_err();
        assert_eq!(err, "metadata.user_id is not a uuid");
    }
}
