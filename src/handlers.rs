//! HTTP endpoints of the service node.
//!
//! The surface is thin: handlers validate the request shape, delegate to the
//! transfer engine or bid reader, and translate typed errors into status
//! codes. Validation, bid, and sender-nonce failures answer 406 with a list
//! of human-readable messages; unknown task IDs answer 404; everything
//! unexpected is a 500.

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::instrument;
use uuid::Uuid;

use crate::amount::Amount;
use crate::bids::{SignedBid, current_bids};
use crate::chain::{Blockchain, ChainClient as _};
use crate::context::Context;
use crate::plugins::Bid;
use crate::transfers::{InitiateTransferRequest, TransferEngine, TransferError};

pub fn routes() -> Router<Arc<Context>> {
    Router::new()
        .route("/transfer", post(post_transfer))
        .route("/transfer/{task_id}/status", get(get_transfer_status))
        .route("/bids", get(get_bids))
        .route("/health/live", get(get_health_live))
        .route("/health/nodes", get(get_health_nodes))
}

fn internal_server_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"message": "internal server error"})),
    )
        .into_response()
}

fn not_acceptable(messages: Vec<String>) -> Response {
    (StatusCode::NOT_ACCEPTABLE, Json(messages)).into_response()
}

fn resource_not_found(message: String) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"message": message}))).into_response()
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"message": message}))).into_response()
}

#[derive(Debug, Deserialize)]
pub struct TransferRequestBody {
    pub source_blockchain_id: i32,
    pub destination_blockchain_id: i32,
    pub sender_address: String,
    pub recipient_address: String,
    pub source_token_address: String,
    pub destination_token_address: String,
    pub amount: Amount,
    pub nonce: Amount,
    pub valid_until: u64,
    pub signature: String,
    pub bid: SignedBid,
}

/// Cheap request-shape checks; the expensive ones run asynchronously in the
/// execute task.
fn validate_transfer_request(
    ctx: &Context,
    body: &TransferRequestBody,
) -> Result<(Blockchain, Blockchain), Vec<String>> {
    let mut messages = Vec::new();

    let source_blockchain = Blockchain::from_id(body.source_blockchain_id);
    let destination_blockchain = Blockchain::from_id(body.destination_blockchain_id);
    if source_blockchain.is_none() {
        messages.push("source_blockchain_id: this is not a supported blockchain".to_string());
    }
    if destination_blockchain.is_none() {
        messages.push("destination_blockchain_id: this is not a supported blockchain".to_string());
    }
    let (Some(source_blockchain), Some(destination_blockchain)) =
        (source_blockchain, destination_blockchain)
    else {
        return Err(messages);
    };

    let source_offering = ctx
        .config
        .blockchain(source_blockchain)
        .map(|c| c.active && c.registered)
        .unwrap_or(false);
    if !source_offering {
        messages.push("source_blockchain_id: this is not an active blockchain".to_string());
        return Err(messages);
    }
    let (Some(source_client), Some(destination_client)) = (
        ctx.client(source_blockchain),
        ctx.client(destination_blockchain),
    ) else {
        messages.push("destination_blockchain_id: this is not an active blockchain".to_string());
        return Err(messages);
    };

    if !source_client.is_valid_address(&body.sender_address) {
        messages.push(format!(
            "sender address must be a valid blockchain address on {source_blockchain}"
        ));
    }
    if !destination_client.is_valid_recipient_address(&body.recipient_address) {
        messages.push(format!(
            "recipient address must be a valid blockchain address, different from the 0 \
             address on {destination_blockchain}"
        ));
    }
    if !source_client.is_valid_address(&body.source_token_address) {
        messages.push(format!(
            "source token address must be a valid blockchain address on {source_blockchain}"
        ));
    }
    if !destination_client.is_valid_address(&body.destination_token_address) {
        messages.push(format!(
            "destination token address must be a valid blockchain address on \
             {destination_blockchain}"
        ));
    }
    if body.amount.is_zero() {
        messages.push("amount must be greater than 0".to_string());
    }

    if messages.is_empty() {
        Ok((source_blockchain, destination_blockchain))
    } else {
        Err(messages)
    }
}

/// `POST /transfer`: accepts a signed transfer request for asynchronous
/// execution and returns the task ID to poll.
#[instrument(skip_all)]
async fn post_transfer(
    State(ctx): State<Arc<Context>>,
    Json(body): Json<TransferRequestBody>,
) -> Response {
    let time_received = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();
    tracing::info!(
        source_blockchain_id = body.source_blockchain_id,
        destination_blockchain_id = body.destination_blockchain_id,
        "new transfer request"
    );
    let (source_blockchain, destination_blockchain) =
        match validate_transfer_request(&ctx, &body) {
            Ok(blockchains) => blockchains,
            Err(messages) => return not_acceptable(messages),
        };

    let request = InitiateTransferRequest {
        source_blockchain,
        destination_blockchain,
        sender_address: body.sender_address,
        recipient_address: body.recipient_address,
        source_token_address: body.source_token_address,
        destination_token_address: body.destination_token_address,
        amount: body.amount,
        nonce: body.nonce,
        valid_until: body.valid_until,
        signature: body.signature,
        time_received,
        bid: Bid {
            source_blockchain,
            destination_blockchain,
            fee: body.bid.fee,
            execution_time: body.bid.execution_time,
            valid_until: body.bid.valid_until,
        },
        bid_signature: body.bid.signature,
    };
    match TransferEngine::new(Arc::clone(&ctx)).initiate_transfer(request).await {
        Ok(task_id) => (StatusCode::OK, Json(json!({"task_id": task_id}))).into_response(),
        Err(TransferError::SenderNonceNotUnique(sender_nonce)) => {
            tracing::warn!(%sender_nonce, "new transfer request: sender nonce is not unique");
            not_acceptable(vec![format!("sender nonce {sender_nonce} is not unique")])
        }
        Err(TransferError::BidNotAccepted(rejection)) => {
            tracing::warn!(error = %rejection, "bid has been rejected by service node");
            not_acceptable(vec![format!(
                "bid has been rejected by service node: {rejection}"
            )])
        }
        Err(e) => {
            tracing::error!(error = %e, "unable to process a transfer request");
            internal_server_error()
        }
    }
}

/// `GET /transfer/{task_id}/status`: the public view of a transfer.
#[instrument(skip_all, fields(task_id))]
async fn get_transfer_status(
    State(ctx): State<Arc<Context>>,
    Path(task_id): Path<String>,
) -> Response {
    let Ok(task_uuid) = Uuid::parse_str(&task_id) else {
        tracing::warn!(task_id, "transfer status request with a non-UUID task ID");
        return resource_not_found(format!("task ID {task_id} is not a UUID"));
    };
    match TransferEngine::new(Arc::clone(&ctx)).find_transfer(task_uuid).await {
        Ok(found) => {
            let transfer_id = found
                .on_chain_transfer_id
                .map(|id| serde_json::to_value(id).unwrap_or_default())
                .unwrap_or_else(|| json!(""));
            (
                StatusCode::OK,
                Json(json!({
                    "task_id": task_uuid,
                    "source_blockchain_id": found.source_blockchain.id(),
                    "destination_blockchain_id": found.destination_blockchain.id(),
                    "sender_address": found.sender_address,
                    "recipient_address": found.recipient_address,
                    "source_token_address": found.source_token_address,
                    "destination_token_address": found.destination_token_address,
                    "amount": found.amount,
                    "fee": found.fee,
                    "status": found.status.public_name(),
                    "transfer_id": transfer_id,
                    "transaction_id": found.transaction_id.unwrap_or_default(),
                })),
            )
                .into_response()
        }
        Err(TransferError::ResourceNotFound(_)) => {
            tracing::warn!(task_id, "transfer status request with an unknown task ID");
            resource_not_found(format!("task ID {task_id} is unknown"))
        }
        Err(e) => {
            tracing::error!(error = %e, "unable to process a transfer status request");
            internal_server_error()
        }
    }
}

fn parse_blockchain_param(
    params: &HashMap<String, String>,
    name: &str,
) -> Result<Blockchain, String> {
    let raw = params
        .get(name)
        .ok_or_else(|| format!("missing query parameter '{name}'"))?;
    raw.parse::<i32>()
        .ok()
        .and_then(Blockchain::from_id)
        .ok_or_else(|| format!("'{name}' is not a supported blockchain ID"))
}

/// `GET /bids`: the currently offered bids for a chain pair, each signed
/// over the canonical bid message.
#[instrument(skip_all)]
async fn get_bids(
    State(ctx): State<Arc<Context>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let source_blockchain = match parse_blockchain_param(&params, "source_blockchain") {
        Ok(blockchain) => blockchain,
        Err(message) => return bad_request(message),
    };
    let destination_blockchain = match parse_blockchain_param(&params, "destination_blockchain") {
        Ok(blockchain) => blockchain,
        Err(message) => return bad_request(message),
    };
    match current_bids(&ctx, source_blockchain, destination_blockchain).await {
        Ok(bids) => (StatusCode::OK, Json(bids)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "unable to process a bids request");
            internal_server_error()
        }
    }
}

/// `GET /health/live`: liveness.
#[instrument(skip_all)]
async fn get_health_live() -> impl IntoResponse {
    StatusCode::OK
}

/// `GET /health/nodes`: reachability of every configured chain's RPC node.
#[instrument(skip_all)]
async fn get_health_nodes(State(ctx): State<Arc<Context>>) -> Response {
    let mut health = Vec::new();
    for blockchain in ctx.chains.blockchains() {
        let Some(client) = ctx.client(blockchain) else {
            continue;
        };
        health.push(json!({
            "blockchain": blockchain.name(),
            "healthy": client.is_node_healthy().await,
        }));
    }
    (StatusCode::OK, Json(health)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainClient;
    use crate::chain::mock::MockChainClient;
    use crate::context::testing::{StaticBidPlugin, context, test_fee};
    use crate::signer::build_bid_message;
    use crate::store::memory::InMemoryStore;
    use crate::store::{BidStore, StoredBid, TransferStatus, TransferStore};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<InMemoryStore>, Arc<Context>) {
        let store = Arc::new(InMemoryStore::new());
        let mut clients: HashMap<Blockchain, Arc<dyn ChainClient>> = HashMap::new();
        clients.insert(
            Blockchain::Ethereum,
            Arc::new(MockChainClient::new(Blockchain::Ethereum)),
        );
        clients.insert(
            Blockchain::BnbChain,
            Arc::new(MockChainClient::new(Blockchain::BnbChain)),
        );
        let ctx = context(
            Arc::clone(&store),
            clients,
            Arc::new(StaticBidPlugin::accepting()),
        );
        (routes().with_state(Arc::clone(&ctx)), store, ctx)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn unix_now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }

    fn transfer_body(ctx: &Context, nonce: u64, amount: u64) -> serde_json::Value {
        let valid_until = unix_now() + 200_000;
        let message = build_bid_message(
            test_fee(),
            valid_until,
            Blockchain::Ethereum,
            Blockchain::BnbChain,
            100_000,
        );
        let signature = ctx.signer.sign_message(&message);
        json!({
            "source_blockchain_id": 0,
            "destination_blockchain_id": 1,
            "sender_address": "0x1111111111111111111111111111111111111111",
            "recipient_address": "0x2222222222222222222222222222222222222222",
            "source_token_address": "0x3333333333333333333333333333333333333333",
            "destination_token_address": "0x4444444444444444444444444444444444444444",
            "amount": amount,
            "nonce": nonce,
            "valid_until": valid_until,
            "signature": "0xaa",
            "bid": {
                "fee": test_fee(),
                "execution_time": 100_000,
                "valid_until": valid_until,
                "signature": signature,
            }
        })
    }

    async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn get(app: &Router, uri: &str) -> Response {
        app.clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn transfer_intake_returns_a_task_id() {
        let (app, _store, ctx) = app();
        let response = post_json(&app, "/transfer", transfer_body(&ctx, 22_222, 5)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(Uuid::parse_str(body["task_id"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn zero_amount_is_not_acceptable() {
        let (app, _store, ctx) = app();
        let response = post_json(&app, "/transfer", transfer_body(&ctx, 22_222, 0)).await;
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
        let body = body_json(response).await;
        assert_eq!(body[0], "amount must be greater than 0");
    }

    #[tokio::test]
    async fn replayed_sender_nonce_is_not_acceptable_with_the_textual_message() {
        let (app, _store, ctx) = app();
        let response = post_json(&app, "/transfer", transfer_body(&ctx, 22_222, 5)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = post_json(&app, "/transfer", transfer_body(&ctx, 22_222, 5)).await;
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
        let body = body_json(response).await;
        assert_eq!(body[0], "sender nonce 22222 is not unique");
    }

    #[tokio::test]
    async fn zero_recipient_address_is_rejected() {
        let (app, _store, ctx) = app();
        let mut body = transfer_body(&ctx, 22_222, 5);
        body["recipient_address"] = json!("0x0000000000000000000000000000000000000000");
        let response = post_json(&app, "/transfer", body).await;
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn inactive_source_chain_is_rejected() {
        let (app, _store, ctx) = app();
        let mut body = transfer_body(&ctx, 22_222, 5);
        body["source_blockchain_id"] = json!(Blockchain::Solana.id());
        let response = post_json(&app, "/transfer", body).await;
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
        let json_body = body_json(response).await;
        assert_eq!(
            json_body[0],
            "source_blockchain_id: this is not an active blockchain"
        );
    }

    #[tokio::test]
    async fn status_of_a_fresh_transfer_has_empty_identifiers() {
        let (app, _store, ctx) = app();
        let response = post_json(&app, "/transfer", transfer_body(&ctx, 22_222, 5)).await;
        let task_id = body_json(response).await["task_id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = get(&app, &format!("/transfer/{task_id}/status")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "accepted");
        assert_eq!(body["transfer_id"], "");
        assert_eq!(body["transaction_id"], "");
        assert_eq!(body["amount"], 5);
        assert_eq!(body["fee"], 500_000);
    }

    #[tokio::test]
    async fn status_projects_the_internal_nonce_tag_to_accepted() {
        let (app, store, ctx) = app();
        let response = post_json(&app, "/transfer", transfer_body(&ctx, 22_222, 5)).await;
        let task_id = body_json(response).await["task_id"]
            .as_str()
            .unwrap()
            .to_string();
        let internal_id = store
            .read_transfer_by_task_id(Uuid::parse_str(&task_id).unwrap())
            .await
            .unwrap()
            .unwrap()
            .id;
        store
            .assign_transfer_nonce(internal_id, Blockchain::Ethereum, 0)
            .await
            .unwrap();
        assert_eq!(
            store.transfer(internal_id).unwrap().status,
            TransferStatus::AcceptedNewNonceAssigned
        );

        let response = get(&app, &format!("/transfer/{task_id}/status")).await;
        let body = body_json(response).await;
        assert_eq!(body["status"], "accepted");
    }

    #[tokio::test]
    async fn status_of_an_unknown_task_id_is_not_found() {
        let (app, _store, _ctx) = app();
        let response = get(&app, &format!("/transfer/{}/status", Uuid::new_v4())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = get(&app, "/transfer/not-a-uuid/status").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["message"], "task ID not-a-uuid is not a UUID");
    }

    #[tokio::test]
    async fn bids_endpoint_returns_signed_bids_for_the_pair() {
        let (app, store, ctx) = app();
        store
            .replace_bids(
                Blockchain::BnbChain,
                Blockchain::Celo,
                vec![StoredBid {
                    execution_time: 100_000,
                    valid_until: unix_now() + 200_000,
                    fee: test_fee(),
                }],
            )
            .await
            .unwrap();

        let response = get(&app, "/bids?source_blockchain=1&destination_blockchain=3").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let bids = body.as_array().unwrap();
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0]["fee"], 500_000);
        let message = build_bid_message(
            test_fee(),
            bids[0]["valid_until"].as_u64().unwrap(),
            Blockchain::BnbChain,
            Blockchain::Celo,
            100_000,
        );
        assert!(ctx
            .signer
            .verify_message(&message, bids[0]["signature"].as_str().unwrap()));
    }

    #[tokio::test]
    async fn bids_endpoint_requires_both_parameters() {
        let (app, _store, _ctx) = app();
        let response = get(&app, "/bids?source_blockchain=1").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["message"], "missing query parameter 'destination_blockchain'");
    }

    #[tokio::test]
    async fn liveness_answers_ok() {
        let (app, _store, _ctx) = app();
        let response = get(&app, "/health/live").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn node_health_lists_every_configured_chain() {
        let (app, _store, _ctx) = app();
        let response = get(&app, "/health/nodes").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let nodes = body.as_array().unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0]["blockchain"], "ETHEREUM");
        assert_eq!(nodes[0]["healthy"], true);
    }
}
