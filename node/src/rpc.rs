//! # Bus Channel Registration
//!
//! Registers the `app` channel: the events the core publishes and the
//! actions external RPC clients can invoke. The HTTP/WS/IPC servers
//! that would front the bus are external; everything they need crosses
//! this boundary as JSON-RPC envelopes.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use meridian_protocol::bus::{ActionHandler, Bus, BusError};
use meridian_protocol::chain::Chain;
use meridian_protocol::codec::{Decode, Encode};
use meridian_protocol::processor::APP_EVENTS;
use meridian_protocol::storage::keys;
use meridian_protocol::transaction::Transaction;
use meridian_protocol::transport::Transport;

fn param_hex(params: &serde_json::Value, field: &str) -> Result<Vec<u8>, BusError> {
    let raw = params
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| BusError::InvalidParams(format!("missing field {field}")))?;
    hex::decode(raw).map_err(|_| BusError::InvalidParams(format!("field {field} is not hex")))
}

/// Register the `app` channel with its events and actions.
pub fn register_app_channel(
    bus: &Bus,
    chain: Arc<Chain>,
    transport: Arc<Transport>,
) -> Result<(), BusError> {
    let get_account: ActionHandler = {
        let chain = Arc::clone(&chain);
        Arc::new(move |params| {
            let address = param_hex(params, "address")?;
            let bytes = chain
                .data_access()
                .kv()
                .get(&keys::account(&address))
                .map_err(|error| BusError::Internal(error.to_string()))?
                .ok_or_else(|| BusError::InvalidParams("account not found".into()))?;
            Ok(json!(hex::encode(bytes)))
        })
    };

    let get_block_by_height: ActionHandler = {
        let chain = Arc::clone(&chain);
        Arc::new(move |params| {
            let height = params
                .get("height")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| BusError::InvalidParams("missing field height".into()))?;
            let height = u32::try_from(height)
                .map_err(|_| BusError::InvalidParams("height out of range".into()))?;
            let block = chain
                .data_access()
                .get_block_by_height(height)
                .map_err(|error| BusError::InvalidParams(error.to_string()))?;
            Ok(json!({
                "id": hex::encode(block.id()),
                "height": block.height(),
                "block": hex::encode(block.encode_to_bytes()),
            }))
        })
    };

    let get_transaction_by_id: ActionHandler = {
        let chain = Arc::clone(&chain);
        Arc::new(move |params| {
            let id = param_hex(params, "id")?;
            let tx = chain
                .data_access()
                .get_transaction(&id)
                .map_err(|error| BusError::InvalidParams(error.to_string()))?;
            Ok(json!(hex::encode(tx.encode_to_bytes())))
        })
    };

    let post_transaction: ActionHandler = {
        let transport = Arc::clone(&transport);
        Arc::new(move |params| {
            let raw = param_hex(params, "transaction")?;
            let transaction = Transaction::decode_from_bytes(&raw)
                .map_err(|error| BusError::InvalidParams(error.to_string()))?;
            let id = transaction.id();
            transport
                .handle_broadcast_transaction(transaction)
                .map_err(|error| BusError::InvalidParams(error.to_string()))?;
            Ok(json!({ "transactionId": hex::encode(id) }))
        })
    };

    let get_validators: ActionHandler = {
        let chain = Arc::clone(&chain);
        Arc::new(move |_params| {
            let mut state = chain.new_state_store();
            let validators = chain
                .active_validators(&mut state)
                .map_err(|error| BusError::Internal(error.to_string()))?;
            Ok(json!(validators
                .validators
                .iter()
                .map(|v| json!({
                    "address": hex::encode(&v.address),
                    "publicKey": hex::encode(&v.public_key),
                }))
                .collect::<Vec<_>>()))
        })
    };

    // The socket layer subscribes to the penalty event; this action is
    // the inbound path for RPC clients requesting a manual penalty.
    let apply_penalty_on_peer: ActionHandler = Arc::new(move |params| {
        let peer_id = params
            .get("peerId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BusError::InvalidParams("missing field peerId".into()))?;
        let penalty = params
            .get("penalty")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| BusError::InvalidParams("missing field penalty".into()))?;
        info!(peer_id, penalty, "manual peer penalty requested");
        Ok(json!(null))
    });

    bus.register_channel(
        "app",
        APP_EVENTS,
        vec![
            ("getAccount", get_account),
            ("getBlockByHeight", get_block_by_height),
            ("getTransactionByID", get_transaction_by_id),
            ("postTransaction", post_transaction),
            ("getValidators", get_validators),
            ("applyPenaltyOnPeer", apply_penalty_on_peer),
        ],
    )
}
