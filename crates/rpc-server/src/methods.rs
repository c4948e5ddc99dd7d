//! RPC Methods - JSON-RPC method handlers

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use dispatch_runtime::{Receipt, RelayProcessor, WorkSender};
use ed25519_dalek::{Signature, VerifyingKey};
use farm_dispatcher::{Event, Farm, NativeBank};
use parking_lot::RwLock;
use relay_bridge::{BridgeError, InboundRelay};
use relay_types::{Address, ChainId, MessageKey, Nonce, Payload, PoolId};
use serde::{Deserialize, Serialize};
use std::{str::FromStr, sync::Arc, time::Duration};

/// RPC context shared across handlers
pub struct RpcContext {
    pub processor: Arc<RwLock<RelayProcessor>>,
    pub inbound: Arc<InboundRelay>,
    pub work_sender: WorkSender,
    pub operator_timeout: Duration,
}

// ============ Response Types ============

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitMessageResponse {
    pub sender: Address,
    pub source_chain: ChainId,
    /// Present when the payload decodes
    pub key: Option<MessageKey>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorCallResponse {
    pub success: bool,
    pub slot: u64,
    pub error: Option<String>,
    pub error_code: Option<u32>,
    pub events: Vec<Event>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStake {
    pub pool: PoolId,
    pub amount: u64,
    pub consumed_nonces: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegateInfo {
    pub user: Address,
    pub delegate: Address,
    pub incentive_received: bool,
    pub stakes: Vec<PoolStake>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeInfo {
    pub delegate: Address,
    pub pool: PoolId,
    /// Delegate's own record
    pub staked: u64,
    /// Farm-side position
    pub farm_staked: u64,
    pub pending_reward: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveInfo {
    pub dispatcher: Address,
    pub reserve: u64,
    pub incentive_amount: u64,
    pub relay_fees_paid: u64,
}

// ============ RPC Handlers ============

/// Handle submitMessage RPC method
pub fn handle_submit_message(
    ctx: &RpcContext,
    envelope: &str,
) -> Result<SubmitMessageResponse, RpcError> {
    let bytes = BASE64
        .decode(envelope)
        .map_err(|_| RpcError::InvalidParams("Invalid base64 encoding".to_string()))?;

    let message = ctx.inbound.submit(&bytes).map_err(|e| match e {
        BridgeError::InvalidEnvelope(e) => RpcError::InvalidParams(e.to_string()),
        other => RpcError::InternalError(other.to_string()),
    })?;

    let key = Payload::decode(&message.payload).ok().map(|p| MessageKey {
        source_chain: message.source_chain,
        sender: message.sender,
        user: p.user,
        pool: p.pool,
        nonce: p.nonce,
    });

    Ok(SubmitMessageResponse {
        sender: message.sender,
        source_chain: message.source_chain,
        key,
    })
}

/// Handle operatorCall RPC method
///
/// `call` is a borsh-encoded `OperatorCall`. The signer's ed25519 public key
/// is the caller address and the signature covers the encoded call, sequence
/// included, so a captured request is rejected once its sequence was used.
pub async fn handle_operator_call(
    ctx: &RpcContext,
    call: &str,
    signer: &str,
    signature: &str,
) -> Result<OperatorCallResponse, RpcError> {
    let data = BASE64
        .decode(call)
        .map_err(|_| RpcError::InvalidParams("Invalid base64 encoding".to_string()))?;
    let caller = parse_address(signer)?;
    verify_signature(&caller, &data, signature)?;

    let reply = ctx
        .work_sender
        .submit_operator(caller, data)
        .map_err(|e| RpcError::InternalError(e.to_string()))?;

    let result = tokio::time::timeout(ctx.operator_timeout, reply)
        .await
        .map_err(|_| RpcError::InternalError("Timed out waiting for block".to_string()))?
        .map_err(|_| RpcError::InternalError("Block producer dropped the call".to_string()))?;

    Ok(OperatorCallResponse {
        success: result.success,
        slot: result.slot,
        error: result.error.as_ref().map(|e| e.to_string()),
        error_code: result.error.as_ref().map(|e| e.code()),
        events: result.events,
    })
}

/// Handle getDelegate RPC method
pub fn handle_get_delegate(ctx: &RpcContext, user: &str) -> Result<Option<DelegateInfo>, RpcError> {
    let user = parse_address(user)?;
    let processor = ctx.processor.read();
    let dispatcher = processor.dispatcher();

    let Some(delegate) = dispatcher.delegate_of(&user) else {
        return Ok(None);
    };
    let snapshot = delegate
        .snapshot()
        .map_err(|e| RpcError::InternalError(e.to_string()))?;

    let mut stakes: Vec<PoolStake> = snapshot
        .state
        .pools()
        .map(|(pool, amount)| PoolStake {
            pool,
            amount,
            consumed_nonces: snapshot.state.consumed_count(pool),
        })
        .collect();
    stakes.sort_by_key(|s| s.pool);

    Ok(Some(DelegateInfo {
        user,
        delegate: snapshot.address,
        incentive_received: dispatcher.incentive_received(&user),
        stakes,
    }))
}

/// Handle getStake RPC method
pub fn handle_get_stake(
    ctx: &RpcContext,
    user: &str,
    pool: PoolId,
) -> Result<Option<StakeInfo>, RpcError> {
    let user = parse_address(user)?;
    let processor = ctx.processor.read();
    let Some(delegate) = processor.dispatcher().delegate_of(&user) else {
        return Ok(None);
    };
    let staked = delegate
        .staked(pool)
        .map_err(|e| RpcError::InternalError(e.to_string()))?;
    let host = processor.host();

    Ok(Some(StakeInfo {
        delegate: delegate.address(),
        pool,
        staked,
        farm_staked: host.staked(&delegate.address(), pool),
        pending_reward: host.pending_reward(&delegate.address(), pool),
    }))
}

/// Handle getReceipt RPC method
pub fn handle_get_receipt(ctx: &RpcContext, key: MessageKey) -> Result<Option<Receipt>, RpcError> {
    Ok(ctx.processor.read().receipts().get(&key))
}

/// Handle getReserve RPC method
pub fn handle_get_reserve(ctx: &RpcContext) -> Result<ReserveInfo, RpcError> {
    let processor = ctx.processor.read();
    let config = processor.dispatcher().config();
    Ok(ReserveInfo {
        dispatcher: config.address,
        reserve: processor.host().native_balance(&config.address),
        incentive_amount: config.incentive_amount,
        relay_fees_paid: processor.host().relay_fees_collected(),
    })
}

/// Handle getCallSequence RPC method: last operator call sequence accepted from `signer`
pub fn handle_get_call_sequence(ctx: &RpcContext, signer: &str) -> Result<u64, RpcError> {
    let signer = parse_address(signer)?;
    Ok(ctx.processor.read().dispatcher().last_sequence(&signer))
}

/// Handle getSlot RPC method
pub fn handle_get_slot(ctx: &RpcContext) -> Result<u64, RpcError> {
    Ok(ctx.processor.read().current_slot())
}

/// Handle getHealth RPC method
pub fn handle_get_health() -> Result<String, RpcError> {
    Ok("ok".to_string())
}

pub fn parse_address(s: &str) -> Result<Address, RpcError> {
    Address::from_str(s).map_err(|_| RpcError::InvalidParams(format!("Invalid address: {s}")))
}

/// Build a receipt key from its parts
pub fn receipt_key(
    chain: u64,
    sender: &str,
    user: &str,
    pool: PoolId,
    nonce: Nonce,
) -> Result<MessageKey, RpcError> {
    Ok(MessageKey {
        source_chain: ChainId(chain),
        sender: parse_address(sender)?,
        user: parse_address(user)?,
        pool,
        nonce,
    })
}

fn verify_signature(caller: &Address, data: &[u8], signature: &str) -> Result<(), RpcError> {
    let key = VerifyingKey::from_bytes(&caller.to_bytes())
        .map_err(|_| RpcError::Unauthorized("Signer is not an ed25519 key".to_string()))?;
    let bytes: [u8; 64] = bs58::decode(signature)
        .into_vec()
        .ok()
        .and_then(|v| v.try_into().ok())
        .ok_or_else(|| RpcError::InvalidParams("Invalid signature encoding".to_string()))?;
    key.verify_strict(data, &Signature::from_bytes(&bytes))
        .map_err(|_| RpcError::Unauthorized("Signature verification failed".to_string()))
}

// ============ Error Types ============

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("Internal error: {0}")]
    InternalError(String),
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}
