use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::{
    Address, Block, Blockchain, CancelToken, ChainSnapshot, HttpPeerSource, Transaction,
};

/// Data structure for the shared engine handle
pub type BlockchainData = web::Data<Blockchain>;

/// This node's identity: the default miner address when a mining request
/// does not name one.
#[derive(Debug, Clone)]
pub struct NodeIdentity(pub String);

/// Request for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The sender's address
    pub sender: String,

    /// The recipient's address
    pub recipient: String,

    /// The amount to transfer
    pub amount: f64,

    /// Optional fee; always overwritten by the engine at admission
    pub fee: Option<f64>,
}

/// Response for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    /// The message
    pub message: String,

    /// The index of the block that will include this transaction
    pub block_index: u64,
}

/// Request for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineRequest {
    /// The miner's address; defaults to this node's identity
    pub miner_address: Option<String>,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    /// The message
    pub message: String,

    /// The newly mined block
    pub block: Block,
}

/// Request for the peer registration endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct RegisterPeersRequest {
    /// Peer network locations, as URLs or bare `host:port` authorities
    pub peers: Vec<String>,
}

/// Response for the peer registration endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct RegisterPeersResponse {
    /// The message
    pub message: String,

    /// All known peers, in registration order
    pub total_peers: Vec<String>,
}

/// Response for the resolve endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ResolveResponse {
    /// The message
    pub message: String,

    /// Whether the local chain was replaced by a peer's
    pub replaced: bool,

    /// The length of the chain after resolution
    pub length: usize,

    /// The chain after resolution
    pub chain: Vec<Block>,
}

/// Get the full blockchain
///
/// Returns the chain and its length, in the shape peers consume during
/// fork choice
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Chain retrieved successfully", body = ChainSnapshot)
    )
)]
pub async fn get_chain(blockchain: BlockchainData) -> impl Responder {
    HttpResponse::Ok().json(blockchain.snapshot())
}

/// Get all pending transactions
///
/// Returns all transactions waiting to be included in a block
#[utoipa::path(
    get,
    path = "/api/v1/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(blockchain: BlockchainData) -> impl Responder {
    HttpResponse::Ok().json(blockchain.pending_transactions())
}

/// Create a new transaction
///
/// Adds a new transaction to the pending pool. Any supplied fee is
/// overwritten with the engine's current rate.
#[utoipa::path(
    post,
    path = "/api/v1/transactions/new",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction admitted", body = TransactionResponse),
        (status = 400, description = "Missing or malformed transaction fields")
    )
)]
pub async fn new_transaction(
    blockchain: BlockchainData,
    transaction_req: web::Json<TransactionRequest>,
) -> impl Responder {
    let transaction_req = transaction_req.into_inner();

    let transaction = Transaction::new(
        Address(transaction_req.sender),
        Address(transaction_req.recipient),
        transaction_req.amount,
        transaction_req.fee.unwrap_or(0.0),
    );

    let block_index = blockchain.submit_transaction(transaction);

    HttpResponse::Created().json(TransactionResponse {
        message: format!("Transaction will be added to block {}", block_index),
        block_index,
    })
}

/// Mine a new block
///
/// Runs proof-of-work over the pending pool and appends the mined block to
/// the chain
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    request_body = MineRequest,
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn mine_block(
    blockchain: BlockchainData,
    identity: web::Data<NodeIdentity>,
    mine_req: Option<web::Json<MineRequest>>,
) -> impl Responder {
    let miner = mine_req
        .and_then(|req| req.into_inner().miner_address)
        .unwrap_or_else(|| identity.0.clone());
    let miner = Address(miner);

    // Proof-of-work is CPU-bound; keep it off the request-handling workers.
    let engine = blockchain.get_ref().clone();
    let mined = web::block(move || {
        engine.mine_pending_transactions(&miner, &CancelToken::new())
    })
    .await;

    match mined {
        Ok(Ok(block)) => HttpResponse::Ok().json(MineResponse {
            message: "New block forged".to_string(),
            block,
        }),
        Ok(Err(err)) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("Failed to mine block: {}", err)
        })),
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("Failed to mine block: {}", err)
        })),
    }
}

/// Check if the blockchain is valid
///
/// Validates the entire local chain
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Chain validation status", body = bool)
    )
)]
pub async fn validate_chain(blockchain: BlockchainData) -> impl Responder {
    HttpResponse::Ok().json(blockchain.is_valid())
}

/// Register peer nodes
///
/// Adds one or more peer network locations to the known-peer list used by
/// fork choice
#[utoipa::path(
    post,
    path = "/api/v1/nodes/register",
    request_body = RegisterPeersRequest,
    responses(
        (status = 201, description = "Peers registered", body = RegisterPeersResponse),
        (status = 400, description = "Invalid peer address")
    )
)]
pub async fn register_peers(
    blockchain: BlockchainData,
    register_req: web::Json<RegisterPeersRequest>,
) -> impl Responder {
    for peer in &register_req.peers {
        if let Err(err) = blockchain.register_peer(peer) {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": format!("Failed to register peer {}: {}", peer, err)
            }));
        }
    }

    HttpResponse::Created().json(RegisterPeersResponse {
        message: "New peers have been added".to_string(),
        total_peers: blockchain.peers(),
    })
}

/// Run fork-choice resolution
///
/// Polls every known peer and adopts the longest valid chain that is
/// strictly longer than the local one
#[utoipa::path(
    post,
    path = "/api/v1/nodes/resolve",
    responses(
        (status = 200, description = "Resolution finished", body = ResolveResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn resolve_conflicts(blockchain: BlockchainData) -> impl Responder {
    // Peer fetches block on the network; keep them off the async workers.
    let engine = blockchain.get_ref().clone();
    let outcome = web::block(move || {
        let replaced = engine.resolve(&HttpPeerSource::new());
        (replaced, engine.snapshot())
    })
    .await;

    match outcome {
        Ok((replaced, snapshot)) => {
            let message = if replaced {
                "Local chain was replaced"
            } else {
                "Local chain is authoritative"
            };

            HttpResponse::Ok().json(ResolveResponse {
                message: message.to_string(),
                replaced,
                length: snapshot.length,
                chain: snapshot.chain,
            })
        }
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("Failed to resolve: {}", err)
        })),
    }
}
