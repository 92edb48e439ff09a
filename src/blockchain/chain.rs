use log::{info, warn};
use thiserror::Error;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::block::{Block, BlockTemplate};
use super::crypto::{meets_difficulty, Address};
use super::node::{peer_authority, ChainSnapshot, PeerError, PeerSource};
use super::transaction::Transaction;

/// Amount credited to a miner by the reward transaction.
const REWARD_AMOUNT: f64 = 1.0;

/// How often the proof-of-work loop polls its cancellation token.
const CANCEL_POLL_INTERVAL: u64 = 1024;

/// Tuning knobs for a [`Blockchain`] instance, injected at construction.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Number of leading zero characters a block digest must carry.
    pub difficulty: usize,

    /// Fee charged on admitted transactions; doubles after every mined block.
    pub initial_fee: f64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            difficulty: 4,
            initial_fee: 0.001,
        }
    }
}

/// Mining was cancelled before a satisfying nonce was found.
#[derive(Debug, Error)]
#[error("mining cancelled before a valid nonce was found")]
pub struct MiningCancelled;

/// Cooperative cancellation flag for the proof-of-work loop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Chain, pending pool and fee rate move together: every operation that
/// reads the tip and later appends based on that read must see a consistent
/// view of all three, so they live behind a single lock.
#[derive(Debug)]
struct ChainState {
    chain: Vec<Block>,
    pending_transactions: Vec<Transaction>,
    fee_rate: f64,
}

/// The consensus engine: owns the chain, the pending-transaction pool and
/// the fee rate, and exposes mining, transaction admission, validation and
/// fork-choice replacement. Cloning hands out another handle to the same
/// engine.
#[derive(Debug, Clone)]
pub struct Blockchain {
    state: Arc<Mutex<ChainState>>,

    /// Known peer authorities, in registration order. The order matters: it
    /// is the tie-break among equally long candidate chains during resolve.
    peers: Arc<Mutex<Vec<String>>>,

    config: ChainConfig,
}

impl Blockchain {
    /// Creates an engine with the default difficulty and fee rate. The
    /// chain starts with exactly one block: the genesis block.
    pub fn new() -> Self {
        Self::with_config(ChainConfig::default())
    }

    /// Creates an engine with an explicit configuration.
    pub fn with_config(config: ChainConfig) -> Self {
        let genesis = Block::new(Vec::new(), "0");

        Blockchain {
            state: Arc::new(Mutex::new(ChainState {
                chain: vec![genesis],
                pending_transactions: Vec::new(),
                fee_rate: config.initial_fee,
            })),
            peers: Arc::new(Mutex::new(Vec::new())),
            config,
        }
    }

    /// Gets the current chain tip.
    pub fn latest_block(&self) -> Block {
        let state = self.state.lock().unwrap();
        state.chain.last().unwrap().clone()
    }

    /// Gets the full chain, genesis first.
    pub fn chain(&self) -> Vec<Block> {
        self.state.lock().unwrap().chain.clone()
    }

    pub fn chain_len(&self) -> usize {
        self.state.lock().unwrap().chain.len()
    }

    /// Gets the chain in its wire form, as served to peers.
    pub fn snapshot(&self) -> ChainSnapshot {
        let state = self.state.lock().unwrap();

        ChainSnapshot {
            length: state.chain.len(),
            chain: state.chain.clone(),
        }
    }

    /// Gets all transactions awaiting inclusion in the next block.
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.state.lock().unwrap().pending_transactions.clone()
    }

    /// The fee currently charged on admission.
    pub fn fee_rate(&self) -> f64 {
        self.state.lock().unwrap().fee_rate
    }

    /// Admits a transaction into the pending pool. The caller-supplied fee
    /// is overwritten with the current rate, and admission never fails:
    /// balance and signature checks are out of scope for this node.
    ///
    /// # Returns
    ///
    /// The index of the block that will include the transaction.
    pub fn submit_transaction(&self, mut transaction: Transaction) -> u64 {
        let mut state = self.state.lock().unwrap();

        transaction.set_fee(state.fee_rate);
        state.pending_transactions.push(transaction);

        state.chain.len() as u64
    }

    /// Runs proof-of-work over a mining candidate: increment the nonce and
    /// recompute the digest until it carries the required zero prefix.
    /// Expected work grows as 16^difficulty hash attempts, so the token is
    /// polled only every [`CANCEL_POLL_INTERVAL`] iterations.
    ///
    /// # Returns
    ///
    /// The satisfying nonce, or `None` if the token was cancelled first.
    pub fn proof_of_work(&self, template: &mut BlockTemplate, cancel: &CancelToken) -> Option<u64> {
        loop {
            if template.nonce % CANCEL_POLL_INTERVAL == 0 && cancel.is_cancelled() {
                return None;
            }

            template.nonce += 1;

            if meets_difficulty(&template.digest(), self.config.difficulty) {
                return Some(template.nonce);
            }
        }
    }

    /// Mines one block from the pending pool.
    ///
    /// Holds the state lock from tip read to append, so two concurrent
    /// mining calls can never both extend the same tip. After the append
    /// the pool is reset to a single reward transaction crediting the miner
    /// at the pre-mine fee rate, and the fee rate doubles for the next
    /// round. The mined block itself contains only the pre-mine pool; the
    /// reward lands in the pool, not the block.
    pub fn mine_pending_transactions(
        &self,
        miner_address: &Address,
        cancel: &CancelToken,
    ) -> Result<Block, MiningCancelled> {
        let mut state = self.state.lock().unwrap();

        let previous_hash = state.chain.last().unwrap().hash().to_string();
        let mut template = BlockTemplate::new(state.pending_transactions.clone(), previous_hash);

        let nonce = self
            .proof_of_work(&mut template, cancel)
            .ok_or(MiningCancelled)?;
        let block = template.seal();

        info!(
            "mined block {} with nonce {} ({} transactions)",
            state.chain.len(),
            nonce,
            block.transactions().len()
        );

        state.chain.push(block.clone());
        state.pending_transactions = vec![Transaction::reward(
            miner_address.clone(),
            REWARD_AMOUNT,
            state.fee_rate,
        )];
        state.fee_rate *= 2.0;

        Ok(block)
    }

    /// Appends an externally built block, rebinding it to the current tip.
    /// Relinking reseals the block, so its stored digest always matches the
    /// linkage it is appended with. No difficulty check is applied here;
    /// candidates from the mining path satisfy it by construction.
    pub fn append_block(&self, block: Block) -> Block {
        let mut state = self.state.lock().unwrap();

        let tip_hash = state.chain.last().unwrap().hash().to_string();
        let block = block.relink(tip_hash);
        state.chain.push(block.clone());

        block
    }

    /// Whether the engine's own chain passes validation.
    pub fn is_valid(&self) -> bool {
        self.is_chain_valid(&self.state.lock().unwrap().chain)
    }

    /// Validates a chain end to end. Every non-genesis block must link to
    /// the recomputed digest of its predecessor, and its own recomputed
    /// digest must carry the difficulty prefix. Stored hashes are never
    /// trusted; a chain received from a peer may claim anything.
    ///
    /// # Returns
    ///
    /// false on the first violation found, true otherwise.
    pub fn is_chain_valid(&self, chain: &[Block]) -> bool {
        for i in 1..chain.len() {
            let block = &chain[i];

            if block.previous_hash() != chain[i - 1].digest() {
                return false;
            }

            if !meets_difficulty(&block.digest(), self.config.difficulty) {
                return false;
            }
        }

        true
    }

    /// Registers a peer by its network location, normalized down to its
    /// `host:port` authority. Duplicates are dropped and registration order
    /// is preserved.
    pub fn register_peer(&self, address: &str) -> Result<String, PeerError> {
        let authority = peer_authority(address)?;
        let mut peers = self.peers.lock().unwrap();

        if !peers.contains(&authority) {
            peers.push(authority.clone());
        }

        Ok(authority)
    }

    /// Known peers, in registration order.
    pub fn peers(&self) -> Vec<String> {
        self.peers.lock().unwrap().clone()
    }

    /// Longest-valid-chain fork choice.
    ///
    /// Every known peer is polled independently; an unreachable peer or an
    /// invalid chain removes that peer from consideration without aborting
    /// the sweep. A candidate must be strictly longer than the local chain
    /// (by actual block count, the peer's claimed length is not trusted)
    /// and pass [`Blockchain::is_chain_valid`]. Among such candidates the
    /// longest wins; the first-registered peer wins ties.
    ///
    /// # Returns
    ///
    /// true if the local chain was replaced.
    pub fn resolve(&self, source: &dyn PeerSource) -> bool {
        let peers = self.peers();
        let mut best: Option<Vec<Block>> = None;
        let mut max_length = self.chain_len();

        for peer in &peers {
            let snapshot = match source.fetch_chain(peer) {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    warn!("peer {} contributed no candidate: {}", peer, err);
                    continue;
                }
            };

            if snapshot.chain.len() > max_length && self.is_chain_valid(&snapshot.chain) {
                max_length = snapshot.chain.len();
                best = Some(snapshot.chain);
            }
        }

        let candidate = match best {
            Some(candidate) => candidate,
            None => return false,
        };

        let mut state = self.state.lock().unwrap();

        // The chain may have grown while peers were being polled.
        if candidate.len() <= state.chain.len() {
            return false;
        }

        info!(
            "replacing local chain ({} blocks) with peer chain ({} blocks)",
            state.chain.len(),
            candidate.len()
        );
        state.chain = candidate;

        true
    }
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use reqwest::StatusCode;

    fn test_engine() -> Blockchain {
        Blockchain::with_config(ChainConfig {
            difficulty: 2,
            initial_fee: 0.001,
        })
    }

    fn mine(engine: &Blockchain, miner: &str) -> Block {
        engine
            .mine_pending_transactions(&Address::from(miner), &CancelToken::new())
            .unwrap()
    }

    /// Serves canned snapshots; peers not in the map are unreachable.
    struct StubPeerSource {
        chains: HashMap<String, ChainSnapshot>,
    }

    impl StubPeerSource {
        fn new() -> Self {
            StubPeerSource {
                chains: HashMap::new(),
            }
        }

        fn serve(mut self, peer: &str, engine: &Blockchain) -> Self {
            self.chains.insert(peer.to_string(), engine.snapshot());
            self
        }

        fn serve_snapshot(mut self, peer: &str, snapshot: ChainSnapshot) -> Self {
            self.chains.insert(peer.to_string(), snapshot);
            self
        }
    }

    impl PeerSource for StubPeerSource {
        fn fetch_chain(&self, peer: &str) -> Result<ChainSnapshot, PeerError> {
            self.chains
                .get(peer)
                .cloned()
                .ok_or(PeerError::Status(StatusCode::NOT_FOUND))
        }
    }

    /// Reserializes a chain with one block's previous_hash replaced, the
    /// way a tampering peer would.
    fn tamper_previous_hash(snapshot: &ChainSnapshot, index: usize) -> ChainSnapshot {
        let mut value = serde_json::to_value(snapshot).unwrap();
        value["chain"][index]["previous_hash"] = serde_json::json!("forged");
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_genesis() {
        let engine = test_engine();
        let chain = engine.chain();

        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].previous_hash(), "0");
        assert!(chain[0].transactions().is_empty());
    }

    #[test]
    fn test_submit_overwrites_fee() {
        let engine = test_engine();

        engine.submit_transaction(Transaction::new(
            Address::from("alice"),
            Address::from("bob"),
            10.0,
            42.0,
        ));

        let pending = engine.pending_transactions();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].fee, 0.001);
    }

    #[test]
    fn test_mine_extends_chain_from_genesis() {
        let engine = test_engine();
        let genesis = engine.latest_block();

        let block = mine(&engine, "miner");

        assert_eq!(engine.chain_len(), 2);
        assert_eq!(block.previous_hash(), genesis.digest());
        assert!(meets_difficulty(&block.digest(), 2));
        assert!(engine.is_valid());
    }

    #[test]
    fn test_mined_block_carries_pool_but_not_reward() {
        let engine = test_engine();

        engine.submit_transaction(Transaction::new(
            Address::from("alice"),
            Address::from("bob"),
            10.0,
            0.0,
        ));

        let block = mine(&engine, "miner");

        // The submitted transaction is in the block at the admission-time
        // fee; the reward lands in the pool for the next block.
        assert_eq!(block.transactions().len(), 1);
        assert_eq!(block.transactions()[0].amount, 10.0);
        assert_eq!(block.transactions()[0].fee, 0.001);
        assert!(block.transactions().iter().all(|tx| !tx.is_reward()));
    }

    #[test]
    fn test_reward_and_fee_doubling() {
        let engine = test_engine();

        mine(&engine, "miner");

        let pending = engine.pending_transactions();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].is_reward());
        assert_eq!(pending[0].recipient, Address::from("miner"));
        assert_eq!(pending[0].amount, 1.0);
        assert_eq!(pending[0].fee, 0.001);
        assert_eq!(engine.fee_rate(), 0.002);

        mine(&engine, "miner");

        let pending = engine.pending_transactions();
        assert_eq!(pending[0].fee, 0.002);
        assert_eq!(engine.fee_rate(), 0.004);
    }

    #[test]
    fn test_proof_of_work_finds_satisfying_nonce() {
        let engine = test_engine();
        let mut template = BlockTemplate::new(Vec::new(), "previous");

        let nonce = engine
            .proof_of_work(&mut template, &CancelToken::new())
            .unwrap();

        assert_eq!(template.nonce, nonce);
        assert!(meets_difficulty(&template.digest(), 2));
    }

    #[test]
    fn test_cancelled_mining_leaves_state_untouched() {
        let engine = test_engine();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = engine.mine_pending_transactions(&Address::from("miner"), &cancel);

        assert!(result.is_err());
        assert_eq!(engine.chain_len(), 1);
        assert!(engine.pending_transactions().is_empty());
        assert_eq!(engine.fee_rate(), 0.001);
    }

    #[test]
    fn test_append_block_relinks_to_tip() {
        let engine = test_engine();
        let tip_hash = engine.latest_block().hash().to_string();

        let block = Block::new(Vec::new(), "somewhere else entirely");
        let appended = engine.append_block(block);

        assert_eq!(engine.chain_len(), 2);
        assert_eq!(appended.previous_hash(), tip_hash);
        assert_eq!(appended.hash(), appended.digest());
    }

    #[test]
    fn test_tampered_chain_is_invalid() {
        let engine = test_engine();
        mine(&engine, "miner");
        mine(&engine, "miner");
        assert!(engine.is_valid());

        let tampered = tamper_previous_hash(&engine.snapshot(), 1);

        assert!(!engine.is_chain_valid(&tampered.chain));
    }

    #[test]
    fn test_register_peer_dedups_and_preserves_order() {
        let engine = test_engine();

        engine.register_peer("http://127.0.0.1:8090").unwrap();
        engine.register_peer("http://127.0.0.1:8091/").unwrap();
        engine.register_peer("127.0.0.1:8090").unwrap();

        assert_eq!(engine.peers(), vec!["127.0.0.1:8090", "127.0.0.1:8091"]);
        assert!(engine.register_peer("http://").is_err());
    }

    #[test]
    fn test_resolve_adopts_longer_valid_chain() {
        let local = test_engine();
        let remote = test_engine();
        mine(&remote, "remote-miner");
        mine(&remote, "remote-miner");

        local.register_peer("127.0.0.1:8090").unwrap();
        let source = StubPeerSource::new().serve("127.0.0.1:8090", &remote);

        assert!(local.resolve(&source));
        assert_eq!(local.chain_len(), 3);
        assert_eq!(local.chain(), remote.chain());
        assert!(local.is_valid());
    }

    #[test]
    fn test_resolve_rejects_equal_length_chain() {
        let local = test_engine();
        mine(&local, "local-miner");

        let remote = test_engine();
        mine(&remote, "remote-miner");

        local.register_peer("127.0.0.1:8090").unwrap();
        let source = StubPeerSource::new().serve("127.0.0.1:8090", &remote);

        let before = local.chain();
        assert!(!local.resolve(&source));
        assert_eq!(local.chain(), before);
    }

    #[test]
    fn test_resolve_rejects_longer_tampered_chain() {
        let local = test_engine();
        let remote = test_engine();
        mine(&remote, "remote-miner");
        mine(&remote, "remote-miner");

        local.register_peer("127.0.0.1:8090").unwrap();
        let source = StubPeerSource::new()
            .serve_snapshot("127.0.0.1:8090", tamper_previous_hash(&remote.snapshot(), 2));

        let before = local.chain();
        assert!(!local.resolve(&source));
        assert_eq!(local.chain(), before);
    }

    #[test]
    fn test_resolve_skips_unreachable_peer() {
        let local = test_engine();
        let remote = test_engine();
        mine(&remote, "remote-miner");

        // The first registered peer is unreachable; the second still gets
        // evaluated.
        local.register_peer("127.0.0.1:8090").unwrap();
        local.register_peer("127.0.0.1:8091").unwrap();
        let source = StubPeerSource::new().serve("127.0.0.1:8091", &remote);

        assert!(local.resolve(&source));
        assert_eq!(local.chain(), remote.chain());
    }

    #[test]
    fn test_resolve_tie_break_prefers_first_registered() {
        let local = test_engine();

        let first = test_engine();
        mine(&first, "first-miner");
        let second = test_engine();
        mine(&second, "second-miner");
        assert_eq!(first.chain_len(), second.chain_len());

        local.register_peer("127.0.0.1:8090").unwrap();
        local.register_peer("127.0.0.1:8091").unwrap();
        let source = StubPeerSource::new()
            .serve("127.0.0.1:8090", &first)
            .serve("127.0.0.1:8091", &second);

        assert!(local.resolve(&source));
        assert_eq!(local.chain(), first.chain());
    }

    #[test]
    fn test_resolve_ignores_claimed_length() {
        let local = test_engine();
        let remote = test_engine();

        // A peer claiming a huge length for a single-block chain must not
        // cause a replacement.
        let mut snapshot = remote.snapshot();
        snapshot.length = 1000;

        local.register_peer("127.0.0.1:8090").unwrap();
        let source = StubPeerSource::new().serve_snapshot("127.0.0.1:8090", snapshot);

        assert!(!local.resolve(&source));
        assert_eq!(local.chain_len(), 1);
    }
}
