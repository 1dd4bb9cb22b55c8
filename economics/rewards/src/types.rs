use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use smartrewards_storage::StorageError;

/// Amount in the smallest coin unit.
pub type Amount = u64;

/// Base units per coin.
pub const COIN: Amount = 100_000_000;

/// Ordinal number of a reward round, starting at 1.
pub type RoundNumber = u16;

/// A chain address in its encoded form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub String);

impl Address {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// 32-byte block or transaction hash. Serialized as a hex string.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Self(out))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash256::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Per-address reward eligibility record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardEntry {
    pub address: Address,
    pub balance: Amount,
    /// Height of the last block that changed the balance.
    pub last_changed_height: u64,
    /// Round this entry is disqualified for, if any.
    pub disqualified_round: Option<RoundNumber>,
    /// Height of the block that disqualified it.
    pub disqualifying_height: Option<u64>,
    /// Round the accrual fields below belong to.
    pub accrual_round: Option<RoundNumber>,
    /// Height up to which `accrued_weight` has been settled.
    pub accrual_height: u64,
    /// Balance-blocks held so far in `accrual_round`.
    pub accrued_weight: u128,
}

impl RewardEntry {
    /// A fresh, zero-balance entry.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            balance: 0,
            last_changed_height: 0,
            disqualified_round: None,
            disqualifying_height: None,
            accrual_round: None,
            accrual_height: 0,
            accrued_weight: 0,
        }
    }

    pub fn is_disqualified_in(&self, round: RoundNumber) -> bool {
        self.disqualified_round == Some(round)
    }

    pub fn disqualify(&mut self, round: RoundNumber, height: u64) {
        self.disqualified_round = Some(round);
        self.disqualifying_height = Some(height);
    }

    /// Add `amount` to the balance. Fails on overflow.
    pub fn credit(&mut self, amount: Amount) -> Result<(), LedgerError> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        Ok(())
    }

    /// Subtract `amount` from the balance. Fails if it would go negative.
    pub fn debit(&mut self, amount: Amount) -> Result<(), LedgerError> {
        if self.balance < amount {
            return Err(LedgerError::NegativeBalance {
                address: self.address.clone(),
                balance: self.balance,
                debit: amount,
            });
        }
        self.balance -= amount;
        Ok(())
    }

    /// Accrue the current balance as held from the last settle point up to
    /// (excluding) `height` within `round`.
    pub fn settle_weight(&mut self, round: &Round, height: u64) {
        if self.accrual_round != Some(round.number) {
            self.accrual_round = Some(round.number);
            self.accrued_weight = 0;
            self.accrual_height = round.start_height;
        }
        let held = height.saturating_sub(self.accrual_height);
        self.accrued_weight += self.balance as u128 * held as u128;
        self.accrual_height = self.accrual_height.max(height);
    }

    /// Balance-blocks held over the whole of `round`, assuming no change after
    /// the last settle point.
    pub fn held_weight(&self, round: &Round) -> u128 {
        let end = round.end_height + 1;
        if self.accrual_round == Some(round.number) {
            let tail = end.saturating_sub(self.accrual_height);
            self.accrued_weight + self.balance as u128 * tail as u128
        } else {
            self.balance as u128 * round.length() as u128
        }
    }
}

/// Marker for a processed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMarker {
    pub height: u64,
    pub hash: Hash256,
    /// Block header time (unix seconds).
    pub time: i64,
    /// Wall-clock time the ledger processed it (unix seconds).
    pub processed_at: i64,
}

/// A transaction that changed at least one ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardTransaction {
    pub hash: Hash256,
    pub height: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundStatus {
    Pending,
    Active,
    Finished,
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundStatus::Pending => write!(f, "pending"),
            RoundStatus::Active => write!(f, "active"),
            RoundStatus::Finished => write!(f, "finished"),
        }
    }
}

/// A reward round covering `start_height..=end_height`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub number: RoundNumber,
    pub start_height: u64,
    pub end_height: u64,
    pub start_time: i64,
    pub end_time: i64,
    pub status: RoundStatus,
    /// Amount to distribute across eligible entries.
    pub total_reward: Amount,
    /// Set on finalization.
    pub eligible_entries: u64,
    /// Set on finalization.
    pub eligible_weight: u128,
    /// Sum of snapshot payouts; `total_reward - paid` is the truncation remainder.
    pub paid: Amount,
    pub disqualified_entries: u64,
    /// Balance held by entries at the moment they were disqualified.
    pub disqualified_balance: Amount,
}

impl Round {
    pub fn contains(&self, height: u64) -> bool {
        height >= self.start_height && height <= self.end_height
    }

    /// Number of blocks in the round.
    pub fn length(&self) -> u64 {
        self.end_height + 1 - self.start_height
    }

    pub fn is_finished(&self) -> bool {
        self.status == RoundStatus::Finished
    }
}

/// Finalized per-address payout for a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSnapshot {
    pub round: RoundNumber,
    pub address: Address,
    pub balance: Amount,
    pub weight: Amount,
    pub payout: Amount,
}

/// Everything needed to revert one connected block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockUndo {
    pub height: u64,
    pub hash: Hash256,
    /// Prior state of each touched entry; `None` if the block created it.
    pub entries: Vec<(Address, Option<RewardEntry>)>,
    pub transactions: Vec<Hash256>,
    /// Prior state of every round record the block changed, oldest first.
    pub rounds: Vec<Round>,
    /// Rounds whose records the block created.
    pub created_rounds: Vec<RoundNumber>,
    /// Round finalized by this block, whose snapshots must go on revert.
    pub finalized_round: Option<RoundNumber>,
}

impl BlockUndo {
    pub fn new(height: u64, hash: Hash256) -> Self {
        Self {
            height,
            hash,
            entries: Vec::new(),
            transactions: Vec::new(),
            rounds: Vec::new(),
            created_rounds: Vec::new(),
            finalized_round: None,
        }
    }

    /// Prior state of each round touched, keeping only the earliest per number.
    pub fn original_rounds(&self) -> Vec<Round> {
        let mut out: Vec<Round> = Vec::new();
        for round in &self.rounds {
            if !out.iter().any(|r| r.number == round.number) {
                out.push(round.clone());
            }
        }
        out
    }
}

/// A balance change for one address inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub address: Address,
    /// Positive for received funds, negative for spent funds.
    pub amount: i64,
}

/// A transaction as the chain layer hands it over: its hash and the net
/// balance effect per address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTransaction {
    pub hash: Hash256,
    pub deltas: Vec<BalanceDelta>,
}

/// A block connected to the main chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedBlock {
    pub height: u64,
    pub hash: Hash256,
    pub time: i64,
    #[serde(default)]
    pub transactions: Vec<BlockTransaction>,
}

/// Outcome of applying one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    /// Entries newly disqualified by this block.
    pub disqualified_entries: u64,
    /// Of those, entries that held at least the eligibility floor before
    /// the disqualifying transfer.
    pub disqualified_smart: u64,
    /// Balance held by those entries before the transfer.
    pub disqualified_amount: Amount,
    pub block: BlockMarker,
    /// False when the block was already staged and only the flush was retried.
    pub applied: bool,
    /// Whether staged state reached the store during this call.
    pub flushed: bool,
    pub finalized_round: Option<RoundNumber>,
}

/// Errors surfaced by the ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("out-of-order block: expected height {expected}, got {got}")]
    Sequencing { expected: u64, got: u64 },

    #[error("hash mismatch at height {height}: ledger has {expected}, got {got}")]
    HashMismatch {
        height: u64,
        expected: Hash256,
        got: Hash256,
    },

    #[error("debit of {debit} exceeds balance {balance} of {address}")]
    NegativeBalance {
        address: Address,
        balance: Amount,
        debit: Amount,
    },

    #[error("arithmetic overflow")]
    Overflow,

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("record codec error: {0}")]
    Codec(String),

    #[error("ledger halted: {0}")]
    Halted(String),

    #[error("ledger corrupted: {0}")]
    Corrupted(String),

    #[error("round evaluation invariant violated: {0}")]
    Evaluation(String),

    #[error("round {0} not found")]
    RoundNotFound(RoundNumber),

    #[error("round {0} is not finished")]
    RoundNotFinished(RoundNumber),

    #[error("cannot disconnect block {height}: undo data is kept only above height {floor}")]
    ReorgTooDeep { height: u64, floor: u64 },

    #[error("no rollback prepared")]
    NoRollbackPrepared,

    #[error("configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    /// Storage failures may succeed on retry; everything else needs the caller
    /// to change what it sends.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Storage(_))
    }
}

impl From<bincode::Error> for LedgerError {
    fn from(e: bincode::Error) -> Self {
        LedgerError::Codec(e.to_string())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
