//! Ledger constants and mainnet genesis parameters

/// Smallest units per coin
pub const UNITS_PER_COIN: u64 = 100_000_000;

/// Mainnet chain identifier
pub const MAINNET_CHAIN_ID: &str = "voidex-mainnet";

/// Testnet chain identifier
pub const TESTNET_CHAIN_ID: &str = "voidex-testnet";

/// Regression-test chain identifier
pub const REGTEST_CHAIN_ID: &str = "voidex-regtest";

/// Block and transaction format version
pub const LEDGER_VERSION: u32 = 1;

/// Mainnet genesis timestamp: 2025-01-01T00:00:00Z
pub const MAINNET_GENESIS_TIMESTAMP: i64 = 1_735_689_600;

/// Initial block reward: 50 coins
pub const INITIAL_REWARD: u64 = 50 * UNITS_PER_COIN;

/// Reward halves every 210,000 blocks
pub const HALVING_INTERVAL: u64 = 210_000;

/// Maximum supply: 50,000,000 coins
pub const MAX_SUPPLY: u64 = 50_000_000 * UNITS_PER_COIN;

/// Difficulty is recomputed every 2016 blocks
pub const DIFFICULTY_WINDOW: u64 = 2016;

/// Target seconds between blocks
pub const TARGET_BLOCK_INTERVAL: u64 = 60;

/// Mainnet starting difficulty, in leading zero bits of the block hash
pub const INITIAL_DIFFICULTY: u32 = 16;

/// Maximum transactions per block, coinbase included
pub const MAX_TX_PER_BLOCK: usize = 2000;

/// Halvings after which the reward is always zero
pub const MAX_HALVINGS: u64 = 64;

/// Clamp bounds for the retarget ratio
pub const MIN_ADJUSTMENT_RATIO: i64 = 1;
pub const MAX_ADJUSTMENT_RATIO: i64 = 4;

/// Default mempool capacity
pub const DEFAULT_MEMPOOL_SIZE: usize = 10_000;

/// Default mempool retention: 24 hours
pub const DEFAULT_MEMPOOL_MAX_AGE_SECS: u64 = 24 * 60 * 60;

/// Default expiry sweep period: 5 minutes
pub const DEFAULT_MEMPOOL_SWEEP_SECS: u64 = 5 * 60;

/// Lock-script tag stamped on coinbase outputs
pub const DEFAULT_LOCK_SCRIPT: &str = "OP_CHECKSIG";

/// Attempts between mining progress reports
pub const MINING_REPORT_INTERVAL: u64 = 1_000_000;

/// Address string prefix
pub const ADDRESS_PREFIX: &str = "VDX";

/// Address payload version byte
pub const ADDRESS_VERSION: u8 = 0x01;
