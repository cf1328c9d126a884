//! Block reward schedule and minted-supply accounting

use crate::config::GenesisConfig;
use crate::constants::MAX_HALVINGS;
use crate::types::Amount;

/// Halving subsidy schedule with a hard supply cap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardCalculator {
    initial_reward: Amount,
    halving_interval: u64,
    max_supply: Amount,
    total_mined: Amount,
}

impl RewardCalculator {
    pub fn new(initial_reward: Amount, halving_interval: u64, max_supply: Amount) -> Self {
        Self {
            initial_reward,
            halving_interval: halving_interval.max(1),
            max_supply,
            total_mined: 0,
        }
    }

    pub fn from_config(config: &GenesisConfig) -> Self {
        Self::new(config.initial_reward, config.halving_interval, config.max_supply)
    }

    /// Subsidy ignoring the supply cap: initial >> ⌊h / H⌋, zero after 64 halvings
    pub fn scheduled_reward(&self, height: u64) -> Amount {
        let halvings = height / self.halving_interval;
        if halvings >= MAX_HALVINGS {
            return 0;
        }
        self.initial_reward >> halvings
    }

    /// GetBlockReward: ℕ → ℕ
    ///
    /// The scheduled subsidy, reduced to whatever remains below the supply cap.
    pub fn block_reward(&self, height: u64) -> Amount {
        let reward = self.scheduled_reward(height);
        let remaining = self.remaining_supply();
        reward.min(remaining)
    }

    /// Block reward plus collected fees
    pub fn coinbase_reward(&self, height: u64, fees: Amount) -> Amount {
        self.block_reward(height).saturating_add(fees)
    }

    /// Record newly minted coins, saturating at the supply cap
    pub fn update_total_mined(&mut self, amount: Amount) {
        self.total_mined = self.total_mined.saturating_add(amount).min(self.max_supply);
    }

    pub fn total_mined(&self) -> Amount {
        self.total_mined
    }

    pub fn max_supply(&self) -> Amount {
        self.max_supply
    }

    pub fn remaining_supply(&self) -> Amount {
        self.max_supply.saturating_sub(self.total_mined)
    }

    /// Height at which the next halving takes effect
    pub fn next_halving_height(&self, height: u64) -> u64 {
        (height / self.halving_interval + 1).saturating_mul(self.halving_interval)
    }

    pub fn blocks_until_halving(&self, height: u64) -> u64 {
        self.next_halving_height(height).saturating_sub(height)
    }

    pub fn mined_percentage(&self) -> f64 {
        if self.max_supply == 0 {
            return 0.0;
        }
        self.total_mined as f64 / self.max_supply as f64 * 100.0
    }
}
