use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::db_access::GameConfig;
use crate::rl_env::{RLEnv, StepRow};

pub const ACTION_STAND: usize = 0;
pub const ACTION_HIT: usize = 1;
pub const ACTION_COUNTER: usize = 2;

pub const N_ACTIONS: usize = 3;
pub const OBS_LOW: [f32; 3] = [0.0, 0.0, 0.0];
pub const OBS_HIGH: [f32; 3] = [31.0, 31.0, 10_000_000.0];

/// Dice-based blackjack variant. One episode runs from `reset` until a
/// Stand or a bust terminates it; Hit without busting keeps the episode
/// open. Session counters (steps, wins, counter uses, refills) and the
/// bankroll survive across episodes and are wiped only by `reset_stats`.
pub struct CasinoEnv {
    pub config: GameConfig,
    pub player_hand: i32,
    pub dealer_hand: i32,
    pub player_money: f32,
    pub house_profit: f32,
    pub steps: u64,
    pub wins: u64,
    pub counter_hits: u64,
    pub refill_count: u64,
    pub counter_used: bool,
    pub terminated: bool,
    rng: StdRng,
}

impl CasinoEnv {
    pub fn new(config: GameConfig) -> CasinoEnv {
        CasinoEnv::with_seed(config, rand::random::<u64>())
    }

    pub fn with_seed(config: GameConfig, seed: u64) -> CasinoEnv {
        let mut env = CasinoEnv {
            config,
            player_hand: 0,
            dealer_hand: 0,
            player_money: 0.0,
            house_profit: 0.0,
            steps: 0,
            wins: 0,
            counter_hits: 0,
            refill_count: 0,
            counter_used: false,
            terminated: false,
            rng: StdRng::seed_from_u64(seed),
        };
        env.reset_stats();
        env
    }

    pub fn reset_stats(&mut self) {
        self.player_money = self.config.initial_balance();
        self.house_profit = 0.0;
        self.steps = 0;
        self.wins = 0;
        self.counter_hits = 0;
        self.refill_count = 0;
    }

    fn draw_die(&mut self) -> i32 {
        self.rng.gen_range(1..7)
    }

    pub fn observation(&self) -> Vec<f32> {
        vec![
            self.player_hand as f32,
            self.dealer_hand as f32,
            self.player_money,
        ]
    }

    /// Percentage of steps that ended in a player win. Denominator is
    /// floored at 1 so step 0 reads as 0 rather than NaN.
    pub fn win_rate(&self) -> f32 {
        (self.wins as f32 / self.steps.max(1) as f32) * 100.0
    }

    pub fn counter_usage(&self) -> f32 {
        (self.counter_hits as f32 / self.steps.max(1) as f32) * 100.0
    }

    fn refill_if_broke(&mut self, reward: &mut f32) {
        let bet = self.config.bet();
        if self.player_money < bet {
            self.player_money = self.config.refill_target();
            *reward += self.config.refill_penalty();
            self.refill_count += 1;
        }
    }
}

impl RLEnv for CasinoEnv {
    fn reset(&mut self) -> Vec<f32> {
        self.player_hand = self.rng.gen_range(2..12);
        self.dealer_hand = self.rng.gen_range(2..12);
        self.counter_used = false;
        self.terminated = false;
        self.observation()
    }

    fn step(&mut self, action: usize) -> StepRow {
        self.steps += 1;
        let mut reward = 0.0f32;
        let mut terminated = false;

        let bet = self.config.bet();

        if action == ACTION_HIT {
            self.player_hand += self.draw_die();
        } else if action == ACTION_COUNTER {
            self.player_money -= self.config.counter_fee();
            self.counter_hits += 1;
            self.counter_used = true;
        }

        // Bust check applies whatever the action was.
        if self.player_hand > 21 {
            reward = -bet;
            self.player_money -= bet;
            self.house_profit += bet;
            terminated = true;
        } else if action == ACTION_STAND {
            let stand = self.config.dealer_stand();
            while self.dealer_hand < stand {
                self.dealer_hand += self.draw_die();
            }
            if self.dealer_hand > 21 || self.player_hand > self.dealer_hand {
                let payout = if self.counter_used {
                    self.config.counter_payout()
                } else {
                    self.config.win_payout()
                };
                reward = payout;
                self.player_money += payout;
                self.house_profit -= payout;
                self.wins += 1;
            } else {
                reward = -bet;
                self.player_money -= bet;
                self.house_profit += bet;
            }
            terminated = true;
        }

        // Runs after every step, not only terminal ones, so a counter fee
        // or a no-money Hit can trigger it mid-episode.
        self.refill_if_broke(&mut reward);

        self.terminated = terminated;
        StepRow {
            obs: self.observation(),
            reward,
            terminated,
            truncated: false,
            info: String::new(),
        }
    }

    fn action_space(&self) -> usize {
        N_ACTIONS
    }

    fn state_space(&self) -> usize {
        OBS_HIGH.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> GameConfig {
        GameConfig {
            id: Some(1),
            initial_player_balance: Some(200.0),
            bet_amount: Some(100.0),
            counter_fee: Some(50.0),
            win_payout: Some(200.0),
            counter_win_payout: None,
            dealer_stand: Some(17),
            total_timesteps: Some(1000),
            max_balance_ref: None,
            refill_penalty: Some(-500.0),
        }
    }

    fn env() -> CasinoEnv {
        CasinoEnv::with_seed(test_config(), 7)
    }

    #[test]
    fn reset_draws_hands_in_range_and_keeps_counters() {
        let mut env = env();
        env.wins = 3;
        env.steps = 10;
        for _ in 0..50 {
            let obs = env.reset();
            assert!((2.0..=11.0).contains(&obs[0]));
            assert!((2.0..=11.0).contains(&obs[1]));
        }
        assert_eq!(env.wins, 3);
        assert_eq!(env.steps, 10);
    }

    #[test]
    fn hit_on_21_always_busts() {
        let mut env = env();
        env.reset();
        env.player_hand = 21;
        let row = env.step(ACTION_HIT);
        assert!(row.terminated);
        assert!(!row.truncated);
        assert_eq!(row.reward, -100.0);
        assert_eq!(env.house_profit, 100.0);
        // 200 - 100 = 100, still >= bet, no refill
        assert_eq!(env.player_money, 100.0);
        assert_eq!(env.refill_count, 0);
    }

    #[test]
    fn bust_terminates_regardless_of_action() {
        // Already over 21: even a counter play ends the round at -bet.
        let mut env = env();
        env.reset();
        env.player_hand = 22;
        let row = env.step(ACTION_COUNTER);
        assert!(row.terminated);
        assert_eq!(env.counter_hits, 1);
        // -50 fee -100 bet leaves 50 < bet, refill fires in the same step
        assert_eq!(env.player_money, 200.0);
        assert_eq!(env.refill_count, 1);
        assert_eq!(row.reward, -100.0 + -500.0);
        assert_eq!(env.house_profit, 100.0);
    }

    #[test]
    fn stand_win_when_dealer_busts() {
        let mut env = env();
        env.reset();
        env.player_hand = 4;
        env.dealer_hand = 22;
        let row = env.step(ACTION_STAND);
        assert!(row.terminated);
        assert_eq!(row.reward, 200.0);
        assert_eq!(env.wins, 1);
        assert_eq!(env.house_profit, -200.0);
    }

    #[test]
    fn stand_loss_when_dealer_higher() {
        let mut env = env();
        env.reset();
        env.player_hand = 15;
        env.dealer_hand = 20;
        let row = env.step(ACTION_STAND);
        assert!(row.terminated);
        assert_eq!(row.reward, -100.0);
        assert_eq!(env.wins, 0);
        assert_eq!(env.house_profit, 100.0);
    }

    #[test]
    fn stand_win_concrete_scenario() {
        // initial 200, bet 100, payout 200, stand 17; player 20 vs dealer 18
        let mut env = env();
        env.reset();
        env.player_hand = 20;
        env.dealer_hand = 18;
        let row = env.step(ACTION_STAND);
        assert!(row.terminated);
        assert_eq!(row.reward, 200.0);
        assert_eq!(env.player_money, 400.0);
        assert_eq!(env.house_profit, -200.0);
        assert_eq!(env.wins, 1);
    }

    #[test]
    fn dealer_never_hits_at_stand_threshold() {
        let mut env = env();
        env.reset();
        env.player_hand = 5;
        env.dealer_hand = 17;
        env.step(ACTION_STAND);
        assert_eq!(env.dealer_hand, 17);
    }

    #[test]
    fn counter_charges_fee_without_ending_episode() {
        let mut env = env();
        env.reset();
        env.player_hand = 10;
        let row = env.step(ACTION_COUNTER);
        assert!(!row.terminated);
        assert_eq!(env.player_hand, 10);
        assert_eq!(env.player_money, 150.0);
        assert_eq!(env.counter_hits, 1);
        assert_eq!(row.reward, 0.0);
    }

    #[test]
    fn counter_win_pays_counter_payout() {
        let mut config = test_config();
        config.counter_win_payout = Some(250.0);
        let mut env = CasinoEnv::with_seed(config, 7);
        env.reset();
        env.player_hand = 10;
        env.step(ACTION_COUNTER);
        env.player_hand = 20;
        env.dealer_hand = 18;
        let row = env.step(ACTION_STAND);
        assert_eq!(row.reward, 250.0);
    }

    #[test]
    fn refill_after_losing_below_bet() {
        let mut env = env();
        env.reset();
        env.player_money = 150.0;
        env.player_hand = 15;
        env.dealer_hand = 20;
        let row = env.step(ACTION_STAND);
        // 150 - 100 = 50 < bet: refilled to initial balance, penalty added
        assert_eq!(env.player_money, 200.0);
        assert_eq!(env.refill_count, 1);
        assert_eq!(row.reward, -100.0 + -500.0);
    }

    #[test]
    fn refill_fires_mid_episode_after_hit() {
        // No money moves on a plain Hit, but the refill check still runs.
        let mut env = env();
        env.reset();
        env.player_money = 50.0;
        env.player_hand = 2;
        let row = env.step(ACTION_HIT);
        assert!(!row.terminated);
        assert_eq!(row.reward, -500.0);
        assert_eq!(env.player_money, 200.0);
        assert_eq!(env.refill_count, 1);
    }

    #[test]
    fn refill_target_never_below_bet() {
        let mut config = test_config();
        config.max_balance_ref = Some(50.0);
        let mut env = CasinoEnv::with_seed(config, 7);
        env.reset();
        env.player_money = 10.0;
        env.player_hand = 5;
        env.step(ACTION_HIT);
        assert!(env.player_money >= env.config.bet());
    }

    #[test]
    fn rates_are_bounded_percentages() {
        let mut env = env();
        assert_eq!(env.win_rate(), 0.0);
        assert_eq!(env.counter_usage(), 0.0);
        env.reset();
        for _ in 0..20 {
            let row = env.step(ACTION_COUNTER);
            if row.terminated {
                env.reset();
            }
        }
        assert!(env.win_rate() >= 0.0 && env.win_rate() <= 100.0);
        assert!(env.counter_usage() >= 0.0 && env.counter_usage() <= 100.0);
    }

    #[test]
    fn hands_stay_inside_declared_observation_bounds() {
        let mut env = env();
        for _ in 0..200 {
            let obs = env.reset();
            assert!(obs[0] >= OBS_LOW[0] && obs[1] >= OBS_LOW[1]);
            let row = env.step(ACTION_HIT);
            // worst case 21 before the draw, 27 after
            assert!(row.obs[0] <= OBS_HIGH[0]);
            assert!(row.obs[1] <= OBS_HIGH[1]);
        }
    }

    #[test]
    fn reset_stats_wipes_session_counters() {
        let mut env = env();
        env.reset();
        env.player_hand = 22;
        env.step(ACTION_HIT);
        assert!(env.steps > 0);
        env.reset_stats();
        assert_eq!(env.steps, 0);
        assert_eq!(env.refill_count, 0);
        assert_eq!(env.house_profit, 0.0);
        assert_eq!(env.player_money, 200.0);
    }
}
