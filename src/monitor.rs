use crate::casino_env::CasinoEnv;
use crate::control::SharedFlags;
use crate::db_access::{SupabaseClient, TrainingLog, SAVE_MODEL, STOP_TRAINING};

pub const DB_CHECK_INTERVAL: u64 = 500;
pub const SYNC_INTERVAL: u64 = 200;

/// Per-step training hook. Order matters: the in-process stop flag is
/// checked on every step before anything that can touch the network, so
/// a local stop is honored even when the store is unreachable.
pub struct TrainingMonitor {
    pub flags: SharedFlags,
    pub db: SupabaseClient,
    pub db_check_interval: u64,
    pub sync_interval: u64,
    pub last_db_check: u64,
    pub last_sync: u64,
}

impl TrainingMonitor {
    pub fn new(db: SupabaseClient, flags: SharedFlags) -> TrainingMonitor {
        TrainingMonitor {
            flags,
            db,
            db_check_interval: DB_CHECK_INTERVAL,
            sync_interval: SYNC_INTERVAL,
            last_db_check: 0,
            last_sync: 0,
        }
    }

    /// Returns false when the optimizer should halt. Store failures in
    /// the polling and telemetry branches are logged and swallowed.
    pub async fn on_step(&mut self, num_timesteps: u64, env: &CasinoEnv) -> bool {
        if self.flags.stop_requested() {
            log::warn!("stop signal received via control flags, terminating loop");
            return false;
        }

        if num_timesteps - self.last_db_check >= self.db_check_interval {
            self.last_db_check = num_timesteps;
            if self.poll_remote_commands().await {
                return false;
            }
        }

        if num_timesteps - self.last_sync >= self.sync_interval {
            self.last_sync = num_timesteps;
            self.sync_to_dashboard(num_timesteps, env).await;
        }
        true
    }

    /// True when a remote stop was found. The command is marked processed
    /// before halting so a restarted session does not consume it again.
    async fn poll_remote_commands(&self) -> bool {
        match self.db.fetch_pending_command(STOP_TRAINING).await {
            Ok(Some(cmd)) => {
                log::warn!("stop signal found in command store (command {})", cmd.id);
                if let Err(e) = self.db.mark_processed(cmd.id).await {
                    log::error!("failed to mark stop command processed: {:#}", e);
                }
                return true;
            }
            Ok(None) => {}
            Err(e) => {
                log::error!("command store poll failed: {:#}", e);
                return false;
            }
        }

        // Snapshot uploads are handled elsewhere; acknowledge so the
        // dashboard's request does not sit unprocessed forever.
        match self.db.fetch_pending_command(SAVE_MODEL).await {
            Ok(Some(cmd)) => {
                log::info!("model snapshot requested (command {}), acknowledging", cmd.id);
                if let Err(e) = self.db.mark_processed(cmd.id).await {
                    log::error!("failed to mark snapshot command processed: {:#}", e);
                }
            }
            Ok(None) => {}
            Err(e) => log::error!("command store poll failed: {:#}", e),
        }
        false
    }

    async fn sync_to_dashboard(&self, num_timesteps: u64, env: &CasinoEnv) {
        let row = snapshot(num_timesteps, env);
        if let Err(e) = self.db.insert_training_log(&row).await {
            log::error!("telemetry insert failed: {:#}", e);
        }
    }
}

pub fn snapshot(num_timesteps: u64, env: &CasinoEnv) -> TrainingLog {
    TrainingLog {
        step: num_timesteps as i64,
        house_profit: env.house_profit as f64,
        player_money: env.player_money as f64,
        win_rate: env.win_rate() as f64,
        counter_usage: env.counter_usage() as f64,
        refill_count: env.refill_count as i64,
    }
}
