use anyhow::{Context, Result};
use tokio::time::{sleep, Duration};

use crate::casino_env::{CasinoEnv, OBS_HIGH};
use crate::control::SharedFlags;
use crate::db_access::{SupabaseClient, START_TRAINING};
use crate::monitor::TrainingMonitor;
use crate::rl_agent::RLAgent;
use crate::rl_env::RLEnv;

mod casino_env;
mod control;
mod db_access;
mod monitor;
mod q_network;
mod rl_agent;
mod rl_env;
mod server;

const POLL_DELAY_SECS: u64 = 5;
const DEFAULT_CONTROL_PORT: u16 = 5000;

#[tokio::main]
async fn main() {
    env_logger::init();
    let db = match SupabaseClient::from_env() {
        Ok(db) => db,
        Err(e) => {
            log::error!("cannot start worker: {:#}", e);
            std::process::exit(1);
        }
    };
    let flags = SharedFlags::new();
    let port = control_port();
    tokio::spawn(server::run_control_server(flags.clone(), port));

    log::info!("training worker initialized, polling every {}s", POLL_DELAY_SECS);
    loop {
        process_signals(&db, &flags).await;
        sleep(Duration::from_secs(POLL_DELAY_SECS)).await;
    }
}

fn control_port() -> u16 {
    std::env::var("CONTROL_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_CONTROL_PORT)
}

/// One orchestrator cycle: claim a start signal delivered over HTTP if
/// one is pending, otherwise poll the command store. Either way at most
/// one session runs before control returns to the outer loop.
async fn process_signals(db: &SupabaseClient, flags: &SharedFlags) {
    if let Some(config_id) = flags.claim_config() {
        run_training_cycle(db, flags, config_id).await;
        return;
    }

    match db.fetch_pending_command(START_TRAINING).await {
        Ok(Some(cmd)) => {
            // Acknowledge before training starts: at most once, even if
            // the session below dies.
            if let Err(e) = db.mark_processed(cmd.id).await {
                log::error!("failed to mark start command processed: {:#}", e);
                return;
            }
            match cmd.config_id() {
                Some(config_id) => run_training_cycle(db, flags, config_id).await,
                None => log::warn!("start command {} carried no config_id, ignored", cmd.id),
            }
        }
        Ok(None) => {}
        Err(e) => log::error!("command store poll failed: {:#}", e),
    }
}

/// Runs one session and guarantees the flags end cleared whatever
/// happened inside.
async fn run_training_cycle(db: &SupabaseClient, flags: &SharedFlags, config_id: i64) {
    flags.set_active(true);
    if let Err(e) = train_session(db, flags, config_id).await {
        log::error!("training session for config {} failed: {:#}", config_id, e);
    }
    flags.clear_session();
}

async fn train_session(db: &SupabaseClient, flags: &SharedFlags, config_id: i64) -> Result<()> {
    log::info!("loading config {}", config_id);
    let config = db
        .load_config(config_id)
        .await
        .context("config lookup failed")?;
    let Some(config) = config else {
        log::warn!("config {} not found, session aborted", config_id);
        return Ok(());
    };

    let total_steps = config.step_budget();
    let mut env = CasinoEnv::new(config);
    let mut agent = RLAgent::new(env.action_space(), env.state_space(), OBS_HIGH.to_vec());
    let mut monitor = TrainingMonitor::new(db.clone(), flags.clone());

    log::info!("training active for {} steps", total_steps);
    let mut observation = env.reset();
    for t in 1..=total_steps {
        let action = agent.select_action(&observation);
        let prev_obs = observation.clone();
        let steprow = env.step(action);
        agent.remember(steprow.terminated, action, steprow.obs.clone(), prev_obs, steprow.reward);
        agent.experience_replay();
        observation = if steprow.terminated {
            env.reset()
        } else {
            steprow.obs
        };
        if !monitor.on_step(t, &env).await {
            log::info!("training halted at step {}", t);
            return Ok(());
        }
        if t % 10_000 == 0 {
            log::info!(
                "step {}: loss={:.4}, house_profit={:.1}, win_rate={:.1}%",
                t,
                agent.get_mean_loss(),
                env.house_profit,
                env.win_rate()
            );
        }
    }
    log::info!("training session ended after {} steps", total_steps);
    Ok(())
}
