use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const START_TRAINING: &str = "START_TRAINING";
pub const STOP_TRAINING: &str = "STOP_TRAINING";
pub const SAVE_MODEL: &str = "SAVE_MODEL";

/// Row in the `game_configs` table. Every numeric column is nullable in
/// the store, so the accessors apply the defaults the dashboard assumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub initial_player_balance: Option<f32>,
    #[serde(default)]
    pub bet_amount: Option<f32>,
    #[serde(default)]
    pub counter_fee: Option<f32>,
    #[serde(default)]
    pub win_payout: Option<f32>,
    #[serde(default)]
    pub counter_win_payout: Option<f32>,
    #[serde(default)]
    pub dealer_stand: Option<i32>,
    #[serde(default)]
    pub total_timesteps: Option<u64>,
    #[serde(default)]
    pub max_balance_ref: Option<f32>,
    #[serde(default)]
    pub refill_penalty: Option<f32>,
}

impl GameConfig {
    pub fn initial_balance(&self) -> f32 {
        self.initial_player_balance.unwrap_or(200_000.0)
    }
    pub fn bet(&self) -> f32 {
        self.bet_amount.unwrap_or(100.0)
    }
    pub fn counter_fee(&self) -> f32 {
        self.counter_fee.unwrap_or(50.0)
    }
    pub fn win_payout(&self) -> f32 {
        self.win_payout.unwrap_or(200.0)
    }
    /// Payout applied to a win in an episode where the counter was used.
    pub fn counter_payout(&self) -> f32 {
        self.counter_win_payout.unwrap_or_else(|| self.win_payout())
    }
    pub fn dealer_stand(&self) -> i32 {
        self.dealer_stand.unwrap_or(17)
    }
    pub fn step_budget(&self) -> u64 {
        self.total_timesteps.unwrap_or(1_000_000)
    }
    /// Balance a refill restores. Clamped up to the bet so the refill
    /// invariant (balance never left below the bet) holds even for a
    /// misconfigured reference balance.
    pub fn refill_target(&self) -> f32 {
        self.max_balance_ref
            .unwrap_or_else(|| self.initial_balance())
            .max(self.bet())
    }
    pub fn refill_penalty(&self) -> f32 {
        self.refill_penalty.unwrap_or(-500.0)
    }
}

/// Row in the `system_commands` table.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemCommand {
    pub id: i64,
    pub command: String,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub processed: bool,
}

impl SystemCommand {
    pub fn config_id(&self) -> Option<i64> {
        self.payload.as_ref()?.get("config_id")?.as_i64()
    }
}

/// Telemetry snapshot inserted into `training_logs`. Fire and forget;
/// the worker never reads it back.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingLog {
    pub step: i64,
    pub house_profit: f64,
    pub player_money: f64,
    pub win_rate: f64,
    pub counter_usage: f64,
    pub refill_count: i64,
}

/// Thin Supabase REST client. All calls go through the PostgREST
/// endpoint with the anon key in both auth headers.
#[derive(Clone)]
pub struct SupabaseClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl SupabaseClient {
    pub fn new(base_url: &str, api_key: &str) -> SupabaseClient {
        SupabaseClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Result<SupabaseClient> {
        let url = std::env::var("SUPABASE_URL").context("SUPABASE_URL is not set")?;
        let key = std::env::var("SUPABASE_KEY").context("SUPABASE_KEY is not set")?;
        Ok(SupabaseClient::new(&url, &key))
    }

    pub fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", &self.api_key))
    }

    /// Query filter for the newest unprocessed command of one kind.
    /// Processed rows are excluded here, which is what makes marking a
    /// command processed idempotent from the worker's point of view.
    pub fn pending_command_query(kind: &str) -> String {
        format!(
            "select=*&processed=eq.false&command=eq.{}&order=id.desc&limit=1",
            kind
        )
    }

    pub async fn fetch_pending_command(&self, kind: &str) -> Result<Option<SystemCommand>> {
        let url = format!(
            "{}?{}",
            self.table_url("system_commands"),
            SupabaseClient::pending_command_query(kind)
        );
        let response = self.auth(self.http.get(&url)).send().await?;
        if !response.status().is_success() {
            bail!("command poll failed with status {}", response.status());
        }
        let mut rows = response.json::<Vec<SystemCommand>>().await?;
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows.remove(0)))
        }
    }

    pub async fn mark_processed(&self, command_id: i64) -> Result<()> {
        let url = format!(
            "{}?id=eq.{}",
            self.table_url("system_commands"),
            command_id
        );
        let response = self
            .auth(self.http.patch(&url))
            .header("Prefer", "return=minimal")
            .json(&json!({ "processed": true }))
            .send()
            .await?;
        if !response.status().is_success() {
            bail!(
                "marking command {} processed failed with status {}",
                command_id,
                response.status()
            );
        }
        Ok(())
    }

    pub async fn load_config(&self, config_id: i64) -> Result<Option<GameConfig>> {
        let url = format!(
            "{}?select=*&id=eq.{}&limit=1",
            self.table_url("game_configs"),
            config_id
        );
        let response = self.auth(self.http.get(&url)).send().await?;
        if !response.status().is_success() {
            bail!("config lookup failed with status {}", response.status());
        }
        let mut rows = response.json::<Vec<GameConfig>>().await?;
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows.remove(0)))
        }
    }

    pub async fn insert_training_log(&self, row: &TrainingLog) -> Result<()> {
        let url = self.table_url("training_logs");
        let response = self
            .auth(self.http.post(&url))
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("telemetry insert failed with status {}", response.status());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_cover_null_columns() {
        // Supabase returns null for unset columns, not missing keys.
        let config: GameConfig = serde_json::from_str(
            r#"{"id": 3, "bet_amount": null, "dealer_stand": 19}"#,
        )
        .unwrap();
        assert_eq!(config.bet(), 100.0);
        assert_eq!(config.initial_balance(), 200_000.0);
        assert_eq!(config.win_payout(), 200.0);
        assert_eq!(config.counter_payout(), 200.0);
        assert_eq!(config.dealer_stand(), 19);
        assert_eq!(config.step_budget(), 1_000_000);
        assert_eq!(config.refill_penalty(), -500.0);
    }

    #[test]
    fn refill_target_prefers_reference_balance() {
        let config: GameConfig = serde_json::from_str(
            r#"{"initial_player_balance": 200000.0, "max_balance_ref": 2000.0}"#,
        )
        .unwrap();
        assert_eq!(config.refill_target(), 2000.0);
    }

    #[test]
    fn refill_target_clamps_to_bet() {
        let config: GameConfig = serde_json::from_str(
            r#"{"bet_amount": 100.0, "max_balance_ref": 20.0}"#,
        )
        .unwrap();
        assert_eq!(config.refill_target(), 100.0);
    }

    #[test]
    fn command_config_id_reads_payload() {
        let cmd: SystemCommand = serde_json::from_str(
            r#"{"id": 9, "command": "START_TRAINING", "payload": {"config_id": 42}, "processed": false}"#,
        )
        .unwrap();
        assert_eq!(cmd.config_id(), Some(42));

        let bare: SystemCommand = serde_json::from_str(
            r#"{"id": 10, "command": "STOP_TRAINING", "processed": false}"#,
        )
        .unwrap();
        assert_eq!(bare.config_id(), None);
    }

    #[test]
    fn pending_query_excludes_processed_rows() {
        let q = SupabaseClient::pending_command_query(STOP_TRAINING);
        assert!(q.contains("processed=eq.false"));
        assert!(q.contains("command=eq.STOP_TRAINING"));
        assert!(q.contains("order=id.desc"));
        assert!(q.contains("limit=1"));
    }

    #[test]
    fn table_url_tolerates_trailing_slash() {
        let db = SupabaseClient::new("https://example.supabase.co/", "anon");
        assert_eq!(
            db.table_url("training_logs"),
            "https://example.supabase.co/rest/v1/training_logs"
        );
    }

    #[test]
    fn training_log_serializes_dashboard_fields() {
        let row = TrainingLog {
            step: 200,
            house_profit: -150.0,
            player_money: 420.0,
            win_rate: 12.5,
            counter_usage: 3.0,
            refill_count: 2,
        };
        let value = serde_json::to_value(&row).unwrap();
        for key in [
            "step",
            "house_profit",
            "player_money",
            "win_rate",
            "counter_usage",
            "refill_count",
        ] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
    }
}
