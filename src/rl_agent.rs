use ndarray::{Array1, Array2};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::q_network::QNetwork;

const REPLAY_CAPACITY: usize = 20_000;
const BATCH_SIZE: usize = 64;
const EPSILON_FLOOR: f32 = 0.01;
const EPSILON_DECAY: f32 = 0.999;

pub struct MemRow {
    pub done: bool,
    pub action: usize,
    pub obs: Vec<f32>,
    pub prev_obs: Vec<f32>,
    pub reward: f32,
}

impl Clone for MemRow {
    fn clone(&self) -> MemRow {
        MemRow {
            done: self.done,
            action: self.action,
            obs: self.obs.clone(),
            prev_obs: self.prev_obs.clone(),
            reward: self.reward,
        }
    }
}

impl MemRow {
    // 0.0 zeroes the bootstrap term for terminal transitions.
    pub fn get_done_as_val(&self) -> f32 {
        if self.done {
            0.0
        } else {
            1.0
        }
    }
}

/// Fixed-size ring buffer of transitions.
pub struct MemBuffer {
    data: Vec<MemRow>,
    ptr: usize,
    length: usize,
    max_size: usize,
}

impl MemBuffer {
    pub fn new(max_size: usize) -> MemBuffer {
        MemBuffer {
            data: Vec::with_capacity(max_size),
            ptr: 0,
            length: 0,
            max_size,
        }
    }

    pub fn add(&mut self, entry: &MemRow) {
        if self.ptr >= self.data.len() {
            self.data.push(entry.clone());
        } else {
            self.data[self.ptr] = entry.clone();
        }
        self.ptr += 1;
        self.length += 1;
        if self.ptr >= self.max_size {
            self.ptr = 0;
        }
        if self.length > self.max_size {
            self.length = self.max_size;
        }
    }

    pub fn get(&self, idx: usize) -> &MemRow {
        &self.data[idx]
    }

    pub fn len(&self) -> usize {
        self.length
    }
}

/// Epsilon-greedy DQN agent. Observations are divided by the declared
/// observation-space highs before hitting the network so the bankroll
/// column does not dwarf the hand values.
pub struct RLAgent {
    env_action_space: usize,
    input_size: usize,
    obs_high: Vec<f32>,
    epsilon: f32,
    memory: MemBuffer,
    net: QNetwork,
    losses: f32,
    n_losses: i64,
}

impl RLAgent {
    pub fn new(action_space: usize, input_size: usize, obs_high: Vec<f32>) -> RLAgent {
        RLAgent {
            env_action_space: action_space,
            input_size,
            obs_high,
            epsilon: 1.0,
            memory: MemBuffer::new(REPLAY_CAPACITY),
            net: QNetwork::new(input_size, 64, action_space, 0.9),
            losses: 0.0,
            n_losses: 0,
        }
    }

    fn scale(&self, obs: &[f32]) -> Vec<f32> {
        obs.iter()
            .zip(self.obs_high.iter())
            .map(|(v, high)| v / high)
            .collect()
    }

    pub fn get_mean_loss(&mut self) -> f32 {
        let mean_loss = if self.n_losses > 0 {
            self.losses / self.n_losses as f32
        } else {
            0.0
        };
        self.losses = 0.0;
        self.n_losses = 0;
        mean_loss
    }

    pub fn select_action(&mut self, observation: &[f32]) -> usize {
        let r = rand::random::<f32>();
        if r >= self.epsilon {
            self.infer_action(observation)
        } else {
            rand::thread_rng().gen_range(0..self.env_action_space)
        }
    }

    pub fn infer_action(&self, observation: &[f32]) -> usize {
        self.net.infer_action(&self.scale(observation))
    }

    pub fn remember(
        &mut self,
        done: bool,
        action: usize,
        observation: Vec<f32>,
        prev_obs: Vec<f32>,
        reward: f32,
    ) {
        self.memory.add(&MemRow {
            done,
            action,
            obs: observation,
            prev_obs,
            reward,
        });
    }

    fn get_memory_batch(
        &self,
        update_size: usize,
    ) -> (Array2<f32>, Array2<f32>, Vec<usize>, Array1<f32>, Array1<f32>) {
        let mem_len = self.memory.len();
        let mut rng = rand::thread_rng();
        let sample: Vec<usize> = (0..mem_len).collect();
        let batch_indices: Vec<usize> =
            sample.choose_multiple(&mut rng, update_size).cloned().collect();
        let n = self.input_size;
        let mut done_vec: Vec<f32> = Vec::with_capacity(update_size);
        let mut action_vec: Vec<usize> = Vec::with_capacity(update_size);
        let mut reward_vec: Vec<f32> = Vec::with_capacity(update_size);
        let mut obs_vec: Vec<f32> = Vec::with_capacity(update_size * n);
        let mut prev_obs_vec: Vec<f32> = Vec::with_capacity(update_size * n);
        for index in batch_indices {
            let row = self.memory.get(index);
            done_vec.push(row.get_done_as_val());
            action_vec.push(row.action);
            reward_vec.push(row.reward);
            obs_vec.extend(self.scale(&row.obs));
            prev_obs_vec.extend(self.scale(&row.prev_obs));
        }
        let obs_array = Array2::from_shape_vec((update_size, n), obs_vec).unwrap();
        let prev_obs_array = Array2::from_shape_vec((update_size, n), prev_obs_vec).unwrap();
        let done_array = Array1::from_vec(done_vec);
        let reward_array = Array1::from_vec(reward_vec);
        (prev_obs_array, obs_array, action_vec, done_array, reward_array)
    }

    pub fn experience_replay(&mut self) {
        if self.memory.len() < BATCH_SIZE {
            return;
        }
        let (prev_obs, obs, actions, done, rewards) = self.get_memory_batch(BATCH_SIZE);
        let loss = self.net.train_batch(&prev_obs, &obs, &actions, &done, &rewards);
        self.losses += loss;
        self.n_losses += 1;
        if self.epsilon > EPSILON_FLOOR {
            self.epsilon *= EPSILON_DECAY;
        }
    }
}
