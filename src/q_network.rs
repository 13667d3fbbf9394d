use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const LR: f32 = 1e-3;

/// One-hidden-layer Q-value network with hand-written gradients.
/// Inputs are expected pre-scaled to roughly [0,1]; the agent divides
/// observations by the environment's declared highs before they land here.
pub struct QNetwork {
    w1: Array2<f32>,
    b1: Array1<f32>,
    w2: Array2<f32>,
    b2: Array1<f32>,
    gamma: f32,
}

impl QNetwork {
    pub fn new(input_size: usize, hidden_size: usize, output_size: usize, gamma: f32) -> QNetwork {
        let mut rng = StdRng::seed_from_u64(rand::random::<u64>());
        QNetwork {
            w1: glorot(&mut rng, input_size, hidden_size),
            b1: Array1::zeros(hidden_size),
            w2: glorot(&mut rng, hidden_size, output_size),
            b2: Array1::zeros(output_size),
            gamma,
        }
    }

    fn forward(&self, x: &Array2<f32>) -> (Array2<f32>, Array2<f32>, Array2<f32>) {
        let z1 = x.dot(&self.w1) + &self.b1;
        let a1 = z1.mapv(|v| v.max(0.0));
        let q = a1.dot(&self.w2) + &self.b2;
        (z1, a1, q)
    }

    pub fn q_values(&self, obs: &[f32]) -> Vec<f32> {
        let x = Array2::from_shape_vec((1, obs.len()), obs.to_vec()).unwrap();
        let (_, _, q) = self.forward(&x);
        q.row(0).to_vec()
    }

    pub fn infer_action(&self, obs: &[f32]) -> usize {
        let values = self.q_values(obs);
        let mut best = 0;
        for (i, v) in values.iter().enumerate() {
            if *v > values[best] {
                best = i;
            }
        }
        best
    }

    /// One SGD step on the squared TD error of a sampled batch.
    /// `done` carries 0.0 for terminal transitions so the bootstrap term
    /// drops out (teacher convention). Returns the batch loss.
    pub fn train_batch(
        &mut self,
        prev_obs: &Array2<f32>,
        obs: &Array2<f32>,
        actions: &[usize],
        done: &Array1<f32>,
        rewards: &Array1<f32>,
    ) -> f32 {
        let batch = actions.len();
        let (_, _, q_next) = self.forward(obs);
        let next_max = q_next.map_axis(Axis(1), |row| {
            row.iter().cloned().fold(f32::NEG_INFINITY, f32::max)
        });
        let targets = rewards + &(next_max * done * self.gamma);

        let (z1, a1, q) = self.forward(prev_obs);
        let mut dq = Array2::<f32>::zeros(q.raw_dim());
        let mut loss = 0.0f32;
        for (i, &action) in actions.iter().enumerate() {
            let diff = q[[i, action]] - targets[i];
            loss += diff * diff;
            dq[[i, action]] = 2.0 * diff / batch as f32;
        }
        loss /= batch as f32;

        let dw2 = a1.t().dot(&dq);
        let db2 = dq.sum_axis(Axis(0));
        let mask = z1.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
        let dz1 = dq.dot(&self.w2.t()) * mask;
        let dw1 = prev_obs.t().dot(&dz1);
        let db1 = dz1.sum_axis(Axis(0));

        self.w1.scaled_add(-LR, &dw1);
        self.b1.scaled_add(-LR, &db1);
        self.w2.scaled_add(-LR, &dw2);
        self.b2.scaled_add(-LR, &db2);
        loss
    }
}

fn glorot(rng: &mut StdRng, rows: usize, cols: usize) -> Array2<f32> {
    let bound = (6.0 / (rows + cols) as f32).sqrt();
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-bound..bound))
}
