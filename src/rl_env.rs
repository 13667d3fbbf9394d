/// One transition returned by `RLEnv::step`.
///
/// `terminated` marks a real episode end (the driver must call `reset`
/// before stepping again); `truncated` is carried for parity with the
/// usual gym step contract and is never set by the casino env.
pub struct StepRow {
    pub obs: Vec<f32>,
    pub reward: f32,
    pub terminated: bool,
    pub truncated: bool,
    pub info: String,
}

pub trait RLEnv {
    fn reset(&mut self) -> Vec<f32>;
    fn step(&mut self, action: usize) -> StepRow;
    fn action_space(&self) -> usize;
    fn state_space(&self) -> usize;
}
