use super::Optimizer;

/// Adjusts an optimizer's learning rate between epochs.
pub trait LrScheduler {
    /// Advances the schedule by one epoch and writes the new rate into `optimizer`.
    fn step<O: Optimizer>(&mut self, optimizer: &mut O);

    fn last_epoch(&self) -> usize;
}

/// Decays the learning rate by `gamma` every epoch: `lr = base_lr * gamma ^ epoch`.
#[derive(Debug, Clone)]
pub struct ExponentialLr {
    base_lr: f32,
    gamma: f32,
    last_epoch: usize,
}

impl ExponentialLr {
    /// Creates a new `ExponentialLr` starting from the optimizer's current rate.
    ///
    /// # Arguments
    /// * `optimizer` - The optimizer whose rate is scheduled.
    /// * `gamma` - The multiplicative decay factor.
    pub fn new<O: Optimizer>(optimizer: &O, gamma: f32) -> Self {
        Self {
            base_lr: optimizer.learning_rate(),
            gamma,
            last_epoch: 0,
        }
    }

    pub fn gamma(&self) -> f32 {
        self.gamma
    }
}

impl LrScheduler for ExponentialLr {
    fn step<O: Optimizer>(&mut self, optimizer: &mut O) {
        self.last_epoch += 1;
        let lr = self.base_lr * self.gamma.powi(self.last_epoch as i32);
        optimizer.set_learning_rate(lr);
    }

    fn last_epoch(&self) -> usize {
        self.last_epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::Adam;

    #[test]
    fn decays_the_rate_geometrically() {
        let mut adam = Adam::with_defaults(1, 0.5);
        let mut scheduler = ExponentialLr::new(&adam, 0.5);

        scheduler.step(&mut adam);
        assert_eq!(adam.learning_rate(), 0.25);
        scheduler.step(&mut adam);
        assert_eq!(adam.learning_rate(), 0.125);
        assert_eq!(scheduler.last_epoch(), 2);
    }
}
