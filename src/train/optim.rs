use ndarray::{ArrayD, ArrayViewMutD, Zip};

pub struct Adam {
    pub lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    step: i32,
    m: Vec<ArrayD<f32>>,
    v: Vec<ArrayD<f32>>,
}

impl Adam {
    pub fn new(lr: f32) -> Self {
        Self { lr, beta1: 0.9, beta2: 0.999, eps: 1e-8, step: 0, m: Vec::new(), v: Vec::new() }
    }

    /// One bias-corrected update. `params` and `grads` must line up.
    pub fn step(&mut self, params: Vec<ArrayViewMutD<'_, f32>>, grads: &[ArrayD<f32>]) {
        if self.m.len() != grads.len() {
            self.m = grads.iter().map(|g| ArrayD::zeros(g.raw_dim())).collect();
            self.v = grads.iter().map(|g| ArrayD::zeros(g.raw_dim())).collect();
        }
        self.step += 1;
        let bc1 = 1.0 - self.beta1.powi(self.step);
        let bc2 = 1.0 - self.beta2.powi(self.step);
        let (b1, b2, eps, lr) = (self.beta1, self.beta2, self.eps, self.lr);

        for (((mut p, g), m), v) in params.into_iter().zip(grads).zip(&mut self.m).zip(&mut self.v) {
            Zip::from(&mut p).and(g).and(m).and(v).for_each(|p, &g, m, v| {
                *m = b1 * *m + (1.0 - b1) * g;
                *v = b2 * *v + (1.0 - b2) * g * g;
                let m_hat = *m / bc1;
                let v_hat = *v / bc2;
                *p -= lr * m_hat / (v_hat.sqrt() + eps);
            });
        }
    }
}

/// Halves (by `factor`) the learning rate once the monitored loss has not
/// improved for more than `patience` epochs.
pub struct ReduceLrOnPlateau {
    factor: f32,
    patience: usize,
    threshold: f32,
    min_lr: f32,
    best: f32,
    num_bad: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(factor: f32, patience: usize) -> Self {
        Self { factor, patience, threshold: 1e-4, min_lr: 0.0, best: f32::INFINITY, num_bad: 0 }
    }

    /// Returns the new learning rate when it was reduced.
    pub fn step(&mut self, metric: f32, opt: &mut Adam) -> Option<f32> {
        if metric < self.best * (1.0 - self.threshold) {
            self.best = metric;
            self.num_bad = 0;
        } else {
            self.num_bad += 1;
        }
        if self.num_bad > self.patience {
            self.num_bad = 0;
            let new_lr = (opt.lr * self.factor).max(self.min_lr);
            if opt.lr - new_lr > 1e-12 {
                opt.lr = new_lr;
                return Some(new_lr);
            }
        }
        None
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum StopSignal {
    Improved,
    Wait(usize),
    Stop,
}

pub struct EarlyStopping {
    patience: usize,
    best: f32,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self { patience, best: f32::INFINITY, wait: 0 }
    }

    pub fn best(&self) -> f32 {
        self.best
    }

    pub fn update(&mut self, val_loss: f32) -> StopSignal {
        if val_loss < self.best {
            self.best = val_loss;
            self.wait = 0;
            return StopSignal::Improved;
        }
        self.wait += 1;
        if self.wait >= self.patience {
            StopSignal::Stop
        } else {
            StopSignal::Wait(self.wait)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    #[test]
    fn adam_first_step_moves_by_lr() {
        let mut p = array![1.0f32, -1.0, 0.5];
        let g = array![0.3f32, -2.0, 0.0].into_dyn();
        let mut opt = Adam::new(0.1);
        opt.step(vec![p.view_mut().into_dyn()], &[g]);
        // Bias correction makes the first step lr * sign(g).
        assert!((p[0] - 0.9).abs() < 1e-5);
        assert!((p[1] + 0.9).abs() < 1e-5);
        assert!((p[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn adam_minimises_quadratic() {
        let mut x = Array1::from(vec![3.0f32, -4.0]);
        let mut opt = Adam::new(0.1);
        for _ in 0..500 {
            let grad = x.mapv(|v| 2.0 * v).into_dyn();
            opt.step(vec![x.view_mut().into_dyn()], &[grad]);
        }
        assert!(x.iter().all(|v| v.abs() < 0.05), "{x:?}");
    }

    #[test]
    fn plateau_reduces_after_patience_exceeded() {
        let mut opt = Adam::new(0.0002);
        let mut sched = ReduceLrOnPlateau::new(0.5, 3);
        assert_eq!(sched.step(1.0, &mut opt), None);
        for _ in 0..3 {
            assert_eq!(sched.step(1.0, &mut opt), None);
        }
        assert_eq!(sched.step(1.0, &mut opt), Some(0.0001));
        assert!((opt.lr - 0.0001).abs() < 1e-9);
        // counter resets after a reduction
        assert_eq!(sched.step(1.0, &mut opt), None);
    }

    #[test]
    fn plateau_ignores_tiny_improvements() {
        let mut opt = Adam::new(1.0);
        let mut sched = ReduceLrOnPlateau::new(0.5, 0);
        sched.step(1.0, &mut opt);
        assert_eq!(sched.step(0.99999, &mut opt), Some(0.5));
    }

    #[test]
    fn early_stopping_counts_non_improving_epochs() {
        let mut es = EarlyStopping::new(2);
        assert_eq!(es.update(1.0), StopSignal::Improved);
        assert_eq!(es.update(1.0), StopSignal::Wait(1));
        assert_eq!(es.update(0.5), StopSignal::Improved);
        assert_eq!(es.update(0.7), StopSignal::Wait(1));
        assert_eq!(es.update(0.6), StopSignal::Stop);
        assert_eq!(es.best(), 0.5);
    }
}
