use super::{LeakyRelu, Tanh};

#[derive(Clone, Copy, Debug)]
pub enum ActFn {
    LeakyRelu(LeakyRelu),
    Tanh(Tanh),
}

impl ActFn {
    pub fn leaky_relu(slope: f32) -> Self {
        Self::LeakyRelu(LeakyRelu::new(slope))
    }

    pub fn tanh() -> Self {
        Self::Tanh(Tanh::new())
    }

    pub fn f(&self, x: f32) -> f32 {
        match self {
            Self::LeakyRelu(a) => a.f(x),
            Self::Tanh(a) => a.f(x),
        }
    }

    pub fn df(&self, x: f32) -> f32 {
        match self {
            Self::LeakyRelu(a) => a.df(x),
            Self::Tanh(a) => a.df(x),
        }
    }
}
