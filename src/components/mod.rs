//! Component capability and the built-in shapes.
//!
//! A component declares its parameters once (`parameters`), sizes its output
//! buffer once per domain (`prepare`), and then fills that buffer in place on
//! every evaluation whose inputs changed (`evaluate`). Evaluation must be a
//! pure function of the domain and the parameter values.

use std::fmt;

use crate::domain::Domain;
use crate::error::Result;
use crate::eval::Reducer;
use crate::params::ParamSlots;

pub mod shapes;

pub use shapes::*;

/// Evaluatable unit owning zero or more parameters.
pub trait Component: fmt::Debug {
    /// Short label used in reports (e.g. `"Gaussian"`).
    fn kind(&self) -> &'static str;

    /// Ordered parameter declaration with initial values and bounds.
    fn parameters(&self) -> ParamSlots;

    /// Called once at registration; returns the output buffer for `domain`.
    fn prepare(&mut self, domain: &Domain) -> Result<Vec<f64>>;

    /// Overwrite every element of `buffer`. `params` follows the order of
    /// [`Component::parameters`].
    fn evaluate(&self, buffer: &mut [f64], domain: &Domain, params: &[f64]);
}

/// Anything that can be registered under a name in a prediction unit.
pub enum Item {
    /// A bare number, wrapped into a [`Constant`] component.
    Constant(f64),
    Component(Box<dyn Component>),
    Reducer(Reducer),
}

impl Item {
    pub fn component(comp: impl Component + 'static) -> Self {
        Item::Component(Box::new(comp))
    }
}

impl From<f64> for Item {
    fn from(value: f64) -> Self {
        Item::Constant(value)
    }
}

impl From<Box<dyn Component>> for Item {
    fn from(comp: Box<dyn Component>) -> Self {
        Item::Component(comp)
    }
}

impl From<Reducer> for Item {
    fn from(reducer: Reducer) -> Self {
        Item::Reducer(reducer)
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            Item::Component(c) => f.debug_tuple("Component").field(c).finish(),
            Item::Reducer(r) => f.debug_tuple("Reducer").field(r).finish(),
        }
    }
}
