//! Evaluation engine: cached components, reducers, prediction units,
//! patch functions and the model that ties them together.

pub mod comp;
pub mod model;
pub mod patch;
pub mod reducer;
pub mod unit;

pub use comp::CompEval;
pub use model::Model;
pub use patch::{CompSlot, PatchFn, PatchView, UnitSlots};
pub use reducer::{Args, Combine, ExprFn, NamedBuffers, Reducer, ReducerEval};
pub use unit::PredictionUnit;
