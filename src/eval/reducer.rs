//! Reducers: functions combining named component/reducer buffers into one.
//!
//! Wiring is resolved once, when the reducer is registered. A reducer that
//! slurps "everything registered so far" keeps exactly that source list even
//! if more components are added later; re-registering it under the same name
//! re-resolves the wiring.

use std::fmt;
use std::sync::Arc;

use crate::error::{FitError, Result};

/// Closure type of expression reducers.
pub type ExprFn = dyn Fn(&NamedBuffers<'_>) -> Vec<f64> + Send + Sync;

/// How source buffers are combined.
#[derive(Clone)]
pub enum Combine {
    /// Element-wise sum (a single source is passed through).
    Sum,
    /// Element-wise product (a single source is passed through).
    Product,
    /// Arbitrary expression returning a freshly computed array.
    Expr(Arc<ExprFn>),
}

impl fmt::Debug for Combine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Combine::Sum => write!(f, "Sum"),
            Combine::Product => write!(f, "Product"),
            Combine::Expr(_) => write!(f, "Expr(..)"),
        }
    }
}

/// Which buffers a reducer consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum Args {
    /// Every component and reducer registered before this reducer.
    Slurp,
    /// An explicit, ordered list of names.
    Names(Vec<String>),
}

/// A reducer declaration: a combining function plus its argument names.
#[derive(Debug, Clone)]
pub struct Reducer {
    pub combine: Combine,
    pub args: Args,
}

impl Reducer {
    pub fn sum_all() -> Self {
        Self {
            combine: Combine::Sum,
            args: Args::Slurp,
        }
    }

    pub fn sum<S: AsRef<str>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            combine: Combine::Sum,
            args: names_of(names),
        }
    }

    pub fn product_all() -> Self {
        Self {
            combine: Combine::Product,
            args: Args::Slurp,
        }
    }

    pub fn product<S: AsRef<str>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            combine: Combine::Product,
            args: names_of(names),
        }
    }

    /// Expression over an explicit list of names.
    pub fn expr<S: AsRef<str>>(
        names: impl IntoIterator<Item = S>,
        func: impl Fn(&NamedBuffers<'_>) -> Vec<f64> + Send + Sync + 'static,
    ) -> Self {
        Self {
            combine: Combine::Expr(Arc::new(func)),
            args: names_of(names),
        }
    }

    /// Expression over everything registered so far.
    pub fn expr_all(func: impl Fn(&NamedBuffers<'_>) -> Vec<f64> + Send + Sync + 'static) -> Self {
        Self {
            combine: Combine::Expr(Arc::new(func)),
            args: Args::Slurp,
        }
    }
}

fn names_of<S: AsRef<str>>(names: impl IntoIterator<Item = S>) -> Args {
    Args::Names(names.into_iter().map(|s| s.as_ref().to_string()).collect())
}

/// Ordered name → buffer mapping handed to expression reducers.
#[derive(Debug)]
pub struct NamedBuffers<'a> {
    entries: Vec<(&'a str, &'a [f64])>,
}

impl<'a> NamedBuffers<'a> {
    pub fn new(entries: Vec<(&'a str, &'a [f64])>) -> Self {
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&'a [f64]> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, buf)| *buf)
    }

    /// Buffer at argument position `i`.
    pub fn at(&self, i: usize) -> Option<&'a [f64]> {
        self.entries.get(i).map(|(_, buf)| *buf)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a [f64])> + '_ {
        self.entries.iter().copied()
    }
}

/// Resolved location of a source buffer inside a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Comp(usize),
    Reducer(usize),
}

/// A registered reducer with its resolved wiring and output buffer.
#[derive(Debug)]
pub struct ReducerEval {
    pub(crate) name: String,
    reducer: Reducer,
    sources: Vec<(String, Source)>,
    buffer: Vec<f64>,
    counter: usize,
}

impl ReducerEval {
    /// Wire `reducer` to `sources` and size its buffer from their current contents.
    pub(crate) fn new<'b>(
        name: &str,
        reducer: Reducer,
        sources: Vec<(String, Source)>,
        lookup: &dyn Fn(Source) -> &'b [f64],
    ) -> Result<Self> {
        let len = match &reducer.combine {
            Combine::Sum | Combine::Product => {
                let Some((_, first)) = sources.first() else {
                    return Err(FitError::config(format!(
                        "Reducer '{name}' has no source buffers."
                    )));
                };
                let n = lookup(*first).len();
                if let Some((src, s)) = sources.iter().find(|(_, s)| lookup(*s).len() != n) {
                    return Err(FitError::config(format!(
                        "Reducer '{name}': buffer '{src}' has length {} but '{}' has {n}.",
                        lookup(*s).len(),
                        sources[0].0
                    )));
                }
                n
            }
            Combine::Expr(func) => {
                let named = NamedBuffers::new(
                    sources
                        .iter()
                        .map(|(n, s)| (n.as_str(), lookup(*s)))
                        .collect(),
                );
                func(&named).len()
            }
        };
        Ok(Self {
            name: name.to_string(),
            reducer,
            sources,
            buffer: vec![0.0; len],
            counter: 0,
        })
    }

    /// Recompute the output buffer from the (already current) sources.
    pub(crate) fn reduce<'b>(&mut self, lookup: &dyn Fn(Source) -> &'b [f64]) -> Result<()> {
        self.counter += 1;
        match &self.reducer.combine {
            Combine::Sum => {
                let mut sources = self.sources.iter();
                if let Some((_, first)) = sources.next() {
                    self.buffer.copy_from_slice(lookup(*first));
                }
                for (_, src) in sources {
                    for (out, v) in self.buffer.iter_mut().zip(lookup(*src)) {
                        *out += v;
                    }
                }
            }
            Combine::Product => {
                let mut sources = self.sources.iter();
                if let Some((_, first)) = sources.next() {
                    self.buffer.copy_from_slice(lookup(*first));
                }
                for (_, src) in sources {
                    for (out, v) in self.buffer.iter_mut().zip(lookup(*src)) {
                        *out *= v;
                    }
                }
            }
            Combine::Expr(func) => {
                let named = NamedBuffers::new(
                    self.sources
                        .iter()
                        .map(|(n, s)| (n.as_str(), lookup(*s)))
                        .collect(),
                );
                let out = func(&named);
                if out.len() != self.buffer.len() {
                    return Err(FitError::numeric(format!(
                        "Reducer '{}' returned {} values, expected {}.",
                        self.name,
                        out.len(),
                        self.buffer.len()
                    )));
                }
                self.buffer.copy_from_slice(&out);
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn buffer(&self) -> &[f64] {
        &self.buffer
    }

    pub fn counter(&self) -> usize {
        self.counter
    }

    /// Names of the wired source buffers, in argument order.
    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|(n, _)| n.as_str())
    }

    pub(crate) fn sources(&self) -> &[(String, Source)] {
        &self.sources
    }
}
