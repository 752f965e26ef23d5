//! Prediction unit: one domain with its components and reducers.

use indexmap::IndexMap;

use crate::components::Component;
use crate::domain::Domain;
use crate::error::{FitError, Result};
use crate::eval::comp::CompEval;
use crate::eval::reducer::{Args, Reducer, ReducerEval, Source};

/// One domain plus its component and reducer evaluators.
///
/// The externally visible output is the selected reducer's buffer. A unit
/// with no reducer at all exposes the element-wise sum of its components.
#[derive(Debug)]
pub struct PredictionUnit {
    domain: Domain,
    comps: IndexMap<String, CompEval>,
    reducers: Vec<ReducerEval>,
    selected: Option<usize>,
    implicit: Vec<f64>,
}

impl PredictionUnit {
    pub fn new(domain: Domain) -> Self {
        Self {
            domain,
            comps: IndexMap::new(),
            reducers: Vec::new(),
            selected: None,
            implicit: Vec::new(),
        }
    }

    pub(crate) fn add_component(&mut self, name: &str, comp: Box<dyn Component>) -> Result<()> {
        self.check_new_name(name)?;
        if self.reducer_index(name).is_some() {
            return Err(FitError::config(format!(
                "Name '{name}' is already used by a reducer."
            )));
        }
        let ce = CompEval::new(comp, &self.domain)?;
        self.comps.insert(name.to_string(), ce);
        Ok(())
    }

    /// Register `reducer` under `name`, or re-wire the reducer already using it.
    pub(crate) fn add_reducer(&mut self, name: &str, reducer: Reducer) -> Result<()> {
        self.check_new_name(name)?;
        let pos = self.reducer_index(name).unwrap_or(self.reducers.len());
        let sources = self.resolve_sources(name, &reducer.args, pos)?;

        let comps = &self.comps;
        let done: &[ReducerEval] = &self.reducers[..pos];
        let evaluator = ReducerEval::new(name, reducer, sources, &|s| {
            source_buffer(comps, done, s)
        })?;

        if pos < self.reducers.len() {
            let old_len = self.reducers[pos].buffer().len();
            let used_later = self.reducers[pos + 1..]
                .iter()
                .any(|r| r.sources().iter().any(|(_, s)| *s == Source::Reducer(pos)));
            if used_later && evaluator.buffer().len() != old_len {
                return Err(FitError::config(format!(
                    "Re-registering reducer '{name}' changes its length from {old_len} to {}, \
                     but later reducers consume it.",
                    evaluator.buffer().len()
                )));
            }
            self.reducers[pos] = evaluator;
        } else {
            self.reducers.push(evaluator);
        }
        if self.selected.is_none() {
            self.selected = Some(pos);
        }
        Ok(())
    }

    pub(crate) fn select(&mut self, name: &str) -> Result<()> {
        let pos = self.reducer_index(name).ok_or_else(|| {
            FitError::config(format!("No reducer named '{name}' to select."))
        })?;
        self.selected = Some(pos);
        Ok(())
    }

    /// Size the implicit output. Called on every structural rebuild.
    pub(crate) fn prepare_output(&mut self) -> Result<()> {
        if !self.reducers.is_empty() {
            self.implicit.clear();
            return Ok(());
        }
        let mut lens = self.comps.iter().map(|(n, c)| (n, c.buffer().len()));
        let n = match lens.next() {
            Some((_, n)) => n,
            None => 0,
        };
        if let Some((name, len)) = lens.find(|(_, len)| *len != n) {
            return Err(FitError::config(format!(
                "Unit has no reducer and component '{name}' has length {len}, expected {n}."
            )));
        }
        self.implicit = vec![0.0; n];
        Ok(())
    }

    /// Re-run every reducer in registration order over current buffers.
    pub(crate) fn reduce(&mut self) -> Result<()> {
        if self.reducers.is_empty() {
            self.implicit.fill(0.0);
            for ce in self.comps.values() {
                for (out, v) in self.implicit.iter_mut().zip(ce.buffer()) {
                    *out += v;
                }
            }
            return Ok(());
        }
        let comps = &self.comps;
        for pos in 0..self.reducers.len() {
            let (done, rest) = self.reducers.split_at_mut(pos);
            let done: &[ReducerEval] = done;
            rest[0].reduce(&|s| source_buffer(comps, done, s))?;
        }
        Ok(())
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn comps(&self) -> &IndexMap<String, CompEval> {
        &self.comps
    }

    pub(crate) fn comps_mut(&mut self) -> &mut IndexMap<String, CompEval> {
        &mut self.comps
    }

    /// Split borrow used by the evaluation loop.
    pub(crate) fn comps_and_domain(&mut self) -> (&mut IndexMap<String, CompEval>, &Domain) {
        (&mut self.comps, &self.domain)
    }

    pub fn reducers(&self) -> &[ReducerEval] {
        &self.reducers
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.map(|i| self.reducers[i].name())
    }

    /// The unit's externally visible prediction.
    pub fn output(&self) -> &[f64] {
        match self.selected {
            Some(i) => self.reducers[i].buffer(),
            None => &self.implicit,
        }
    }

    /// Buffer of a component or reducer by name.
    pub fn buffer(&self, name: &str) -> Option<&[f64]> {
        if let Some(ce) = self.comps.get(name) {
            return Some(ce.buffer());
        }
        self.reducer_index(name).map(|i| self.reducers[i].buffer())
    }

    fn reducer_index(&self, name: &str) -> Option<usize> {
        self.reducers.iter().position(|r| r.name() == name)
    }

    fn check_new_name(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(FitError::config("Component and reducer names must be non-empty."));
        }
        if self.comps.contains_key(name) {
            return Err(FitError::config(format!(
                "Name '{name}' is already used by a component."
            )));
        }
        Ok(())
    }

    /// Resolve argument names for a reducer that will sit at position `pos`.
    fn resolve_sources(&self, name: &str, args: &Args, pos: usize) -> Result<Vec<(String, Source)>> {
        match args {
            Args::Slurp => {
                let comps = self
                    .comps
                    .keys()
                    .enumerate()
                    .map(|(i, n)| (n.clone(), Source::Comp(i)));
                let reducers = self.reducers[..pos]
                    .iter()
                    .enumerate()
                    .map(|(j, r)| (r.name().to_string(), Source::Reducer(j)));
                Ok(comps.chain(reducers).collect())
            }
            Args::Names(names) => names
                .iter()
                .map(|arg| {
                    if let Some(i) = self.comps.get_index_of(arg.as_str()) {
                        return Ok((arg.clone(), Source::Comp(i)));
                    }
                    match self.reducer_index(arg) {
                        Some(j) if j < pos => Ok((arg.clone(), Source::Reducer(j))),
                        Some(_) => Err(FitError::config(format!(
                            "Reducer '{name}' cannot consume '{arg}', which is evaluated after it."
                        ))),
                        None => Err(FitError::config(format!(
                            "Reducer '{name}' references unknown name '{arg}'."
                        ))),
                    }
                })
                .collect(),
        }
    }
}

fn source_buffer<'a>(
    comps: &'a IndexMap<String, CompEval>,
    reducers: &'a [ReducerEval],
    src: Source,
) -> &'a [f64] {
    match src {
        Source::Comp(i) => comps.get_index(i).map(|(_, c)| c.buffer()).unwrap_or(&[]),
        Source::Reducer(j) => reducers.get(j).map(|r| r.buffer()).unwrap_or(&[]),
    }
}
