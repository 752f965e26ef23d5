//! Identifiers for parameters and components.

use std::fmt;
use std::str::FromStr;

use crate::error::FitError;

/// A parameter within a component: a name plus an index.
///
/// Index 0 is a scalar slot; indices >= 1 address entries of a vector slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId {
    pub name: String,
    pub index: usize,
}

impl ParamId {
    pub fn scalar(name: &str) -> Self {
        Self {
            name: name.to_string(),
            index: 0,
        }
    }

    pub fn indexed(name: &str, index: usize) -> Self {
        Self {
            name: name.to_string(),
            index,
        }
    }

    /// Whether `key` (`"name"` or `"name[i]"`) refers to this parameter.
    pub fn matches(&self, key: &str) -> bool {
        match split_key(key) {
            Some((name, index)) => self.name == name && self.index == index,
            None => false,
        }
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.index == 0 {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}[{}]", self.name, self.index)
        }
    }
}

impl FromStr for ParamId {
    type Err = FitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        split_key(s)
            .map(|(name, index)| ParamId::indexed(name, index))
            .ok_or_else(|| FitError::config(format!("Malformed parameter name '{s}'.")))
    }
}

/// Split `"coeff[2]"` into `("coeff", 2)` and `"norm"` into `("norm", 0)`.
fn split_key(key: &str) -> Option<(&str, usize)> {
    let key = key.trim();
    match key.find('[') {
        None if !key.is_empty() => Some((key, 0)),
        None => None,
        Some(open) => {
            let inner = key[open + 1..].strip_suffix(']')?;
            let index: usize = inner.trim().parse().ok()?;
            let name = &key[..open];
            if name.is_empty() || index == 0 {
                return None;
            }
            Some((name, index))
        }
    }
}

/// A component within the model: prediction-unit index plus component name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompId {
    pub unit: usize,
    pub name: String,
}

impl CompId {
    pub fn new(unit: usize, name: &str) -> Self {
        Self {
            unit,
            name: name.to_string(),
        }
    }
}

impl fmt::Display for CompId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]{}", self.unit, self.name)
    }
}

/// Primary key of the global parameter map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompParamId {
    pub comp: CompId,
    pub param: ParamId,
}

impl CompParamId {
    pub fn new(unit: usize, comp: &str, param: ParamId) -> Self {
        Self {
            comp: CompId::new(unit, comp),
            param,
        }
    }

    /// Parse the parameter part from `"name"` / `"name[i]"`.
    pub fn parse(unit: usize, comp: &str, param: &str) -> Result<Self, FitError> {
        Ok(Self::new(unit, comp, param.parse()?))
    }
}

impl fmt::Display for CompParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.comp, self.param)
    }
}
