//! The model context owns everything the layer functions create as a side effect:
//! variables (trainable and not), summaries and weight decay losses.
//!
//! Variables are named hierarchically with scopes, similar to how we name weights
//! when exporting them (e.g. "conv1/W"). Opening a scope with reuse makes
//! `get_variable` return the existing variable instead of failing.
use std::collections::{BTreeMap, HashMap};

use log::{debug, trace};
use ndarray::ArrayD;
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand::SeedableRng;

use crate::errors::{ModelError, ModelResult};
use crate::initializers::Initializer;
use crate::summaries::Summary;
use crate::WeightPrecision;

/// Name of the collection that holds the summaries related to the model.
pub const MODEL_SUMMARIES: &str = "model_summaries";
/// Name of the collection that holds non trainable but required variables of the model.
pub const REQUIRED_NON_TRAINABLES: &str = "required_vars_collection";
/// Name of the collection that holds the weight decay terms.
pub const LOSSES: &str = "losses";

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub value: ArrayD<WeightPrecision>,
    pub trainable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Loss {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone)]
struct Scope {
    name: String,
    reuse: bool,
}

pub struct ModelContext {
    variables: Vec<Variable>,
    index: HashMap<String, usize>,
    scopes: Vec<Scope>,
    summaries: BTreeMap<String, Vec<Summary>>,
    losses: Vec<Loss>,
    required_non_trainables: Vec<String>,
    rng: StdRng,
}

impl ModelContext {
    /// Creates an empty context. Variable initialization is deterministic if a seed is given.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        ModelContext {
            variables: Vec::new(),
            index: HashMap::new(),
            scopes: Vec::new(),
            summaries: BTreeMap::new(),
            losses: Vec::new(),
            required_non_trainables: Vec::new(),
            rng,
        }
    }

    /// Full name of the current scope, empty at the top level.
    pub fn current_scope(&self) -> String {
        self.scopes
            .iter()
            .filter(|s| !s.name.is_empty())
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Prefixes name with the current scope.
    pub fn scoped_name(&self, name: &str) -> String {
        let scope = self.current_scope();
        if scope.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", scope, name)
        }
    }

    /// Runs f inside the scope `name`. Variables created in f are prefixed with it.
    pub fn scoped<T, F>(&mut self, name: &str, f: F) -> T
    where
        F: FnOnce(&mut Self) -> T,
    {
        self.with_scope(name, false, f)
    }

    /// Like [`ModelContext::scoped`], but existing variables are shared instead of
    /// rejected.
    pub fn reuse_scoped<T, F>(&mut self, name: &str, f: F) -> T
    where
        F: FnOnce(&mut Self) -> T,
    {
        self.with_scope(name, true, f)
    }

    fn with_scope<T, F>(&mut self, name: &str, reuse: bool, f: F) -> T
    where
        F: FnOnce(&mut Self) -> T,
    {
        // reuse is inherited by nested scopes
        let reuse = reuse || self.scopes.last().map_or(false, |s| s.reuse);
        self.scopes.push(Scope {
            name: name.to_string(),
            reuse,
        });
        let res = f(self);
        self.scopes.pop();
        res
    }

    fn reusing(&self) -> bool {
        self.scopes.last().map_or(false, |s| s.reuse)
    }

    /// Returns the value of the variable `name` in the current scope, creating it with
    /// the initializer if it does not exist yet.
    pub fn get_variable(
        &mut self,
        name: &str,
        shape: &[usize],
        initializer: &Initializer,
        trainable: bool,
    ) -> ModelResult<ArrayD<WeightPrecision>> {
        let full_name = self.scoped_name(name);
        if let Some(&i) = self.index.get(&full_name) {
            if !self.reusing() {
                return Err(ModelError::VariableExistsError(full_name));
            }
            let var = &self.variables[i];
            if var.value.shape() != shape {
                return Err(ModelError::InvalidShapeError(format!(
                    "variable {} has shape {:?}, requested {:?}",
                    full_name,
                    var.value.shape(),
                    shape
                )));
            }
            return Ok(var.value.clone());
        }

        let value = initializer.initialize(shape, &mut self.rng)?;
        debug!("Created variable {} with shape {:?}", full_name, shape);
        self.index.insert(full_name.clone(), self.variables.len());
        self.variables.push(Variable {
            name: full_name,
            value: value.clone(),
            trainable,
        });
        Ok(value)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.index.get(name).map(|&i| &self.variables[i])
    }

    /// Overwrites the value of an existing variable. The shape has to match.
    pub fn assign(&mut self, name: &str, value: ArrayD<WeightPrecision>) -> ModelResult<()> {
        let i = *self
            .index
            .get(name)
            .ok_or_else(|| ModelError::VariableKeyError(name.to_string()))?;
        let var = &mut self.variables[i];
        if var.value.shape() != value.shape() {
            return Err(ModelError::InvalidShapeError(format!(
                "cannot assign shape {:?} to variable {} of shape {:?}",
                value.shape(),
                name,
                var.value.shape()
            )));
        }
        var.value = value;
        Ok(())
    }

    /// All variables in creation order.
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn trainable_variables(&self) -> Vec<&Variable> {
        self.variables.iter().filter(|v| v.trainable).collect()
    }

    /// Registers a variable in the required non trainables collection.
    pub fn add_required_non_trainable(&mut self, name: &str) -> ModelResult<()> {
        if self.variable(name).is_none() {
            return Err(ModelError::VariableKeyError(name.to_string()));
        }
        if !self.required_non_trainables.iter().any(|n| n == name) {
            self.required_non_trainables.push(name.to_string());
        }
        Ok(())
    }

    pub fn required_non_trainables(&self) -> Vec<&Variable> {
        self.required_non_trainables
            .iter()
            .filter_map(|n| self.variable(n))
            .collect()
    }

    /// Every variable that has to be stored to restore the model: the trainable ones,
    /// the required non trainable ones and the variables named in addlist.
    pub fn variables_to_save(&self, addlist: &[&str]) -> ModelResult<Vec<&Variable>> {
        let mut vars = self.trainable_variables();
        vars.extend(self.required_non_trainables());
        for name in addlist {
            let var = self
                .variable(name)
                .ok_or_else(|| ModelError::VariableKeyError(name.to_string()))?;
            vars.push(var);
        }
        Ok(vars)
    }

    /// Adds summary to the model summaries collection.
    pub fn log_summary(&mut self, summary: Summary) {
        self.log_summary_to(MODEL_SUMMARIES, summary);
    }

    /// Adds summary to the collection named `collection`.
    pub fn log_summary_to(&mut self, collection: &str, summary: Summary) {
        trace!("Summary {} added to {}", summary.name(), collection);
        self.summaries
            .entry(collection.to_string())
            .or_insert_with(Vec::new)
            .push(summary);
    }

    pub fn summaries(&self, collection: &str) -> &[Summary] {
        self.summaries
            .get(collection)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Adds a term to the losses collection.
    pub fn add_loss(&mut self, name: &str, value: f64) {
        let name = self.scoped_name(name);
        self.losses.push(Loss { name, value });
    }

    pub fn losses(&self) -> &[Loss] {
        &self.losses
    }

    /// Sum of all losses in the losses collection.
    pub fn total_loss(&self) -> f64 {
        self.losses.iter().map(|l| l.value).sum()
    }
}

impl Default for ModelContext {
    fn default() -> Self {
        ModelContext::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_names() {
        let mut ctx = ModelContext::new(Some(0));
        let name = ctx.scoped("conv1", |ctx| ctx.scoped("inner", |ctx| ctx.scoped_name("W")));
        assert_eq!(name, "conv1/inner/W");
        assert_eq!(ctx.scoped_name("W"), "W");
    }

    #[test]
    fn test_variable_creation_and_reuse() {
        let mut ctx = ModelContext::new(Some(0));
        let a = ctx
            .scoped("fc", |ctx| {
                ctx.get_variable("W", &[2, 2], &Initializer::he(), true)
            })
            .unwrap();

        let dup = ctx.scoped("fc", |ctx| {
            ctx.get_variable("W", &[2, 2], &Initializer::he(), true)
        });
        assert!(matches!(dup, Err(ModelError::VariableExistsError(_))));

        let b = ctx
            .reuse_scoped("fc", |ctx| {
                ctx.get_variable("W", &[2, 2], &Initializer::Zeros, true)
            })
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(ctx.variables().len(), 1);
    }

    #[test]
    fn test_reuse_with_wrong_shape() {
        let mut ctx = ModelContext::new(Some(0));
        ctx.get_variable("b", &[3], &Initializer::Zeros, true)
            .unwrap();
        let res = ctx.reuse_scoped("", |ctx| ctx.get_variable("b", &[4], &Initializer::Zeros, true));
        assert!(res.is_err());
    }

    #[test]
    fn test_variables_to_save() {
        let mut ctx = ModelContext::new(Some(0));
        ctx.get_variable("W", &[2], &Initializer::Zeros, true)
            .unwrap();
        ctx.get_variable("moving_mean", &[2], &Initializer::Zeros, false)
            .unwrap();
        ctx.get_variable("global_step", &[], &Initializer::Zeros, false)
            .unwrap();
        ctx.add_required_non_trainable("moving_mean").unwrap();

        let names: Vec<_> = ctx
            .variables_to_save(&["global_step"])
            .unwrap()
            .iter()
            .map(|v| v.name.clone())
            .collect();
        assert_eq!(names, vec!["W", "moving_mean", "global_step"]);
        assert!(ctx.variables_to_save(&["missing"]).is_err());
    }

    #[test]
    fn test_losses() {
        let mut ctx = ModelContext::new(None);
        ctx.scoped("conv1", |ctx| ctx.add_loss("weight_loss", 0.5));
        ctx.add_loss("weight_loss", 0.25);
        assert_eq!(ctx.losses()[0].name, "conv1/weight_loss");
        assert_eq!(ctx.total_loss(), 0.75);
    }

    #[test]
    fn test_assign_checks_shape() {
        let mut ctx = ModelContext::new(Some(0));
        ctx.get_variable("v", &[2], &Initializer::Zeros, false)
            .unwrap();
        assert!(ctx.assign("v", ArrayD::ones(ndarray::IxDyn(&[3]))).is_err());
        ctx.assign("v", ArrayD::ones(ndarray::IxDyn(&[2]))).unwrap();
        assert_eq!(ctx.variable("v").unwrap().value.sum(), 2.0);
    }
}
