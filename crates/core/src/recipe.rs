//! Recipe model - the parametrization of one synthesis attempt.

use serde::{Deserialize, Serialize};

/// Errors raised when building or validating a recipe.
#[derive(Debug, thiserror::Error)]
pub enum RecipeError {
    /// Recipe does not match the schema
    #[error("recipe does not match schema: {0}")]
    SchemaMismatch(String),

    /// A parameter value is not a finite number
    #[error("parameter {0} is not finite")]
    NonFinite(String),
}

/// One named real-valued parameter of a recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeParam {
    /// Parameter name (e.g. a reagent pump)
    pub name: String,

    /// Parameter value
    pub value: f64,
}

/// An ordered, fixed-schema mapping of parameter names to real values.
///
/// Immutable once created; the parameter order is the order in which the
/// schema declares them and is significant for plan construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    params: Vec<RecipeParam>,
}

impl Recipe {
    /// Build a recipe from ordered (name, value) pairs.
    pub fn new(params: Vec<RecipeParam>) -> Self {
        Self { params }
    }

    /// Look up a parameter value by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.params.iter().find(|p| p.name == name).map(|p| p.value)
    }

    /// Iterate over parameters in schema order.
    pub fn params(&self) -> &[RecipeParam] {
        &self.params
    }

    /// Parameter values in schema order.
    pub fn values(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.value).collect()
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether the recipe has no parameters.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Bounds for one recipe parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamBound {
    /// Parameter name
    pub name: String,

    /// Minimum value (inclusive)
    pub min: f64,

    /// Maximum value (inclusive)
    pub max: f64,
}

/// The parameter space of an experiment: ordered names and their bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeSchema {
    /// Parameter bounds in declaration order
    pub bounds: Vec<ParamBound>,
}

impl RecipeSchema {
    /// Create a schema from ordered bounds.
    pub fn new(bounds: Vec<ParamBound>) -> Self {
        Self { bounds }
    }

    /// Number of parameters in the schema.
    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    /// Whether the schema has no parameters.
    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Build a recipe from raw values in schema order.
    ///
    /// Rejects length mismatches and non-finite values; out-of-range values
    /// are clipped to the parameter bounds.
    pub fn recipe_from_values(&self, values: &[f64]) -> Result<Recipe, RecipeError> {
        if values.len() != self.bounds.len() {
            return Err(RecipeError::SchemaMismatch(format!(
                "expected {} values, got {}",
                self.bounds.len(),
                values.len()
            )));
        }

        let mut params = Vec::with_capacity(values.len());
        for (bound, &value) in self.bounds.iter().zip(values) {
            if !value.is_finite() {
                return Err(RecipeError::NonFinite(bound.name.clone()));
            }
            params.push(RecipeParam {
                name: bound.name.clone(),
                value: value.clamp(bound.min, bound.max),
            });
        }

        Ok(Recipe::new(params))
    }

    /// Clip raw values into the schema's bounds, in place.
    pub fn clip(&self, values: &mut [f64]) {
        for (bound, value) in self.bounds.iter().zip(values.iter_mut()) {
            *value = value.clamp(bound.min, bound.max);
        }
    }

    /// Check that a recipe has exactly this schema's parameters, in order.
    pub fn validate(&self, recipe: &Recipe) -> Result<(), RecipeError> {
        if recipe.len() != self.bounds.len() {
            return Err(RecipeError::SchemaMismatch(format!(
                "expected {} parameters, got {}",
                self.bounds.len(),
                recipe.len()
            )));
        }
        for (bound, param) in self.bounds.iter().zip(recipe.params()) {
            if bound.name != param.name {
                return Err(RecipeError::SchemaMismatch(format!(
                    "expected parameter {}, got {}",
                    bound.name, param.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> RecipeSchema {
        RecipeSchema::new(vec![
            ParamBound { name: "silver".into(), min: 0.0, max: 10.0 },
            ParamBound { name: "gold".into(), min: 0.0, max: 10.0 },
        ])
    }

    #[test]
    fn recipe_from_values_clips_to_bounds() {
        let recipe = schema().recipe_from_values(&[12.0, -3.0]).unwrap();
        assert_eq!(recipe.get("silver"), Some(10.0));
        assert_eq!(recipe.get("gold"), Some(0.0));
    }

    #[test]
    fn recipe_from_values_rejects_length_mismatch() {
        assert!(schema().recipe_from_values(&[1.0]).is_err());
    }

    #[test]
    fn recipe_from_values_rejects_nan() {
        assert!(schema().recipe_from_values(&[1.0, f64::NAN]).is_err());
    }

    #[test]
    fn validate_checks_names_in_order() {
        let recipe = Recipe::new(vec![
            RecipeParam { name: "gold".into(), value: 1.0 },
            RecipeParam { name: "silver".into(), value: 1.0 },
        ]);
        assert!(schema().validate(&recipe).is_err());
    }
}
