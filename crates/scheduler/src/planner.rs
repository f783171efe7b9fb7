//! Recipe to command-plan translation.
//!
//! The plan shape mirrors the physical protocol: reagents are dispensed one
//! after another (the pumps share a manifold, so dispenses never overlap),
//! then the vial is stirred, left to settle, and moved to the sampling
//! position on the wheel.

use serde::{Deserialize, Serialize};
use serde_json::json;
use synthq_core::{CommandStep, Plan, Recipe};

/// Assignment of one recipe parameter to a reagent pump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpChannel {
    /// Recipe parameter dispensed by this pump
    pub param: String,

    /// Device link the pump is driven over
    pub link: String,
}

/// Physical layout of the rig: pump assignments and shared actuators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceLayout {
    /// Pump channel per recipe parameter
    pub pumps: Vec<PumpChannel>,

    /// Link driving the vial stirrer
    pub stirrer_link: String,

    /// Link driving the sample wheel
    pub wheel_link: String,

    /// Stir rate used while the reaction develops
    pub stir_rate: f64,

    /// Settling time after stirring, in seconds
    pub settle_secs: u64,
}

impl DeviceLayout {
    /// Link of the pump assigned to a recipe parameter.
    pub fn pump_link(&self, param: &str) -> Option<&str> {
        self.pumps
            .iter()
            .find(|p| p.param == param)
            .map(|p| p.link.as_str())
    }
}

/// Error raised when a recipe names a parameter the layout cannot dispense.
#[derive(Debug, thiserror::Error)]
#[error("no pump assigned to parameter '{0}'")]
pub struct LayoutError(pub String);

/// Translate a recipe into the command plan that synthesizes it.
///
/// Deterministic: the same recipe and layout always produce the same plan.
/// Step order is the recipe's parameter order followed by the fixed
/// stir/settle/wheel tail.
pub fn build_plan(recipe: &Recipe, layout: &DeviceLayout) -> Result<Plan, LayoutError> {
    let mut plan = Plan::new();

    let mut dispenses = Vec::with_capacity(recipe.len());
    let mut previous: Option<usize> = None;
    for param in recipe.params() {
        let link = layout
            .pump_link(&param.name)
            .ok_or_else(|| LayoutError(param.name.clone()))?;
        let step = CommandStep::new(
            "dispense",
            link,
            json!({ "pump": param.name, "volume": param.value }),
        )
        .after(previous);
        let index = plan.push(step);
        dispenses.push(index);
        previous = Some(index);
    }

    // Stirring starts only once every reagent is in the vial.
    let stir_on = plan.push(
        CommandStep::new(
            "set_stir_rate",
            layout.stirrer_link.as_str(),
            json!({ "rate": layout.stir_rate }),
        )
        .after(dispenses.iter().copied()),
    );
    let settle = plan.push(
        CommandStep::new(
            "settle",
            layout.stirrer_link.as_str(),
            json!({ "seconds": layout.settle_secs }),
        )
        .after([stir_on]),
    );
    let stir_off = plan.push(
        CommandStep::new(
            "set_stir_rate",
            layout.stirrer_link.as_str(),
            json!({ "rate": 0.0 }),
        )
        .after([settle]),
    );
    plan.push(
        CommandStep::new(
            "turn_wheel",
            layout.wheel_link.as_str(),
            json!({ "positions": 1 }),
        )
        .after([stir_off]),
    );

    Ok(plan)
}
