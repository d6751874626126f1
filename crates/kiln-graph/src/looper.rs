//! Looper node types and iteration settings.
//!
//! A looper owns an input and an output boundary node. Each iteration binds
//! items to the input boundary and pulls the output boundary; the engine in
//! [`crate::engine`] drives the loop.

use kiln_core::config::EngineConfig;
use kiln_core::error::{KilnError, Result};
use kiln_core::{ParamValue, Parameter};

use crate::descriptor::{Behavior, CookContext, NodeType};

pub const LOOPER: &str = "looper";
pub const LOOP_INPUT: &str = "looper_input";
pub const LOOP_OUTPUT: &str = "looper_output";

pub fn looper_type(config: &EngineConfig) -> NodeType {
    let data_limit = i64::try_from(config.default_data_limit).unwrap_or(i64::MAX);
    NodeType::with_behavior(LOOPER, Behavior::Looper)
        .glyph("↻")
        .group("flow")
        .description("Cook the owned sub-network once per iteration of a numeric range")
        .param(Parameter::int("min", 1))
        .param(Parameter::int("max", 1))
        .param(Parameter::int("step", 1))
        .param(Parameter::toggle("max_from_input", false))
        .param(Parameter::toggle("feedback_mode", false))
        .param(Parameter::toggle("use_test", false))
        .param(Parameter::int("test_number", 1))
        .param(Parameter::toggle("cook_loops", false))
        .param(Parameter::float("timeout_limit", config.default_timeout_limit))
        .param(Parameter::int("data_limit", data_limit))
        .validator(validate_looper_param)
}

pub fn loop_input_type() -> NodeType {
    NodeType::with_behavior(LOOP_INPUT, Behavior::LoopInput)
        .glyph("→")
        .group("flow")
        .description("Items bound by the owning looper, and the iteration index")
        .inputs(&[])
        .outputs(&["items", "index"])
        .internal()
}

pub fn loop_output_type() -> NodeType {
    NodeType::with_behavior(LOOP_OUTPUT, Behavior::LoopOutput)
        .glyph("←")
        .group("flow")
        .description("Result of one iteration of the owning looper")
        .internal()
}

/// Checks the normalized value. Text that does not parse as a number (such
/// as a `$NAME` expression) is checked on evaluation instead.
fn validate_looper_param(name: &str, value: &ParamValue) -> Result<()> {
    let invalid = |message: &str| KilnError::InvalidParameter {
        name: name.to_string(),
        message: message.to_string(),
    };
    let number = match value {
        ParamValue::Int(i) => Some(*i as f64),
        ParamValue::Float(x) => Some(*x),
        ParamValue::Text(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match (name, number) {
        ("step", Some(x)) if x == 0.0 => Err(invalid("step must not be zero")),
        ("timeout_limit" | "data_limit", Some(x)) if x < 0.0 => {
            Err(invalid("limit must not be negative"))
        }
        _ => Ok(()),
    }
}

/// Evaluated looper parameters for one cook.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopSettings {
    pub min: i64,
    pub max: i64,
    pub step: i64,
    pub max_from_input: bool,
    pub feedback: bool,
    pub use_test: bool,
    pub test_number: i64,
    pub cook_loops: bool,
    /// Seconds, 0 for unlimited.
    pub timeout_limit: f64,
    /// Bytes, 0 for unlimited.
    pub data_limit: usize,
}

impl LoopSettings {
    pub fn from_context(ctx: &mut CookContext<'_>) -> Result<Self> {
        let settings = Self {
            min: ctx.param_int("min")?,
            max: ctx.param_int("max")?,
            step: ctx.param_int("step")?,
            max_from_input: ctx.param_bool("max_from_input")?,
            feedback: ctx.param_bool("feedback_mode")?,
            use_test: ctx.param_bool("use_test")?,
            test_number: ctx.param_int("test_number")?,
            cook_loops: ctx.param_bool("cook_loops")?,
            timeout_limit: ctx.param_float("timeout_limit")?.max(0.0),
            data_limit: usize::try_from(ctx.param_int("data_limit")?.max(0)).unwrap_or(usize::MAX),
        };
        if settings.step == 0 && !settings.use_test {
            return Err(KilnError::InvalidParameter {
                name: "step".to_string(),
                message: "step must not be zero".to_string(),
            });
        }
        Ok(settings)
    }

    /// The iteration indices for an upstream input of `input_len` items.
    pub fn iterations(&self, input_len: usize) -> LoopRange {
        if self.use_test {
            return LoopRange::single(self.test_number);
        }
        let max = if self.max_from_input {
            i64::try_from(input_len).unwrap_or(i64::MAX)
        } else {
            self.max
        };
        LoopRange::new(self.min, max, self.step)
    }
}

/// Inclusive range walked by `step`, downward when `step` is negative.
#[derive(Debug, Clone)]
pub struct LoopRange {
    next: Option<i64>,
    end: i64,
    step: i64,
}

impl LoopRange {
    pub fn new(start: i64, end: i64, step: i64) -> Self {
        let empty = step == 0 || (step > 0 && start > end) || (step < 0 && start < end);
        Self {
            next: if empty { None } else { Some(start) },
            end,
            step,
        }
    }

    pub fn single(index: i64) -> Self {
        Self {
            next: Some(index),
            end: index,
            step: 1,
        }
    }
}

impl Iterator for LoopRange {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        let current = self.next?;
        self.next = current.checked_add(self.step).filter(|n| {
            if self.step > 0 {
                *n <= self.end
            } else {
                *n >= self.end
            }
        });
        Some(current)
    }
}
