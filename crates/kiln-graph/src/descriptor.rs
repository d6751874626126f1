use std::sync::Arc;

use serde::{Deserialize, Serialize};

use kiln_core::error::{KilnError, Result};
use kiln_core::traits::LanguageModel;
use kiln_core::{GlobalTable, Items, ParamValue, Parameter, ParameterStore, TypedValue};

/// Whether each input port accepts one connection or many.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arity {
    #[default]
    Single,
    Multiple,
}

/// A named input or output slot declared by a node type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
}

impl PortSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// The computation behind a leaf node type.
///
/// Returns one item list per declared output port.
pub trait Transform: Send + Sync {
    fn cook(&self, ctx: &mut CookContext<'_>) -> Result<Vec<Items>>;
}

impl<F> Transform for F
where
    F: Fn(&mut CookContext<'_>) -> Result<Vec<Items>> + Send + Sync,
{
    fn cook(&self, ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
        self(ctx)
    }
}

/// How the engine cooks nodes of a type.
#[derive(Clone)]
pub enum Behavior {
    Transform(Arc<dyn Transform>),
    /// Iterates its owned sub-network.
    Looper,
    /// Input boundary of a looper: emits the bound items and the iteration index.
    LoopInput,
    /// Output boundary of a looper: passes its input through.
    LoopOutput,
}

impl std::fmt::Debug for Behavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Behavior::Transform(_) => f.write_str("Transform"),
            Behavior::Looper => f.write_str("Looper"),
            Behavior::LoopInput => f.write_str("LoopInput"),
            Behavior::LoopOutput => f.write_str("LoopOutput"),
        }
    }
}

/// Set-time check for a parameter value, run before the store accepts it.
pub type ParamValidator = fn(&str, &ParamValue) -> Result<()>;

/// Descriptor of a node type: ports, arity, default parameters and behavior.
#[derive(Debug, Clone)]
pub struct NodeType {
    pub name: String,
    pub glyph: String,
    pub group: String,
    pub description: String,
    pub inputs: Vec<PortSpec>,
    pub outputs: Vec<PortSpec>,
    pub input_arity: Arity,
    pub parameters: Vec<Parameter>,
    /// Recook on every evaluation (external state such as files).
    pub always_dynamic: bool,
    /// Whether clients may create this type directly.
    pub creatable: bool,
    pub behavior: Behavior,
    pub validator: Option<ParamValidator>,
}

impl NodeType {
    /// A leaf type with one single-arity input and one output.
    pub fn new(name: impl Into<String>, transform: impl Transform + 'static) -> Self {
        Self::with_behavior(name, Behavior::Transform(Arc::new(transform)))
    }

    pub(crate) fn with_behavior(name: impl Into<String>, behavior: Behavior) -> Self {
        Self {
            name: name.into(),
            glyph: String::new(),
            group: "misc".to_string(),
            description: String::new(),
            inputs: vec![PortSpec::new("input")],
            outputs: vec![PortSpec::new("output")],
            input_arity: Arity::Single,
            parameters: vec![],
            always_dynamic: false,
            creatable: true,
            behavior,
            validator: None,
        }
    }

    pub fn glyph(mut self, glyph: impl Into<String>) -> Self {
        self.glyph = glyph.into();
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn inputs(mut self, names: &[&str]) -> Self {
        self.inputs = names.iter().map(|n| PortSpec::new(*n)).collect();
        self
    }

    pub fn outputs(mut self, names: &[&str]) -> Self {
        self.outputs = names.iter().map(|n| PortSpec::new(*n)).collect();
        self
    }

    pub fn arity(mut self, arity: Arity) -> Self {
        self.input_arity = arity;
        self
    }

    pub fn param(mut self, param: Parameter) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.always_dynamic = true;
        self
    }

    pub fn validator(mut self, validator: ParamValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Hide the type from client creation.
    pub fn internal(mut self) -> Self {
        self.creatable = false;
        self
    }

    pub fn is_looper(&self) -> bool {
        matches!(self.behavior, Behavior::Looper)
    }

    /// Fresh parameter store holding this type's defaults.
    pub fn instantiate_params(&self) -> ParameterStore {
        ParameterStore::new(self.parameters.clone())
    }
}

/// Everything a transform can see while cooking one node.
pub struct CookContext<'a> {
    path: &'a str,
    params: &'a ParameterStore,
    globals: &'a GlobalTable,
    /// Per input port, the items delivered by each connection in order.
    inputs: Vec<Vec<Items>>,
    requester: Option<String>,
    pressed: Vec<String>,
    loop_index: Option<i64>,
    model: Option<&'a dyn LanguageModel>,
    warnings: Vec<String>,
    used_loop_index: bool,
}

impl<'a> CookContext<'a> {
    pub fn new(
        path: &'a str,
        params: &'a ParameterStore,
        globals: &'a GlobalTable,
        inputs: Vec<Vec<Items>>,
    ) -> Self {
        Self {
            path,
            params,
            globals,
            inputs,
            requester: None,
            pressed: vec![],
            loop_index: None,
            model: None,
            warnings: vec![],
            used_loop_index: false,
        }
    }

    pub fn with_requester(mut self, requester: Option<String>) -> Self {
        self.requester = requester;
        self
    }

    pub fn with_pressed(mut self, pressed: Vec<String>) -> Self {
        self.pressed = pressed;
        self
    }

    pub fn with_loop_index(mut self, index: Option<i64>) -> Self {
        self.loop_index = index;
        self
    }

    pub fn with_model(mut self, model: Option<&'a dyn LanguageModel>) -> Self {
        self.model = model;
        self
    }

    /// Path of the node being cooked.
    pub fn path(&self) -> &str {
        self.path
    }

    /// Path of the node whose evaluation pulled this one, if any.
    pub fn requester(&self) -> Option<&str> {
        self.requester.as_deref()
    }

    /// All items arriving on an input port, concatenated in connection order.
    pub fn input(&self, port: usize) -> Items {
        self.inputs
            .get(port)
            .map(|sets| sets.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Items per connection on an input port.
    pub fn input_sets(&self, port: usize) -> &[Items] {
        self.inputs.get(port).map(|s| s.as_slice()).unwrap_or(&[])
    }

    pub fn is_connected(&self, port: usize) -> bool {
        !self.input_sets(port).is_empty()
    }

    /// Evaluate a parameter, recording any substitution warnings.
    pub fn param(&mut self, name: &str) -> Result<TypedValue> {
        let evaluated = self.params.evaluate(name, self.globals)?;
        self.warnings.extend(evaluated.warnings);
        Ok(evaluated.value)
    }

    pub fn param_str(&mut self, name: &str) -> Result<String> {
        let value = self.param(name)?;
        value
            .as_text()
            .map(str::to_string)
            .ok_or_else(|| mismatch(name, "string", &value))
    }

    pub fn param_int(&mut self, name: &str) -> Result<i64> {
        let value = self.param(name)?;
        value.as_int().ok_or_else(|| mismatch(name, "int", &value))
    }

    pub fn param_float(&mut self, name: &str) -> Result<f64> {
        let value = self.param(name)?;
        value
            .as_float()
            .ok_or_else(|| mismatch(name, "float", &value))
    }

    pub fn param_bool(&mut self, name: &str) -> Result<bool> {
        let value = self.param(name)?;
        value.as_bool().ok_or_else(|| mismatch(name, "toggle", &value))
    }

    /// A plain string parameter reads as a one-item list.
    pub fn param_list(&mut self, name: &str) -> Result<Vec<String>> {
        let value = self.param(name)?;
        value
            .as_list()
            .map(<[String]>::to_vec)
            .or_else(|| value.as_text().map(|s| vec![s.to_string()]))
            .ok_or_else(|| mismatch(name, "string_list", &value))
    }

    /// Whether a button was pressed since the last cook.
    pub fn pressed(&self, name: &str) -> bool {
        self.pressed.iter().any(|p| p == name)
    }

    /// Current loop iteration, when cooked inside a looper.
    ///
    /// Reading it marks the node as iteration-dependent, so it recooks on
    /// every later evaluation.
    pub fn iteration(&mut self) -> Option<i64> {
        self.used_loop_index = true;
        self.loop_index
    }

    pub fn model(&self) -> Result<&'a dyn LanguageModel> {
        self.model.ok_or(KilnError::NoModel)
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Consume the context, yielding the warnings and whether the loop index was read.
    pub fn finish(self) -> (Vec<String>, bool) {
        (self.warnings, self.used_loop_index)
    }
}

fn mismatch(name: &str, expected: &str, got: &TypedValue) -> KilnError {
    KilnError::InvalidParameter {
        name: name.to_string(),
        message: format!("expected {} value, got {:?}", expected, got),
    }
}
