//! Layered methods.
//!
//! A method is a chain of layers, the first one being the most specific
//! override. Calling a method runs its top layer; a layer reaches the layer
//! below with [`MethodCall::call_next`], at most once per invocation, which
//! gives `super` semantics across models and mixins.
//!
//! Layers share one calling convention: they receive a [`MethodCall`]
//! (records + arguments) and return an [`Arg`]. Arguments are converted
//! permissively by the `*_arg` accessors: a JSON object or a create
//! directive where a map is expected, ids where a condition or records are
//! expected.
//!
//! # Example
//!
//! ```ignore
//! registry.extend_method("User", "Write", |call| {
//!     let mut data = call.map_arg(0)?;
//!     data.insert("Name", "renamed");
//!     call.call_next_with(vec![data.into()])
//! })?;
//! ```

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

use bizorm_core::{ArgumentError, Error, FieldMap, Result, TypeError, Value};
use bizorm_query::Condition;

use crate::environment::Environment;
use crate::recordset::RecordCollection;

/// Implementation of one layer.
pub type LayerFn = Arc<dyn Fn(&MethodCall<'_>) -> Result<Arg> + Send + Sync>;

// ============================================================================
// Arguments and results
// ============================================================================

/// A method argument or result.
#[derive(Debug, Clone, Default)]
pub enum Arg {
    /// No value.
    #[default]
    Nothing,
    Value(Value),
    Map(FieldMap),
    Condition(Condition),
    Records(RecordCollection),
    Names(Vec<String>),
    /// Several results, as returned to [`RecordCollection::call_multi`].
    Multi(Vec<Arg>),
}

impl Arg {
    /// Converts a JSON value: objects become maps, anything else a value.
    pub fn from_json(json: serde_json::Value) -> Result<Arg> {
        if json.is_object() {
            return Ok(Arg::Map(FieldMap::from_json(json)?));
        }
        Ok(Arg::Value(Value::from_json(json)?))
    }

    pub fn kind(&self) -> ArgKind {
        match self {
            Arg::Nothing | Arg::Multi(_) => ArgKind::Any,
            Arg::Value(_) => ArgKind::Value,
            Arg::Map(_) => ArgKind::Map,
            Arg::Condition(_) => ArgKind::Condition,
            Arg::Records(_) => ArgKind::Records,
            Arg::Names(_) => ArgKind::Names,
        }
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, Arg::Nothing)
    }

    fn mismatch(&self, expected: &str) -> Error {
        let found = match self {
            Arg::Nothing => "nothing",
            Arg::Value(v) => v.type_name(),
            Arg::Map(_) => "map",
            Arg::Condition(_) => "condition",
            Arg::Records(_) => "records",
            Arg::Names(_) => "names",
            Arg::Multi(_) => "multiple values",
        };
        Error::Type(TypeError::new(expected, found))
    }

    pub fn as_value(&self) -> Result<Value> {
        match self {
            Arg::Nothing => Ok(Value::Null),
            Arg::Value(v) => Ok(v.clone()),
            Arg::Map(m) => Ok(Value::Create(vec![m.clone()])),
            Arg::Records(rc) => Ok(Value::Ids(rc.ids()?)),
            Arg::Names(names) => Ok(Value::List(
                names.iter().map(|n| Value::from(n.as_str())).collect(),
            )),
            other => Err(other.mismatch("value")),
        }
    }

    /// A field map; a single create directive is accepted.
    pub fn as_map(&self) -> Result<FieldMap> {
        match self {
            Arg::Map(m) => Ok(m.clone()),
            Arg::Nothing | Arg::Value(Value::Null) => Ok(FieldMap::new()),
            Arg::Value(Value::Create(maps)) if maps.len() == 1 => Ok(maps[0].clone()),
            other => Err(other.mismatch("map")),
        }
    }

    /// A condition; ids and records select those records.
    pub fn as_condition(&self) -> Result<Condition> {
        match self {
            Arg::Condition(c) => Ok(c.clone()),
            Arg::Nothing => Ok(Condition::new()),
            Arg::Records(rc) => Ok(Condition::ids(&rc.ids()?)),
            Arg::Value(v) => v
                .to_ids()
                .map(|ids| Condition::ids(&ids))
                .ok_or_else(|| self.mismatch("condition")),
            other => Err(other.mismatch("condition")),
        }
    }

    pub fn as_ids(&self) -> Result<Vec<i64>> {
        match self {
            Arg::Records(rc) => rc.ids(),
            Arg::Nothing => Ok(Vec::new()),
            Arg::Value(v) => v.to_ids().ok_or_else(|| self.mismatch("ids")),
            other => Err(other.mismatch("ids")),
        }
    }

    /// Field names; a single name or a list of texts is accepted.
    pub fn as_names(&self) -> Result<Vec<String>> {
        match self {
            Arg::Names(n) => Ok(n.clone()),
            Arg::Nothing => Ok(Vec::new()),
            Arg::Value(Value::Text(s)) => Ok(vec![s.clone()]),
            Arg::Value(Value::List(items)) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| self.mismatch("names")),
            other => Err(other.mismatch("names")),
        }
    }

    /// Records of `model`; ids are browsed in `env`.
    pub fn as_records(&self, env: &Environment, model: &str) -> Result<RecordCollection> {
        match self {
            Arg::Records(rc) => Ok(rc.clone()),
            other => Ok(env.pool(model)?.browse(&other.as_ids()?)),
        }
    }

    /// Flattens into the list returned by `call_multi`.
    pub fn into_multi(self) -> Vec<Arg> {
        match self {
            Arg::Multi(items) => items,
            Arg::Nothing => Vec::new(),
            other => vec![other],
        }
    }
}

impl From<Value> for Arg {
    fn from(v: Value) -> Self {
        Arg::Value(v)
    }
}

impl From<FieldMap> for Arg {
    fn from(m: FieldMap) -> Self {
        Arg::Map(m)
    }
}

impl From<Condition> for Arg {
    fn from(c: Condition) -> Self {
        Arg::Condition(c)
    }
}

impl From<RecordCollection> for Arg {
    fn from(rc: RecordCollection) -> Self {
        Arg::Records(rc)
    }
}

impl From<Vec<String>> for Arg {
    fn from(names: Vec<String>) -> Self {
        Arg::Names(names)
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::Value(Value::Int(v))
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::Value(Value::from(v))
    }
}

// ============================================================================
// Signatures
// ============================================================================

/// Expected shape of an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Value,
    Map,
    Condition,
    Records,
    Names,
    Any,
}

/// Expected shape of a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Nothing,
    Value,
    Map,
    Records,
    Any,
}

/// Arguments (besides the records) and result of a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub args: Vec<ArgKind>,
    pub returns: ReturnKind,
}

impl MethodSignature {
    pub fn new(args: impl Into<Vec<ArgKind>>, returns: ReturnKind) -> Self {
        Self {
            args: args.into(),
            returns,
        }
    }

    /// Compute methods: no argument, a map holding the field value.
    pub fn compute() -> Self {
        Self::new([], ReturnKind::Map)
    }

    /// Onchange methods: no argument, a map of the values to update.
    pub fn onchange() -> Self {
        Self::compute()
    }

    /// Inverse methods: the value written, nothing returned.
    pub fn inverse() -> Self {
        Self::new([ArgKind::Value], ReturnKind::Nothing)
    }

    /// Constraint methods: no argument; failing means returning an error.
    pub fn constraint() -> Self {
        Self::new([], ReturnKind::Nothing)
    }

    /// Whether a method with this signature can be wired where `expected`
    /// is required.
    pub fn satisfies(&self, expected: &MethodSignature) -> bool {
        let returns = expected.returns == ReturnKind::Any
            || self.returns == ReturnKind::Any
            || self.returns == expected.returns;
        let args = self.args.len() == expected.args.len()
            && self
                .args
                .iter()
                .zip(&expected.args)
                .all(|(a, b)| a == b || *a == ArgKind::Any || *b == ArgKind::Any);
        returns && args
    }

    pub(crate) fn check_arity(&self, model: &str, method: &str, given: usize) -> Result<()> {
        if given > self.args.len() {
            return Err(Error::Argument(ArgumentError::new(
                model,
                method,
                format!("expected {} argument(s), got {}", self.args.len(), given),
            )));
        }
        Ok(())
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:?}) -> {:?}", self.args, self.returns)
    }
}

// ============================================================================
// Methods and calls
// ============================================================================

#[derive(Clone)]
pub(crate) struct Layer {
    pub(crate) func: LayerFn,
    /// Model or mixin that declared the layer.
    pub(crate) origin: String,
    pub(crate) from_mixin: bool,
}

impl fmt::Debug for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layer")
            .field("origin", &self.origin)
            .field("from_mixin", &self.from_mixin)
            .finish_non_exhaustive()
    }
}

/// A method of a bootstrapped model.
#[derive(Debug, Clone)]
pub struct Method {
    pub(crate) model: String,
    pub(crate) name: String,
    pub(crate) signature: MethodSignature,
    /// Top (most specific) layer first.
    pub(crate) layers: Vec<Layer>,
    /// Executable without asking access control, unless sensitive.
    pub(crate) granted: bool,
}

impl Method {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    pub fn is_granted(&self) -> bool {
        self.granted
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Declaring model or mixin of each layer, top first.
    pub fn layer_origins(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.origin.as_str()).collect()
    }

    pub(crate) fn invoke(
        &self,
        records: &RecordCollection,
        layer: usize,
        args: &[Arg],
    ) -> Result<Arg> {
        let Some(l) = self.layers.get(layer) else {
            return Err(Error::Argument(ArgumentError::new(
                &self.model,
                &self.name,
                "no layer below this one",
            )));
        };
        let call = MethodCall {
            records,
            method: self,
            layer,
            args,
            next_called: Cell::new(false),
        };
        (l.func)(&call)
    }
}

/// One invocation of a method layer.
pub struct MethodCall<'a> {
    records: &'a RecordCollection,
    method: &'a Method,
    layer: usize,
    args: &'a [Arg],
    next_called: Cell<bool>,
}

impl<'a> MethodCall<'a> {
    pub fn records(&self) -> &'a RecordCollection {
        self.records
    }

    pub fn env(&self) -> &'a Environment {
        self.records.env()
    }

    pub fn method_name(&self) -> &str {
        &self.method.name
    }

    /// Model or mixin that declared the running layer.
    pub fn layer_origin(&self) -> &str {
        self.method
            .layers
            .get(self.layer)
            .map_or("", |l| l.origin.as_str())
    }

    pub fn args(&self) -> &'a [Arg] {
        self.args
    }

    /// Argument `index`; a missing trailing argument reads as nothing.
    pub fn arg(&self, index: usize) -> &'a Arg {
        const NOTHING: &Arg = &Arg::Nothing;
        self.args.get(index).unwrap_or(NOTHING)
    }

    pub fn value_arg(&self, index: usize) -> Result<Value> {
        self.arg(index).as_value()
    }

    pub fn map_arg(&self, index: usize) -> Result<FieldMap> {
        self.arg(index).as_map()
    }

    pub fn condition_arg(&self, index: usize) -> Result<Condition> {
        self.arg(index).as_condition()
    }

    pub fn names_arg(&self, index: usize) -> Result<Vec<String>> {
        self.arg(index).as_names()
    }

    pub fn records_arg(&self, index: usize, model: &str) -> Result<RecordCollection> {
        self.arg(index).as_records(self.env(), model)
    }

    /// Runs the layer below with the same arguments.
    pub fn call_next(&self) -> Result<Arg> {
        self.call_next_with(self.args.to_vec())
    }

    /// Runs the layer below with new arguments.
    pub fn call_next_with(&self, args: Vec<Arg>) -> Result<Arg> {
        self.call_next_on(self.records, args)
    }

    /// Runs the layer below on other records of the same model.
    pub fn call_next_on(&self, records: &RecordCollection, args: Vec<Arg>) -> Result<Arg> {
        if self.next_called.replace(true) {
            return Err(Error::Argument(ArgumentError::new(
                &self.method.model,
                &self.method.name,
                "the next layer may only be called once per invocation",
            )));
        }
        self.method.invoke(records, self.layer + 1, &args)
    }
}

/// Wraps a closure as a layer function.
pub(crate) fn layer_fn<F>(f: F) -> LayerFn
where
    F: Fn(&MethodCall<'_>) -> Result<Arg> + Send + Sync + 'static,
{
    Arc::new(f)
}
