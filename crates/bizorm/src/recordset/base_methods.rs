//! CRUD methods of the `BaseMixin`.
//!
//! Every model inherits these layers; overrides reach them through
//! `call_next`.

use bizorm_core::Value;

use crate::methods::{Arg, ArgKind, MethodSignature, ReturnKind, layer_fn};
use crate::registry::Registry;

use super::{copy, create, load, onchange, unlink, write};

pub(crate) fn declare(registry: &mut Registry) {
    registry.declare_builtin(
        "Load",
        MethodSignature::new([ArgKind::Names], ReturnKind::Records),
        layer_fn(|call| {
            let fields = call.names_arg(0)?;
            Ok(Arg::Records(load::load(call.records(), &fields)?))
        }),
    );
    registry.declare_builtin(
        "Create",
        MethodSignature::new([ArgKind::Map], ReturnKind::Records),
        layer_fn(|call| Ok(Arg::Records(create::create(call.records(), call.map_arg(0)?)?))),
    );
    registry.declare_builtin(
        "Write",
        MethodSignature::new([ArgKind::Map], ReturnKind::Nothing),
        layer_fn(|call| {
            write::write(call.records(), call.map_arg(0)?)?;
            Ok(Arg::Nothing)
        }),
    );
    registry.declare_builtin(
        "Unlink",
        MethodSignature::new([], ReturnKind::Value),
        layer_fn(|call| {
            let deleted = unlink::unlink(call.records())?;
            Ok(Arg::Value(Value::Int(i64::try_from(deleted).unwrap_or(i64::MAX))))
        }),
    );
    registry.declare_builtin(
        "Copy",
        MethodSignature::new([ArgKind::Map], ReturnKind::Records),
        layer_fn(|call| Ok(Arg::Records(copy::copy(call.records(), call.map_arg(0)?)?))),
    );
    registry.declare_builtin(
        "Onchange",
        MethodSignature::new([ArgKind::Map, ArgKind::Names], ReturnKind::Map),
        layer_fn(|call| {
            let fields = call.names_arg(1)?;
            Ok(Arg::Map(onchange::onchange(call.records(), call.map_arg(0)?, &fields)?))
        }),
    );
}
