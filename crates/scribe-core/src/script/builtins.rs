//! Global functions and builtin modules.

use std::time::Duration;

use super::environment::Env;
use super::error::{ScriptError, error_object};
use super::interpreter::Interpreter;
use super::value::{ObjectMap, Value};

/// Names `require` resolves without touching the filesystem.
pub const BUILTIN_MODULES: &[&str] = &["math", "json"];

/// Install the global builtins into `globals`.
///
/// `print` and `eprint` are not installed here; the embedding runtime owns
/// the output streams and defines them itself.
pub fn install(globals: &Env) {
    let mut scope = globals.borrow_mut();
    let mut define = |name: &str, value: Value| scope.declare(name.into(), value, true);

    define("len", Value::native("len", len));
    define("push", Value::native("push", push));
    define("keys", Value::native("keys", keys));
    define("str", Value::native("str", |_, args| {
        Ok(Value::str(arg(&args, 0).to_string()))
    }));
    define("Error", Value::native("Error", |_, args| {
        let message = arg(&args, 0).to_string();
        Ok(error_object("Error", &message))
    }));
    define("setTimeout", Value::native("setTimeout", set_timeout));
    define("clearTimeout", Value::native("clearTimeout", |interp, args| {
        if let Value::Number(id) = arg(&args, 0) {
            interp.clear_timeout(id as u64);
        }
        Ok(Value::Null)
    }));
    define("queueMicrotask", Value::native("queueMicrotask", |interp, args| {
        let callback = callable(&args, 0, "queueMicrotask")?;
        interp.queue_microtask(callback, Vec::new());
        Ok(Value::Null)
    }));
}

/// Exports of a builtin module, if `name` is one.
pub fn builtin_module(name: &str) -> Option<Value> {
    match name {
        "math" => Some(math_module()),
        "json" => Some(json_module()),
        _ => None,
    }
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn number(args: &[Value], index: usize, function: &str) -> Result<f64, ScriptError> {
    arg(args, index).as_number().ok_or_else(|| {
        ScriptError::type_error(format!("{}: argument {} must be a number", function, index + 1))
    })
}

fn callable(args: &[Value], index: usize, function: &str) -> Result<Value, ScriptError> {
    let value = arg(args, index);
    if value.is_callable() {
        Ok(value)
    } else {
        Err(ScriptError::type_error(format!(
            "{}: callback must be a function, got {}",
            function,
            value.type_name()
        )))
    }
}

fn len(_: &mut Interpreter, args: Vec<Value>) -> Result<Value, ScriptError> {
    let n = match arg(&args, 0) {
        Value::List(items) => items.borrow().len(),
        Value::Object(map) => map.borrow().len(),
        Value::Str(s) => s.chars().count(),
        other => {
            return Err(ScriptError::type_error(format!(
                "len: {} has no length",
                other.type_name()
            )));
        }
    };
    Ok(Value::Number(n as f64))
}

fn push(_: &mut Interpreter, args: Vec<Value>) -> Result<Value, ScriptError> {
    let mut args = args.into_iter();
    let Some(Value::List(items)) = args.next() else {
        return Err(ScriptError::type_error("push: first argument must be a list"));
    };
    let mut items = items.borrow_mut();
    items.extend(args);
    Ok(Value::Number(items.len() as f64))
}

fn keys(_: &mut Interpreter, args: Vec<Value>) -> Result<Value, ScriptError> {
    match arg(&args, 0) {
        Value::Object(map) => Ok(Value::list(
            map.borrow().keys().map(|k| Value::Str(k.clone())).collect(),
        )),
        other => Err(ScriptError::type_error(format!(
            "keys: expected an object, got {}",
            other.type_name()
        ))),
    }
}

fn set_timeout(interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, ScriptError> {
    let callback = callable(&args, 0, "setTimeout")?;
    let delay = match args.get(1) {
        Some(Value::Number(ms)) if ms.is_finite() && *ms > 0.0 => Duration::from_secs_f64(ms / 1000.0),
        _ => Duration::ZERO,
    };
    let extra = args.into_iter().skip(2).collect();
    let id = interp.set_timeout(callback, delay, extra);
    Ok(Value::Number(id as f64))
}

fn math_module() -> Value {
    fn unary(name: &'static str, f: fn(f64) -> f64) -> Value {
        Value::native(name, move |_, args| Ok(Value::Number(f(number(&args, 0, name)?))))
    }

    let mut exports = ObjectMap::new();
    exports.insert("PI".into(), Value::Number(std::f64::consts::PI));
    exports.insert("E".into(), Value::Number(std::f64::consts::E));
    exports.insert("floor".into(), unary("floor", f64::floor));
    exports.insert("ceil".into(), unary("ceil", f64::ceil));
    exports.insert("round".into(), unary("round", f64::round));
    exports.insert("abs".into(), unary("abs", f64::abs));
    exports.insert("sqrt".into(), unary("sqrt", f64::sqrt));
    exports.insert(
        "pow".into(),
        Value::native("pow", |_, args| {
            Ok(Value::Number(number(&args, 0, "pow")?.powf(number(&args, 1, "pow")?)))
        }),
    );
    exports.insert(
        "max".into(),
        Value::native("max", |_, args| {
            let mut best = f64::NEG_INFINITY;
            for i in 0..args.len() {
                best = best.max(number(&args, i, "max")?);
            }
            Ok(Value::Number(best))
        }),
    );
    exports.insert(
        "min".into(),
        Value::native("min", |_, args| {
            let mut best = f64::INFINITY;
            for i in 0..args.len() {
                best = best.min(number(&args, i, "min")?);
            }
            Ok(Value::Number(best))
        }),
    );
    Value::object(exports)
}

fn json_module() -> Value {
    let mut exports = ObjectMap::new();
    exports.insert(
        "stringify".into(),
        Value::native("stringify", |_, args| {
            let text = serde_json::to_string(&arg(&args, 0).to_json())
                .map_err(|e| ScriptError::error(e.to_string()))?;
            Ok(Value::str(text))
        }),
    );
    exports.insert(
        "parse".into(),
        Value::native("parse", |_, args| {
            let Value::Str(text) = arg(&args, 0) else {
                return Err(ScriptError::type_error("parse: expected a string"));
            };
            let json: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| ScriptError::new("SyntaxError", e.to_string()))?;
            Ok(from_json(&json))
        }),
    );
    Value::object(exports)
}

/// Convert a JSON document into script values.
pub fn from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::str(s),
        serde_json::Value::Array(items) => Value::list(items.iter().map(from_json).collect()),
        serde_json::Value::Object(map) => Value::object(
            map.iter()
                .map(|(k, v)| (k.as_str().into(), from_json(v)))
                .collect(),
        ),
    }
}
