//! Runtime values of cell script.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use super::ast::FnDecl;
use super::environment::Env;
use super::error::ScriptError;
use super::interpreter::Interpreter;

/// Signature of a function implemented in Rust.
pub type NativeFn = dyn Fn(&mut Interpreter, Vec<Value>) -> Result<Value, ScriptError>;

pub type ObjectMap = BTreeMap<Rc<str>, Value>;

/// A dynamically typed script value.
///
/// Lists and objects are shared by reference, like the values of most
/// scripting languages.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<ObjectMap>>),
    Function(Rc<Closure>),
    Native(Rc<NativeFunction>),
}

/// A user-defined function together with its defining environment.
pub struct Closure {
    pub decl: Rc<FnDecl>,
    pub env: Env,
    /// File the function was defined in.
    pub file: Rc<str>,
}

pub struct NativeFunction {
    pub name: Rc<str>,
    pub func: Box<NativeFn>,
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(s.as_ref().into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn object(fields: ObjectMap) -> Self {
        Value::Object(Rc::new(RefCell::new(fields)))
    }

    pub fn native(
        name: &str,
        func: impl Fn(&mut Interpreter, Vec<Value>) -> Result<Value, ScriptError> + 'static,
    ) -> Self {
        Value::Native(Rc::new(NativeFunction {
            name: name.into(),
            func: Box::new(func),
        }))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Object(_) => "object",
            Value::Function(_) | Value::Native(_) => "function",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Native(_))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Strict equality: by value for primitives, by identity otherwise.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Field of an object value, if present.
    pub fn get_field(&self, key: &str) -> Option<Value> {
        match self {
            Value::Object(map) => map.borrow().get(key).cloned(),
            _ => None,
        }
    }

    /// Convert to JSON for display events.
    ///
    /// Integral numbers become JSON integers; functions are rendered by name.
    /// A list or object that contains itself renders as `"[Circular]"` at the
    /// point it repeats. Output past [`JSON_MAX_DEPTH`] levels or
    /// [`RENDER_BUDGET`] nodes is elided as `"[...]"`.
    pub fn to_json(&self) -> serde_json::Value {
        self.to_json_in(&mut Walk::new(JSON_MAX_DEPTH), 0)
    }

    fn to_json_in(&self, walk: &mut Walk, depth: usize) -> serde_json::Value {
        match walk.step(self, depth) {
            Step::Render => {}
            Step::Circular => return serde_json::Value::String(CIRCULAR.to_string()),
            Step::Elided => return serde_json::Value::String("[...]".to_string()),
        }
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::List(items) => {
                walk.enter(items);
                let json = items
                    .borrow()
                    .iter()
                    .map(|v| v.to_json_in(walk, depth + 1))
                    .collect();
                walk.leave();
                serde_json::Value::Array(json)
            }
            Value::Object(map) => {
                walk.enter(map);
                let json = map
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_json_in(walk, depth + 1)))
                    .collect();
                walk.leave();
                serde_json::Value::Object(json)
            }
            Value::Function(_) | Value::Native(_) => serde_json::Value::String(self.to_string()),
        }
    }

    /// Address of the shared container behind a list or object.
    fn container(&self) -> Option<*const ()> {
        match self {
            Value::List(items) => Some(Rc::as_ptr(items).cast()),
            Value::Object(map) => Some(Rc::as_ptr(map).cast()),
            _ => None,
        }
    }
}

/// Nesting rendered by [`Value::to_json`].
pub const JSON_MAX_DEPTH: usize = 32;
/// Nesting rendered by the text form.
const DISPLAY_MAX_DEPTH: usize = 8;
/// Nodes rendered by one conversion. Shared references are rendered each
/// time they are reached, so an acyclic value can still expand exponentially.
pub const RENDER_BUDGET: usize = 100_000;
const CIRCULAR: &str = "[Circular]";

enum Step {
    Render,
    Circular,
    Elided,
}

/// State of one rendering pass over a value graph.
struct Walk {
    /// Containers being rendered, outermost first.
    path: Vec<*const ()>,
    remaining: usize,
    max_depth: usize,
}

impl Walk {
    fn new(max_depth: usize) -> Self {
        Self {
            path: Vec::new(),
            remaining: RENDER_BUDGET,
            max_depth,
        }
    }

    fn step(&mut self, value: &Value, depth: usize) -> Step {
        if self.remaining == 0 || depth > self.max_depth {
            return Step::Elided;
        }
        self.remaining -= 1;
        match value.container() {
            Some(ptr) if self.path.contains(&ptr) => Step::Circular,
            _ => Step::Render,
        }
    }

    fn enter<T>(&mut self, container: &Rc<T>) {
        self.path.push(Rc::as_ptr(container).cast());
    }

    fn leave(&mut self) {
        self.path.pop();
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    const MAX_SAFE: f64 = 9_007_199_254_740_991.0;
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    /// Text form used by `print` and string concatenation.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            other => write_nested(other, f, 0, &mut Walk::new(DISPLAY_MAX_DEPTH)),
        }
    }
}

fn write_nested(
    value: &Value,
    f: &mut fmt::Formatter<'_>,
    depth: usize,
    walk: &mut Walk,
) -> fmt::Result {
    match walk.step(value, depth) {
        Step::Render => {}
        Step::Circular => return f.write_str(CIRCULAR),
        Step::Elided => return f.write_str("..."),
    }
    match value {
        Value::Null => f.write_str("null"),
        Value::Bool(b) => write!(f, "{}", b),
        Value::Number(n) => f.write_str(&format_number(*n)),
        Value::Str(s) if depth == 0 => f.write_str(s),
        Value::Str(s) => write!(f, "{:?}", &**s),
        Value::List(items) => {
            walk.enter(items);
            f.write_str("[")?;
            for (i, item) in items.borrow().iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_nested(item, f, depth + 1, walk)?;
            }
            walk.leave();
            f.write_str("]")
        }
        Value::Object(map) => {
            let fields = map.borrow();
            if fields.is_empty() {
                return f.write_str("{}");
            }
            walk.enter(map);
            f.write_str("{ ")?;
            for (i, (key, item)) in fields.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}: ", key)?;
                write_nested(item, f, depth + 1, walk)?;
            }
            walk.leave();
            f.write_str(" }")
        }
        Value::Function(closure) => match &closure.decl.name {
            Some(name) => write!(f, "[fn {}]", name),
            None => f.write_str("[fn]"),
        },
        Value::Native(native) => write!(f, "[fn {}]", native.name),
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_nested(self, f, 1, &mut Walk::new(DISPLAY_MAX_DEPTH))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integral_numbers_are_json_integers() {
        assert_eq!(Value::Number(1.0).to_json(), serde_json::json!(1));
        assert_eq!(Value::Number(1.5).to_json(), serde_json::json!(1.5));
        assert_eq!(Value::Number(f64::NAN).to_json(), serde_json::Value::Null);
    }

    #[test]
    fn test_display_forms() {
        let list = Value::list(vec![Value::Number(1.0), Value::str("a"), Value::Null]);
        assert_eq!(list.to_string(), "[1, \"a\", null]");
        assert_eq!(Value::str("plain").to_string(), "plain");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");

        let mut fields = ObjectMap::new();
        fields.insert("x".into(), Value::Bool(true));
        assert_eq!(Value::object(fields).to_string(), "{ x: true }");
    }

    fn empty_object() -> (Value, Rc<RefCell<ObjectMap>>) {
        let map = Rc::new(RefCell::new(ObjectMap::new()));
        (Value::Object(map.clone()), map)
    }

    #[test]
    fn test_self_reference_renders_as_circular() {
        let (a, map) = empty_object();
        for key in ["x", "y", "z"] {
            map.borrow_mut().insert(key.into(), a.clone());
        }
        map.borrow_mut().insert("n".into(), Value::Number(1.0));

        assert_eq!(
            a.to_json(),
            serde_json::json!({"n": 1, "x": "[Circular]", "y": "[Circular]", "z": "[Circular]"})
        );
        assert_eq!(
            a.to_string(),
            "{ n: 1, x: [Circular], y: [Circular], z: [Circular] }"
        );

        let list = Value::list(Vec::new());
        if let Value::List(items) = &list {
            items.borrow_mut().push(Value::list(vec![list.clone()]));
        }
        assert_eq!(list.to_json(), serde_json::json!([["[Circular]"]]));
    }

    #[test]
    fn test_shared_reference_is_not_circular() {
        let (shared, map) = empty_object();
        map.borrow_mut().insert("v".into(), Value::Number(2.0));
        let pair = Value::list(vec![shared.clone(), shared]);
        assert_eq!(pair.to_json(), serde_json::json!([{"v": 2}, {"v": 2}]));
    }

    #[test]
    fn test_exponential_sharing_is_cut_off() {
        // Each level holds the previous one twice: 2^30 leaves if expanded.
        let mut value = Value::Number(0.0);
        for _ in 0..30 {
            value = Value::list(vec![value.clone(), value]);
        }
        let json = value.to_json().to_string();
        assert!(json.contains("[...]"));
        assert!(json.len() < 20 * RENDER_BUDGET);
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::str("").is_truthy());
        assert!(Value::list(vec![]).is_truthy());
    }

    #[test]
    fn test_identity_equality() {
        let a = Value::list(vec![]);
        let b = Value::list(vec![]);
        assert!(a.strict_eq(&a.clone()));
        assert!(!a.strict_eq(&b));
        assert!(Value::str("x").strict_eq(&Value::str("x")));
    }
}
