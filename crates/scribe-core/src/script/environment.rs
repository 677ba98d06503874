//! Lexical scopes.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::value::Value;

pub type Env = Rc<RefCell<Scope>>;

#[derive(Debug)]
struct Binding {
    value: Value,
    constant: bool,
}

/// One lexical scope; lookups walk the parent chain.
#[derive(Debug, Default)]
pub struct Scope {
    vars: FxHashMap<Rc<str>, Binding>,
    parent: Option<Env>,
}

/// Outcome of assigning to a name.
#[derive(Debug, PartialEq, Eq)]
pub enum AssignError {
    Undeclared,
    Constant,
}

impl Scope {
    pub fn root() -> Env {
        Rc::new(RefCell::new(Scope::default()))
    }

    pub fn child(parent: &Env) -> Env {
        Rc::new(RefCell::new(Scope {
            vars: FxHashMap::default(),
            parent: Some(parent.clone()),
        }))
    }

    /// Declare (or redeclare) a name in this scope.
    pub fn declare(&mut self, name: Rc<str>, value: Value, constant: bool) {
        self.vars.insert(name, Binding { value, constant });
    }

    pub fn declares(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }
}

pub fn lookup(env: &Env, name: &str) -> Option<Value> {
    let mut current = env.clone();
    loop {
        let next = {
            let scope = current.borrow();
            if let Some(binding) = scope.vars.get(name) {
                return Some(binding.value.clone());
            }
            scope.parent.clone()
        };
        current = next?;
    }
}

pub fn assign(env: &Env, name: &str, value: Value) -> Result<(), AssignError> {
    let mut current = env.clone();
    loop {
        let next = {
            let mut scope = current.borrow_mut();
            if let Some(binding) = scope.vars.get_mut(name) {
                if binding.constant {
                    return Err(AssignError::Constant);
                }
                binding.value = value;
                return Ok(());
            }
            scope.parent.clone()
        };
        current = next.ok_or(AssignError::Undeclared)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadowing_and_assignment() {
        let root = Scope::root();
        root.borrow_mut().declare("x".into(), Value::Number(1.0), false);
        let child = Scope::child(&root);
        child.borrow_mut().declare("y".into(), Value::Number(2.0), true);

        assert!(matches!(lookup(&child, "x"), Some(Value::Number(n)) if n == 1.0));
        assert!(lookup(&root, "y").is_none());

        assign(&child, "x", Value::Number(5.0)).unwrap();
        assert!(matches!(lookup(&root, "x"), Some(Value::Number(n)) if n == 5.0));
        assert_eq!(assign(&child, "y", Value::Null), Err(AssignError::Constant));
        assert_eq!(assign(&child, "z", Value::Null), Err(AssignError::Undeclared));
    }
}
