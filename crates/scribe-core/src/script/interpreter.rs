//! Tree-walking interpreter for cell script.
//!
//! The interpreter is single-threaded. Deferred work goes through the
//! [`Scheduler`]; the embedding runtime decides when to run it by calling
//! [`Interpreter::run_ready`].

use std::rc::Rc;
use std::time::{Duration, Instant};

use super::ast::{BinaryOp, Block, Expr, FnDecl, Literal, LogicalOp, Pos, Program, Stmt, UnaryOp};
use super::builtins;
use super::environment::{self, AssignError, Env, Scope};
use super::error::{ScriptError, StackFrame};
use super::scheduler::{AsyncHook, AsyncId, ROOT_CONTEXT, ResourceKind, Scheduler, Task};
use super::value::{Closure, ObjectMap, Value};

/// File name reported for frames of Rust-implemented functions.
pub const NATIVE_FILE: &str = "native";

const ANONYMOUS: &str = "<anonymous>";
const TOP_LEVEL: &str = "<top-level>";
/// Nested calls of script functions allowed before a `RangeError`. Native
/// frames and scaffold calls are not counted.
const MAX_CALL_DEPTH: usize = 100;
/// Loop iterations between deadline checks.
const DEADLINE_STRIDE: u32 = 1024;

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

struct Frame {
    function: Rc<str>,
    file: Rc<str>,
    counted: bool,
}

pub struct Interpreter {
    globals: Env,
    frames: Vec<Frame>,
    /// `call_sites[i]` is where frame `i` called frame `i + 1`.
    call_sites: Vec<Pos>,
    /// Frames that count toward [`MAX_CALL_DEPTH`].
    depth: usize,
    scheduler: Scheduler,
    hooks: Vec<Box<dyn AsyncHook>>,
    current: AsyncId,
    next_id: AsyncId,
    deadline: Option<Instant>,
    ticks: u32,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// Create an interpreter with the builtin globals installed.
    pub fn new() -> Self {
        let globals = Scope::root();
        builtins::install(&globals);
        Self {
            globals,
            frames: Vec::new(),
            call_sites: Vec::new(),
            depth: 0,
            scheduler: Scheduler::default(),
            hooks: Vec::new(),
            current: ROOT_CONTEXT,
            next_id: ROOT_CONTEXT + 1,
            deadline: None,
            ticks: 0,
        }
    }

    pub fn globals(&self) -> &Env {
        &self.globals
    }

    pub fn define_global(&mut self, name: &str, value: Value) {
        self.globals.borrow_mut().declare(name.into(), value, true);
    }

    pub fn add_hook(&mut self, hook: Box<dyn AsyncHook>) {
        self.hooks.push(hook);
    }

    /// Abort execution with [`ScriptError::time_limit`] once `deadline`
    /// passes. Checked on loop iterations and function calls.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Execute a program in a fresh scope below the globals and return that
    /// scope.
    pub fn run_program(&mut self, program: &Program, file: &str) -> Result<Env, ScriptError> {
        let env = Scope::child(&self.globals);
        self.run_program_in(program, file, &env)?;
        Ok(env)
    }

    /// Execute a program in a caller-provided scope.
    pub fn run_program_in(
        &mut self,
        program: &Program,
        file: &str,
        env: &Env,
    ) -> Result<(), ScriptError> {
        self.enter_frame(TOP_LEVEL.into(), file.into(), Pos::default(), false);
        let result = self.exec_block(&program.body, env);
        self.leave_frame();
        result.map(|_| ())
    }

    /// Call a function value from Rust.
    pub fn invoke(&mut self, callee: &Value, args: Vec<Value>) -> Result<Value, ScriptError> {
        self.call_value(callee, args, Pos::default())
    }

    /// Call a function value from Rust without charging its frame to the
    /// call depth. For wrappers emitted around user code, such as cell
    /// bodies, whose nesting grows with the program rather than with
    /// recursion.
    pub fn invoke_scaffold(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
    ) -> Result<Value, ScriptError> {
        self.call_frame(callee, args, Pos::default(), false)
    }

    // === Async contexts ===

    pub fn current_context(&self) -> AsyncId {
        self.current
    }

    /// Create an async resource triggered by the current context.
    pub fn create_resource(&mut self, kind: ResourceKind) -> AsyncId {
        let id = self.next_id;
        self.next_id += 1;
        let trigger = self.current;
        for hook in &mut self.hooks {
            hook.init(id, kind, trigger);
        }
        id
    }

    pub fn destroy_resource(&mut self, id: AsyncId) {
        for hook in &mut self.hooks {
            hook.destroy(id);
        }
    }

    /// Make `id` the current context, returning the previous one.
    pub fn enter_context(&mut self, id: AsyncId) -> AsyncId {
        std::mem::replace(&mut self.current, id)
    }

    pub fn restore_context(&mut self, previous: AsyncId) {
        self.current = previous;
    }

    pub fn set_timeout(&mut self, callback: Value, delay: Duration, args: Vec<Value>) -> AsyncId {
        let id = self.create_resource(ResourceKind::Timeout);
        self.scheduler.push_timer(id, delay, Task { callback, args });
        id
    }

    pub fn queue_microtask(&mut self, callback: Value, args: Vec<Value>) -> AsyncId {
        let id = self.create_resource(ResourceKind::Microtask);
        self.scheduler.push_microtask(id, Task { callback, args });
        id
    }

    pub fn clear_timeout(&mut self, id: AsyncId) {
        if self.scheduler.cancel(id) {
            self.destroy_resource(id);
        }
    }

    /// Run continuations that are ready now, at most `budget` of them.
    ///
    /// Each continuation runs in its own context and is destroyed once its
    /// callback returns. The first uncaught error stops the tick.
    pub fn run_ready(&mut self, budget: usize) -> Result<usize, ScriptError> {
        let mut ran = 0;
        while ran < budget {
            let Some((id, task)) = self.scheduler.pop_ready(Instant::now()) else {
                break;
            };
            let previous = self.enter_context(id);
            let result = self.invoke(&task.callback, task.args);
            self.restore_context(previous);
            self.destroy_resource(id);
            result?;
            ran += 1;
        }
        Ok(ran)
    }

    // === Frames and errors ===

    fn enter_frame(&mut self, function: Rc<str>, file: Rc<str>, call_site: Pos, counted: bool) {
        if !self.frames.is_empty() {
            self.call_sites.push(call_site);
        }
        if counted {
            self.depth += 1;
        }
        self.frames.push(Frame {
            function,
            file,
            counted,
        });
    }

    fn leave_frame(&mut self) {
        if let Some(frame) = self.frames.pop() {
            if frame.counted {
                self.depth -= 1;
            }
        }
        if !self.frames.is_empty() {
            self.call_sites.pop();
        }
    }

    fn current_file(&self) -> Rc<str> {
        self.frames
            .last()
            .map(|f| f.file.clone())
            .unwrap_or_else(|| NATIVE_FILE.into())
    }

    fn capture_stack(&self, pos: Pos) -> Vec<StackFrame> {
        let Some(top) = self.frames.len().checked_sub(1) else {
            return vec![StackFrame {
                function: ANONYMOUS.into(),
                file: NATIVE_FILE.into(),
                pos,
            }];
        };
        let mut stack = Vec::with_capacity(self.frames.len());
        stack.push(StackFrame {
            function: self.frames[top].function.clone(),
            file: self.frames[top].file.clone(),
            pos,
        });
        for i in (0..top).rev() {
            stack.push(StackFrame {
                function: self.frames[i].function.clone(),
                file: self.frames[i].file.clone(),
                pos: self.call_sites[i],
            });
        }
        stack
    }

    fn check_deadline(&mut self, pos: Pos) -> Result<(), ScriptError> {
        let Some(deadline) = self.deadline else {
            return Ok(());
        };
        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks % DEADLINE_STRIDE == 0 && Instant::now() >= deadline {
            return Err(self.fail(ScriptError::time_limit(), pos));
        }
        Ok(())
    }

    /// Attach location, stack and context to an error that has none yet.
    fn fail(&self, mut err: ScriptError, pos: Pos) -> ScriptError {
        if !err.is_attached() {
            err.stack = self.capture_stack(pos);
            err.context = self.current;
        }
        err
    }

    // === Statements ===

    fn exec_block(&mut self, block: &Block, env: &Env) -> Result<Flow, ScriptError> {
        for stmt in block {
            if let Stmt::Fn(decl) = stmt {
                let closure = self.closure(decl, env);
                if let Some(name) = &decl.name {
                    env.borrow_mut().declare(name.clone(), closure, false);
                }
            }
        }
        for stmt in block {
            match self.exec_stmt(stmt, env)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, env: &Env) -> Result<Flow, ScriptError> {
        match stmt {
            Stmt::Let {
                name,
                init,
                constant,
                ..
            } => {
                let value = match init {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::Null,
                };
                env.borrow_mut().declare(name.clone(), value, *constant);
                Ok(Flow::Normal)
            }
            Stmt::Fn(_) | Stmt::Empty => Ok(Flow::Normal),
            Stmt::Expr(expr) => {
                self.eval(expr, env)?;
                Ok(Flow::Normal)
            }
            Stmt::Return(value, _) => {
                let value = match value {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond, env)?.is_truthy() {
                    self.exec_block(then, &Scope::child(env))
                } else if let Some(otherwise) = otherwise {
                    self.exec_block(otherwise, &Scope::child(env))
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { cond, body } => {
                while self.eval(cond, env)?.is_truthy() {
                    self.check_deadline(cond.pos())?;
                    match self.exec_block(body, &Scope::child(env))? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Break(_) => Ok(Flow::Break),
            Stmt::Continue(_) => Ok(Flow::Continue),
            Stmt::Throw(expr, pos) => {
                let value = self.eval(expr, env)?;
                Err(self.fail(ScriptError::thrown(value), *pos))
            }
            Stmt::Try {
                body,
                binding,
                handler,
            } => match self.exec_block(body, &Scope::child(env)) {
                Err(err) if !err.interrupted => {
                    let handler_env = Scope::child(env);
                    if let Some(name) = binding {
                        handler_env
                            .borrow_mut()
                            .declare(name.clone(), err.value, false);
                    }
                    self.exec_block(handler, &handler_env)
                }
                result => result,
            },
            Stmt::Block(block) => self.exec_block(block, &Scope::child(env)),
            Stmt::Import {
                binding,
                module,
                pos,
            } => {
                let require = environment::lookup(env, "require").ok_or_else(|| {
                    self.fail(ScriptError::reference_error("require is not defined"), *pos)
                })?;
                let exports = self.call_value(&require, vec![Value::str(module)], *pos)?;
                if let Some(name) = binding {
                    env.borrow_mut().declare(name.clone(), exports, true);
                }
                Ok(Flow::Normal)
            }
        }
    }

    fn closure(&self, decl: &Rc<FnDecl>, env: &Env) -> Value {
        Value::Function(Rc::new(Closure {
            decl: decl.clone(),
            env: env.clone(),
            file: self.current_file(),
        }))
    }

    // === Expressions ===

    fn eval(&mut self, expr: &Expr, env: &Env) -> Result<Value, ScriptError> {
        match expr {
            Expr::Literal(literal, _) => Ok(match literal {
                Literal::Null => Value::Null,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Number(n) => Value::Number(*n),
                Literal::Str(s) => Value::Str(s.clone()),
            }),
            Expr::Ident(name, pos) => environment::lookup(env, name).ok_or_else(|| {
                self.fail(
                    ScriptError::reference_error(format!("{} is not defined", name)),
                    *pos,
                )
            }),
            Expr::List(items, _) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, env)?);
                }
                Ok(Value::list(values))
            }
            Expr::Object(fields, _) => {
                let mut map = ObjectMap::new();
                for (key, value) in fields {
                    let value = self.eval(value, env)?;
                    map.insert(key.clone(), value);
                }
                Ok(Value::object(map))
            }
            Expr::Unary { op, expr, pos } => {
                let value = self.eval(expr, env)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOp::Neg => match value {
                        Value::Number(n) => Ok(Value::Number(-n)),
                        other => Err(self.fail(
                            ScriptError::type_error(format!("cannot negate {}", other.type_name())),
                            *pos,
                        )),
                    },
                }
            }
            Expr::Binary { op, lhs, rhs, pos } => {
                let lhs = self.eval(lhs, env)?;
                let rhs = self.eval(rhs, env)?;
                self.binary(*op, lhs, rhs)
                    .map_err(|err| self.fail(err, *pos))
            }
            Expr::Logical { op, lhs, rhs, .. } => {
                let lhs = self.eval(lhs, env)?;
                match (op, lhs.is_truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(lhs),
                    _ => self.eval(rhs, env),
                }
            }
            Expr::Assign { target, value, pos } => {
                let value = self.eval(value, env)?;
                self.assign(target, value.clone(), env, *pos)?;
                Ok(value)
            }
            Expr::Call { callee, args, pos } => {
                let function = self.eval(callee, env)?;
                if !function.is_callable() {
                    let what = match &**callee {
                        Expr::Ident(name, _) => name.to_string(),
                        Expr::Member { name, .. } => name.to_string(),
                        _ => "expression".to_string(),
                    };
                    return Err(self.fail(
                        ScriptError::type_error(format!("{} is not a function", what)),
                        *pos,
                    ));
                }
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, env)?);
                }
                self.call_value(&function, values, *pos)
            }
            Expr::Member { object, name, pos } => {
                let object = self.eval(object, env)?;
                self.member(&object, name)
                    .map_err(|err| self.fail(err, *pos))
            }
            Expr::Index { object, index, pos } => {
                let object = self.eval(object, env)?;
                let index = self.eval(index, env)?;
                self.index(&object, &index)
                    .map_err(|err| self.fail(err, *pos))
            }
            Expr::Function(decl) => Ok(self.closure(decl, env)),
        }
    }

    fn binary(&self, op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, ScriptError> {
        use BinaryOp::*;
        match op {
            Eq => return Ok(Value::Bool(lhs.strict_eq(&rhs))),
            NotEq => return Ok(Value::Bool(!lhs.strict_eq(&rhs))),
            Add => match (&lhs, &rhs) {
                (Value::Number(a), Value::Number(b)) => return Ok(Value::Number(a + b)),
                (Value::Str(_), _) | (_, Value::Str(_)) => {
                    return Ok(Value::str(format!("{}{}", lhs, rhs)));
                }
                _ => {}
            },
            Lt | LtEq | Gt | GtEq => {
                let ordering = match (&lhs, &rhs) {
                    (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                    (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                    _ => {
                        return Err(ScriptError::type_error(format!(
                            "cannot compare {} with {}",
                            lhs.type_name(),
                            rhs.type_name()
                        )));
                    }
                };
                let result = match ordering {
                    None => false,
                    Some(ordering) => match op {
                        Lt => ordering.is_lt(),
                        LtEq => ordering.is_le(),
                        Gt => ordering.is_gt(),
                        _ => ordering.is_ge(),
                    },
                };
                return Ok(Value::Bool(result));
            }
            _ => {}
        }

        let (Value::Number(a), Value::Number(b)) = (&lhs, &rhs) else {
            return Err(ScriptError::type_error(format!(
                "unsupported operand types: {} and {}",
                lhs.type_name(),
                rhs.type_name()
            )));
        };
        let result = match op {
            Add => a + b,
            Sub => a - b,
            Mul => a * b,
            Div => a / b,
            _ => a % b,
        };
        Ok(Value::Number(result))
    }

    fn member(&self, object: &Value, name: &str) -> Result<Value, ScriptError> {
        match object {
            Value::Object(map) => Ok(map.borrow().get(name).cloned().unwrap_or_default()),
            Value::List(items) if name == "length" => Ok(Value::Number(items.borrow().len() as f64)),
            Value::Str(s) if name == "length" => Ok(Value::Number(s.chars().count() as f64)),
            Value::Null => Err(ScriptError::type_error(format!(
                "cannot read property '{}' of null",
                name
            ))),
            _ => Ok(Value::Null),
        }
    }

    fn index(&self, object: &Value, index: &Value) -> Result<Value, ScriptError> {
        match (object, index) {
            (Value::List(items), Value::Number(i)) => Ok(list_slot(*i)
                .and_then(|i| items.borrow().get(i).cloned())
                .unwrap_or_default()),
            (Value::Str(s), Value::Number(i)) => Ok(list_slot(*i)
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::str(c.to_string()))
                .unwrap_or_default()),
            (Value::Object(map), Value::Str(key)) => {
                Ok(map.borrow().get(&**key).cloned().unwrap_or_default())
            }
            _ => Err(ScriptError::type_error(format!(
                "cannot index {} with {}",
                object.type_name(),
                index.type_name()
            ))),
        }
    }

    fn assign(&mut self, target: &Expr, value: Value, env: &Env, pos: Pos) -> Result<(), ScriptError> {
        match target {
            Expr::Ident(name, _) => environment::assign(env, name, value).map_err(|err| {
                let err = match err {
                    AssignError::Undeclared => {
                        ScriptError::reference_error(format!("{} is not defined", name))
                    }
                    AssignError::Constant => ScriptError::type_error(format!(
                        "assignment to constant variable '{}'",
                        name
                    )),
                };
                self.fail(err, pos)
            }),
            Expr::Member { object, name, .. } => match self.eval(object, env)? {
                Value::Object(map) => {
                    map.borrow_mut().insert(name.clone(), value);
                    Ok(())
                }
                other => Err(self.fail(
                    ScriptError::type_error(format!(
                        "cannot set property '{}' of {}",
                        name,
                        other.type_name()
                    )),
                    pos,
                )),
            },
            Expr::Index { object, index, .. } => {
                let object = self.eval(object, env)?;
                let index = self.eval(index, env)?;
                match (&object, &index) {
                    (Value::Object(map), Value::Str(key)) => {
                        map.borrow_mut().insert(key.clone(), value);
                        Ok(())
                    }
                    (Value::List(items), Value::Number(i)) => {
                        let mut items = items.borrow_mut();
                        match list_slot(*i) {
                            Some(i) if i < items.len() => {
                                items[i] = value;
                                Ok(())
                            }
                            Some(i) if i == items.len() => {
                                items.push(value);
                                Ok(())
                            }
                            _ => Err(self.fail(
                                ScriptError::range_error(format!("index {} out of bounds", i)),
                                pos,
                            )),
                        }
                    }
                    _ => Err(self.fail(
                        ScriptError::type_error(format!(
                            "cannot index {} with {}",
                            object.type_name(),
                            index.type_name()
                        )),
                        pos,
                    )),
                }
            }
            _ => Err(self.fail(ScriptError::error("invalid assignment target"), pos)),
        }
    }

    // === Calls ===

    pub(crate) fn call_value(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        pos: Pos,
    ) -> Result<Value, ScriptError> {
        self.call_frame(callee, args, pos, true)
    }

    fn call_frame(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        pos: Pos,
        counted: bool,
    ) -> Result<Value, ScriptError> {
        if counted && self.depth >= MAX_CALL_DEPTH {
            return Err(self.fail(
                ScriptError::range_error("maximum call stack size exceeded"),
                pos,
            ));
        }
        self.check_deadline(pos)?;
        match callee {
            Value::Function(closure) => {
                let env = Scope::child(&closure.env);
                {
                    let mut scope = env.borrow_mut();
                    let mut args = args.into_iter();
                    for param in &closure.decl.params {
                        scope.declare(param.clone(), args.next().unwrap_or_default(), false);
                    }
                }
                let name = closure
                    .decl
                    .name
                    .clone()
                    .unwrap_or_else(|| ANONYMOUS.into());
                self.enter_frame(name, closure.file.clone(), pos, counted);
                let result = self.exec_block(&closure.decl.body, &env);
                self.leave_frame();
                match result? {
                    Flow::Return(value) => Ok(value),
                    _ => Ok(Value::Null),
                }
            }
            Value::Native(native) => {
                self.enter_frame(native.name.clone(), NATIVE_FILE.into(), pos, false);
                let result = (native.func)(self, args);
                self.leave_frame();
                result.map_err(|err| self.fail(err, pos))
            }
            other => Err(self.fail(
                ScriptError::type_error(format!("{} is not a function", other.type_name())),
                pos,
            )),
        }
    }
}

fn list_slot(index: f64) -> Option<usize> {
    (index >= 0.0 && index.fract() == 0.0).then_some(index as usize)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::script::parse_program;

    /// Run a program and collect everything passed to `out(...)`.
    fn run(source: &str) -> Result<Vec<String>, ScriptError> {
        let output = Rc::new(RefCell::new(Vec::new()));
        let mut interp = Interpreter::new();
        let sink = output.clone();
        interp.define_global(
            "out",
            Value::native("out", move |_, args| {
                let line: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                sink.borrow_mut().push(line.join(" "));
                Ok(Value::Null)
            }),
        );
        let program = parse_program(source).expect("parse");
        interp.run_program(&program, "test.sc")?;
        while !interp.scheduler().is_empty() {
            interp.run_ready(usize::MAX)?;
        }
        let lines = output.borrow().clone();
        Ok(lines)
    }

    #[test]
    fn test_arithmetic_and_strings() {
        let out = run("out(1 + 2 * 3)\nout(\"a\" + 1)\nout(7 % 4, 10 / 4)").unwrap();
        assert_eq!(out, vec!["7", "a1", "3 2.5"]);
    }

    #[test]
    fn test_closures_capture_environment() {
        let source = r#"
fn counter() {
  let n = 0
  return fn () { n = n + 1; return n }
}
let c = counter()
c()
out(c())
"#;
        assert_eq!(run(source).unwrap(), vec!["2"]);
    }

    #[test]
    fn test_function_hoisting() {
        assert_eq!(run("out(twice(4))\nfn twice(x) { return x * 2 }").unwrap(), vec!["8"]);
    }

    #[test]
    fn test_loops_and_branches() {
        let source = r#"
let i = 0
let evens = []
while (true) {
  i = i + 1
  if (i > 6) { break }
  if (i % 2 == 1) { continue } else { push(evens, i) }
}
out(evens)
"#;
        assert_eq!(run(source).unwrap(), vec!["[2, 4, 6]"]);
    }

    #[test]
    fn test_try_catch_binds_error_object() {
        let source = r#"
try { missing() } catch (e) { out(e.name, e.message) }
try { throw Error("bad") } catch (e) { out(e.message) }
"#;
        assert_eq!(
            run(source).unwrap(),
            vec!["ReferenceError missing is not defined", "bad"]
        );
    }

    #[test]
    fn test_uncaught_error_has_stack() {
        let source = "fn inner() {\n  throw Error(\"boom\")\n}\nfn outer() { inner() }\nouter()";
        let err = run(source).unwrap_err();
        assert_eq!(err.message, "Error: boom");
        let frames: Vec<_> = err
            .stack
            .iter()
            .map(|f| (f.function.to_string(), f.pos.line))
            .collect();
        assert_eq!(
            frames,
            vec![
                ("inner".to_string(), 2),
                ("outer".to_string(), 4),
                ("<top-level>".to_string(), 5),
            ]
        );
        assert_eq!(err.stack[0].file.as_ref(), "test.sc");
    }

    #[test]
    fn test_const_reassignment_fails() {
        let err = run("const a = 1\na = 2").unwrap_err();
        assert!(err.message.starts_with("TypeError"), "{}", err.message);
        assert_eq!(err.origin().unwrap().pos, Pos::new(2, 3));
    }

    #[test]
    fn test_timers_run_in_order() {
        let source = r#"
setTimeout(fn () { out("late") }, 5)
setTimeout(fn () { out("early") }, 0)
queueMicrotask(fn () { out("micro") })
out("sync")
"#;
        assert_eq!(run(source).unwrap(), vec!["sync", "micro", "early", "late"]);
    }

    #[test]
    fn test_clear_timeout() {
        let source = "let t = setTimeout(fn () { out(\"never\") }, 0)\nclearTimeout(t)\nout(\"done\")";
        assert_eq!(run(source).unwrap(), vec!["done"]);
    }

    #[test]
    fn test_deadline_interrupts_loop_and_skips_catch() {
        let program = parse_program("try { while (true) { } } catch (e) { }").unwrap();
        let mut interp = Interpreter::new();
        interp.set_deadline(Some(Instant::now() + Duration::from_millis(20)));
        let err = interp.run_program(&program, "t.sc").unwrap_err();
        assert!(err.interrupted);
        assert_eq!(err.origin().unwrap().pos.line, 1);
    }

    #[test]
    fn test_recursion_limit() {
        let err = run("fn f() { return f() }\nf()").unwrap_err();
        assert!(err.message.starts_with("RangeError"), "{}", err.message);
    }

    /// Run `source` with a `wrap(body)` native that calls `body` either as
    /// a scaffold or as a plain call.
    fn run_wrapped(source: &str, scaffold: bool) -> Result<(), ScriptError> {
        let mut interp = Interpreter::new();
        interp.define_global(
            "wrap",
            Value::native("wrap", move |interp, args| {
                let body = args.first().cloned().unwrap_or_default();
                if scaffold {
                    interp.invoke_scaffold(&body, Vec::new())
                } else {
                    interp.invoke(&body, Vec::new())
                }
            }),
        );
        let program = parse_program(source).expect("parse");
        interp.run_program(&program, "test.sc").map(|_| ())
    }

    #[test]
    fn test_scaffold_frames_do_not_count_toward_recursion_limit() {
        let levels = MAX_CALL_DEPTH + 50;
        let source = format!(
            "{}let x = 1{}",
            "wrap(fn () {\n".repeat(levels),
            "\n})".repeat(levels)
        );
        crate::driver::with_eval_stack(move || {
            run_wrapped(&source, true).unwrap();
            let err = run_wrapped(&source, false).unwrap_err();
            assert!(err.message.starts_with("RangeError"), "{}", err.message);
        })
        .unwrap();
    }

    struct Recorder(Rc<RefCell<Vec<(AsyncId, AsyncId)>>>);

    impl AsyncHook for Recorder {
        fn init(&mut self, id: AsyncId, _kind: ResourceKind, trigger: AsyncId) {
            self.0.borrow_mut().push((id, trigger));
        }

        fn destroy(&mut self, _id: AsyncId) {}
    }

    #[test]
    fn test_hooks_see_trigger_chain() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut interp = Interpreter::new();
        interp.add_hook(Box::new(Recorder(seen.clone())));
        let program = parse_program(
            "setTimeout(fn () { setTimeout(fn () { }, 0) }, 0)",
        )
        .unwrap();
        interp.run_program(&program, "t.sc").unwrap();
        while !interp.scheduler().is_empty() {
            interp.run_ready(usize::MAX).unwrap();
        }
        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].1, ROOT_CONTEXT);
        assert_eq!(seen[1].1, seen[0].0);
    }
}
