//! Dynamic value types
//!
//! Settlement values, rejection reasons and event payloads are all carried as
//! [`Value`]. The model is deliberately close to the loosely-typed host the
//! validation rules were written for: a validator can only report "not a
//! function" or "not an array" when it can be handed something that isn't.

use crate::error::{Error, Result};
use crate::promise::Promise;
use rustc_hash::FxHashMap as HashMap;
use std::fmt;
use std::rc::Rc;

/// Type alias for native function implementations
pub type NativeFn = Rc<dyn Fn(&[Value]) -> Result<Value>>;

/// A native function with a declared parameter count
#[derive(Clone)]
pub struct Function {
    name: String,
    arity: usize,
    func: NativeFn,
}

impl Function {
    /// Create a function declaring `arity` positional parameters
    pub fn new<F>(name: impl Into<String>, arity: usize, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        Self {
            name: name.into(),
            arity,
            func: Rc::new(func),
        }
    }

    /// Function name (`"anonymous"` when created without one)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of declared positional parameters
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Invoke the function
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.func)(args)
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Function: {}]", self.name)
    }
}

/// A dynamic value
#[derive(Clone)]
pub enum Value {
    /// undefined
    Undefined,
    /// null
    Null,
    /// Boolean value
    Boolean(bool),
    /// Number (IEEE 754 double)
    Number(f64),
    /// String
    String(String),
    /// Ordered sequence
    Array(Vec<Value>),
    /// String-keyed record
    Object(HashMap<String, Value>),
    /// Invocable native function
    Function(Function),
    /// Promise handle
    Promise(Promise),
}

impl Value {
    /// Check if value is undefined
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Check if value is null or undefined
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Null | Value::Undefined)
    }

    /// Truthiness
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) | Value::Function(_) | Value::Promise(_) => true,
        }
    }

    /// Borrow the function, if this is one
    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Borrow the promise handle, if this is one
    pub fn as_promise(&self) -> Option<&Promise> {
        match self {
            Value::Promise(p) => Some(p),
            _ => None,
        }
    }

    /// Borrow the array elements, if this is an array
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Create an array value
    pub fn new_array(elements: Vec<Value>) -> Value {
        Value::Array(elements)
    }

    /// Create a native function value
    pub fn new_function<F>(name: impl Into<String>, arity: usize, func: F) -> Value
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        Value::Function(Function::new(name, arity, func))
    }

    /// Call this value as a function
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        match self {
            Value::Function(f) => f.call(args),
            other => Err(Error::call(format!("'{}' is not a function", other.to_js_string()))),
        }
    }

    /// Convert to a string representation
    pub fn to_js_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Number(n) => {
                if n.is_nan() {
                    "NaN".to_string()
                } else if n.is_infinite() {
                    if *n > 0.0 {
                        "Infinity".to_string()
                    } else {
                        "-Infinity".to_string()
                    }
                } else if *n == 0.0 {
                    "0".to_string()
                } else {
                    format!("{}", n)
                }
            }
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_js_string() })
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Function(f) => format!("[Function: {}]", f.name()),
            Value::Promise(_) => "[object Promise]".to_string(),
        }
    }

    /// Equality: structural for data, identity for functions and promises
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => {
                if a.is_nan() || b.is_nan() {
                    false
                } else {
                    a == b
                }
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.strict_equals(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).is_some_and(|w| v.strict_equals(w)))
            }
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Promise(a), Value::Promise(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Undefined
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_equals(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Array(items) => write!(f, "{:?}", items),
            Value::Object(props) => {
                let mut keys: Vec<&String> = props.keys().collect();
                keys.sort();
                let mut map = f.debug_map();
                for key in keys {
                    map.entry(key, &props[key]);
                }
                map.finish()
            }
            Value::Function(func) => write!(f, "{:?}", func),
            Value::Promise(p) => write!(f, "[Promise <{:?}>]", p.state()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_js_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Vec<Promise>> for Value {
    fn from(promises: Vec<Promise>) -> Self {
        Value::Array(promises.into_iter().map(Value::Promise).collect())
    }
}

impl From<Promise> for Value {
    fn from(p: Promise) -> Self {
        Value::Promise(p)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Undefined, Into::into)
    }
}
