//! A [`Host`] without an interpreter, for tests and the demo.
//!
//! Objects are reference counted nodes with a mutable attribute table.
//! Modules are registered up front with [`MemoryHost::add_module`]; classes
//! and functions are built from Rust closures. Integers, floats, strings,
//! lists and the `None`/`True`/`False` singletons behave like their Python
//! counterparts as far as the bridge can observe. Instances honour a
//! class level `__str__`, and `__setattr__` acts as a write guard.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{Host, HostError, HostErrorKind, HostResult, ObjectId};
use crate::capsule::Capsule;
use crate::dds::{EntityHandle, EntityKind};

pub type NativeFn = Arc<dyn Fn(&MemoryHost, &[Object]) -> HostResult<Object> + Send + Sync>;

/// Runs after a class creates an instance, with the call arguments.
pub type InitFn = Arc<dyn Fn(&MemoryHost, &Object, &[Object]) -> HostResult<()> + Send + Sync>;

#[derive(Clone)]
pub struct Object(Arc<Node>);

#[derive(Clone)]
pub struct WeakObject(Weak<Node>);

struct Node {
    attrs: Mutex<BTreeMap<String, Object>>,
    kind: Kind,
}

struct ClassInfo {
    qualified: String,
    bases: Vec<Object>,
    init: Option<InitFn>,
}

enum Kind {
    None,
    Bool(bool),
    Int(i128),
    Float(f64),
    Str(String),
    List(Mutex<Vec<Object>>),
    Tuple(Vec<Object>),
    Module(String),
    Class(ClassInfo),
    /// `value` is set for instances of `int` subclasses.
    Instance { class: Object, value: Option<i128> },
    Capsule(Mutex<Capsule>),
    Function(NativeFn),
}

impl Object {
    fn new(kind: Kind) -> Self {
        Object(Arc::new(Node {
            attrs: Mutex::new(BTreeMap::new()),
            kind,
        }))
    }

    /// Identity comparison, Python's `is`.
    pub fn is(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn attr(&self, name: &str) -> Option<Object> {
        self.0.attrs.lock().get(name).cloned()
    }

    fn class_info(&self) -> Option<&ClassInfo> {
        match &self.0.kind {
            Kind::Class(info) => Some(info),
            _ => None,
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match &self.0.kind {
            Kind::None => "None".to_string(),
            Kind::Bool(b) => b.to_string(),
            Kind::Int(i) => i.to_string(),
            Kind::Float(x) => x.to_string(),
            Kind::Str(s) => format!("{s:?}"),
            Kind::List(_) => "list".to_string(),
            Kind::Tuple(_) => "tuple".to_string(),
            Kind::Module(name) => format!("module {name}"),
            Kind::Class(info) => format!("class {}", info.qualified),
            Kind::Instance { class, .. } => match class.class_info() {
                Some(info) => format!("{} instance", info.qualified),
                None => "instance".to_string(),
            },
            Kind::Capsule(_) => "capsule".to_string(),
            Kind::Function(_) => "function".to_string(),
        };
        write!(f, "Object({tag})")
    }
}

fn short_name(qualified: &str) -> &str {
    qualified.rsplit('.').next().unwrap_or(qualified)
}

fn class(qualified: &str, bases: Vec<Object>, init: Option<InitFn>) -> Object {
    let class = Object::new(Kind::Class(ClassInfo {
        qualified: qualified.to_string(),
        bases,
        init,
    }));
    let name = Object::new(Kind::Str(short_name(qualified).to_string()));
    class.0.attrs.lock().insert("__name__".to_string(), name);
    if let Some((module, _)) = qualified.rsplit_once('.') {
        let module = Object::new(Kind::Str(module.to_string()));
        class.0.attrs.lock().insert("__module__".to_string(), module);
    }
    class
}

struct Builtins {
    object: Object,
    type_: Object,
    none_type: Object,
    int: Object,
    bool_: Object,
    float: Object,
    str_: Object,
    list: Object,
    tuple: Object,
    module: Object,
    capsule: Object,
    function: Object,
    exception: Object,
}

impl Builtins {
    fn new() -> (Self, Object) {
        let object = class("object", Vec::new(), None);
        let base = || vec![object.clone()];
        let int = class("int", base(), None);
        let exception = class("Exception", base(), None);
        let builtins = Builtins {
            type_: class("type", base(), None),
            none_type: class("NoneType", base(), None),
            bool_: class("bool", vec![int.clone()], None),
            float: class("float", base(), None),
            str_: class("str", base(), None),
            list: class("list", base(), None),
            tuple: class("tuple", base(), None),
            module: class("module", base(), None),
            capsule: class("PyCapsule", base(), None),
            function: class("builtin_function_or_method", base(), None),
            object,
            int,
            exception,
        };

        let module = Object::new(Kind::Module("builtins".to_string()));
        {
            let mut attrs = module.0.attrs.lock();
            for class in [
                &builtins.object,
                &builtins.type_,
                &builtins.int,
                &builtins.bool_,
                &builtins.float,
                &builtins.str_,
                &builtins.list,
                &builtins.tuple,
                &builtins.exception,
            ] {
                if let Some(info) = class.class_info() {
                    attrs.insert(info.qualified.clone(), class.clone());
                }
            }
            let exception = vec![builtins.exception.clone()];
            for name in ["TypeError", "ValueError", "OverflowError", "TimeoutError"] {
                attrs.insert(name.to_string(), class(name, exception.clone(), None));
            }
        }
        (builtins, module)
    }
}

struct Inner {
    modules: Mutex<HashMap<String, Object>>,
    builtins: Builtins,
    none: Object,
    true_: Object,
    false_: Object,
    allow_threads_calls: AtomicUsize,
    thread_state_calls: AtomicUsize,
}

/// Cheap to clone; clones share modules and singletons.
#[derive(Clone)]
pub struct MemoryHost {
    inner: Arc<Inner>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    pub fn new() -> Self {
        let (builtins, module) = Builtins::new();
        let mut modules = HashMap::new();
        modules.insert("builtins".to_string(), module);
        MemoryHost {
            inner: Arc::new(Inner {
                modules: Mutex::new(modules),
                builtins,
                none: Object::new(Kind::None),
                true_: Object::new(Kind::Bool(true)),
                false_: Object::new(Kind::Bool(false)),
                allow_threads_calls: AtomicUsize::new(0),
                thread_state_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// The module registered under `name`, created empty on first use.
    pub fn add_module(&self, name: &str) -> Object {
        self.inner
            .modules
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Object::new(Kind::Module(name.to_string())))
            .clone()
    }

    /// A plain class stored on `module` under `name`.
    pub fn new_class(&self, module: &Object, name: &str, bases: &[Object]) -> Object {
        self.define_class(module, name, bases, None)
    }

    pub fn new_class_with_init<F>(&self, module: &Object, name: &str, bases: &[Object], init: F) -> Object
    where
        F: Fn(&MemoryHost, &Object, &[Object]) -> HostResult<()> + Send + Sync + 'static,
    {
        self.define_class(module, name, bases, Some(Arc::new(init)))
    }

    fn define_class(&self, module: &Object, name: &str, bases: &[Object], init: Option<InitFn>) -> Object {
        let prefix = match &module.0.kind {
            Kind::Module(module) => module.clone(),
            _ => "__main__".to_string(),
        };
        let bases = if bases.is_empty() {
            vec![self.inner.builtins.object.clone()]
        } else {
            bases.to_vec()
        };
        let class = class(&format!("{prefix}.{name}"), bases, init);
        module.0.attrs.lock().insert(name.to_string(), class.clone());
        class
    }

    pub fn function<F>(&self, f: F) -> Object
    where
        F: Fn(&MemoryHost, &[Object]) -> HostResult<Object> + Send + Sync + 'static,
    {
        Object::new(Kind::Function(Arc::new(f)))
    }

    /// An integer wider than any native type, for range checks.
    pub fn int(&self, value: i128) -> Object {
        Object::new(Kind::Int(value))
    }

    /// The built-in `int` class, for `IntEnum`-like subclasses.
    pub fn int_class(&self) -> Object {
        self.inner.builtins.int.clone()
    }

    /// How many times the interpreter lock was released.
    pub fn allow_threads_calls(&self) -> usize {
        self.inner.allow_threads_calls.load(Ordering::Relaxed)
    }

    /// How many times a foreign thread entered the host.
    pub fn thread_state_calls(&self) -> usize {
        self.inner.thread_state_calls.load(Ordering::Relaxed)
    }

    fn type_name(&self, obj: &Object) -> String {
        self.type_of(obj)
            .class_info()
            .map(|info| short_name(&info.qualified).to_string())
            .unwrap_or_else(|| "object".to_string())
    }

    fn is_subclass(&self, class: &Object, target: &Object) -> bool {
        class.is(target)
            || class
                .class_info()
                .is_some_and(|info| info.bases.iter().any(|base| self.is_subclass(base, target)))
    }

    fn lookup_class_attr(&self, class: &Object, name: &str) -> Option<Object> {
        if let Some(found) = class.attr(name) {
            return Some(found);
        }
        class
            .class_info()?
            .bases
            .iter()
            .find_map(|base| self.lookup_class_attr(base, name))
    }

    fn find_init(&self, class: &Object) -> Option<InitFn> {
        let info = class.class_info()?;
        info.init
            .clone()
            .or_else(|| info.bases.iter().find_map(|base| self.find_init(base)))
    }

    fn int_value(&self, obj: &Object) -> Option<i128> {
        match &obj.0.kind {
            Kind::Int(value) => Some(*value),
            Kind::Bool(value) => Some(i128::from(*value)),
            Kind::Instance { value, .. } => *value,
            _ => None,
        }
    }

    fn not_an_integer(&self, obj: &Object) -> HostError {
        HostError::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            self.type_name(obj)
        ))
    }

    fn instantiate(&self, class: &Object, info: &ClassInfo, args: &[Object]) -> HostResult<Object> {
        let builtins = &self.inner.builtins;
        let value = if self.is_subclass(class, &builtins.int) {
            match args.first() {
                Some(arg) => Some(self.int_value(arg).ok_or_else(|| self.not_an_integer(arg))?),
                None => Some(0),
            }
        } else {
            None
        };
        let instance = Object::new(Kind::Instance {
            class: class.clone(),
            value,
        });

        let exception = self.is_subclass(class, &builtins.exception);
        if exception {
            let message = match args.first() {
                Some(arg) => self.str_of(arg)?,
                None => String::new(),
            };
            self.set_attr(&instance, "args", self.new_tuple(args.to_vec()))?;
            self.set_attr(&instance, "message", self.new_str(&message))?;
        }

        match self.find_init(class) {
            Some(init) => init(self, &instance, args)?,
            None if !args.is_empty() && value.is_none() && !exception => {
                return Err(HostError::type_error(format!(
                    "{}() takes no arguments",
                    short_name(&info.qualified)
                )));
            }
            None => {}
        }
        Ok(instance)
    }
}

impl Host for MemoryHost {
    type Object = Object;
    type WeakObject = WeakObject;

    fn id(&self, obj: &Object) -> ObjectId {
        ObjectId(Arc::as_ptr(&obj.0) as usize)
    }

    fn none(&self) -> Object {
        self.inner.none.clone()
    }

    fn is_none(&self, obj: &Object) -> bool {
        obj.is(&self.inner.none)
    }

    fn downgrade(&self, obj: &Object) -> HostResult<WeakObject> {
        Ok(WeakObject(Arc::downgrade(&obj.0)))
    }

    fn upgrade(&self, weak: &WeakObject) -> Option<Object> {
        weak.0.upgrade().map(Object)
    }

    fn import(&self, module: &str) -> HostResult<Object> {
        self.inner
            .modules
            .lock()
            .get(module)
            .cloned()
            .ok_or_else(|| HostError::new(HostErrorKind::Import, format!("No module named '{module}'")))
    }

    fn get_attr(&self, obj: &Object, name: &str) -> HostResult<Object> {
        if let Some(found) = obj.attr(name) {
            return Ok(found);
        }
        let inherited = match &obj.0.kind {
            Kind::Class(info) => info
                .bases
                .iter()
                .find_map(|base| self.lookup_class_attr(base, name)),
            Kind::Instance { class, .. } => self.lookup_class_attr(class, name),
            _ => None,
        };
        if let Some(found) = inherited {
            return Ok(found);
        }
        if name == "__class__" {
            return Ok(self.type_of(obj));
        }
        Err(HostError::attribute(format!(
            "'{}' object has no attribute '{name}'",
            self.type_name(obj)
        )))
    }

    /// A class level `__setattr__` is called as a guard with
    /// `(obj, name, value)`; the attribute is stored only if it succeeds.
    fn set_attr(&self, obj: &Object, name: &str, value: Object) -> HostResult<()> {
        if let Kind::Instance { class, .. } = &obj.0.kind {
            if let Some(guard) = self.lookup_class_attr(class, "__setattr__") {
                self.call(&guard, &[obj.clone(), self.new_str(name), value.clone()])?;
            }
        }
        match &obj.0.kind {
            Kind::Module(_) | Kind::Class(_) | Kind::Instance { .. } | Kind::Function(_) => {
                let replaced = obj.0.attrs.lock().insert(name.to_string(), value);
                drop(replaced);
                Ok(())
            }
            _ => Err(HostError::attribute(format!(
                "'{}' object attribute '{name}' is read-only",
                self.type_name(obj)
            ))),
        }
    }

    fn del_attr(&self, obj: &Object, name: &str) -> HostResult<()> {
        let removed = obj.0.attrs.lock().remove(name);
        match removed {
            Some(_) => Ok(()),
            None => Err(HostError::attribute(format!(
                "'{}' object has no attribute '{name}'",
                self.type_name(obj)
            ))),
        }
    }

    fn call(&self, callable: &Object, args: &[Object]) -> HostResult<Object> {
        match &callable.0.kind {
            Kind::Function(f) => f(self, args),
            Kind::Class(info) => self.instantiate(callable, info, args),
            _ => Err(HostError::type_error(format!(
                "'{}' object is not callable",
                self.type_name(callable)
            ))),
        }
    }

    fn type_of(&self, obj: &Object) -> Object {
        let builtins = &self.inner.builtins;
        match &obj.0.kind {
            Kind::None => builtins.none_type.clone(),
            Kind::Bool(_) => builtins.bool_.clone(),
            Kind::Int(_) => builtins.int.clone(),
            Kind::Float(_) => builtins.float.clone(),
            Kind::Str(_) => builtins.str_.clone(),
            Kind::List(_) => builtins.list.clone(),
            Kind::Tuple(_) => builtins.tuple.clone(),
            Kind::Module(_) => builtins.module.clone(),
            Kind::Class(_) => builtins.type_.clone(),
            Kind::Instance { class, .. } => class.clone(),
            Kind::Capsule(_) => builtins.capsule.clone(),
            Kind::Function(_) => builtins.function.clone(),
        }
    }

    fn is_instance(&self, obj: &Object, class: &Object) -> HostResult<bool> {
        if class.class_info().is_none() {
            return Err(HostError::type_error(
                "isinstance() arg 2 must be a type",
            ));
        }
        Ok(self.is_subclass(&self.type_of(obj), class))
    }

    fn new_bool(&self, value: bool) -> Object {
        if value {
            self.inner.true_.clone()
        } else {
            self.inner.false_.clone()
        }
    }

    fn is_true(&self, obj: &Object) -> bool {
        obj.is(&self.inner.true_)
    }

    fn is_false(&self, obj: &Object) -> bool {
        obj.is(&self.inner.false_)
    }

    fn new_i64(&self, value: i64) -> Object {
        Object::new(Kind::Int(i128::from(value)))
    }

    fn new_u64(&self, value: u64) -> Object {
        Object::new(Kind::Int(i128::from(value)))
    }

    fn new_f64(&self, value: f64) -> Object {
        Object::new(Kind::Float(value))
    }

    fn as_i64(&self, obj: &Object) -> HostResult<i64> {
        let value = self.int_value(obj).ok_or_else(|| self.not_an_integer(obj))?;
        i64::try_from(value).map_err(|_| {
            HostError::new(HostErrorKind::Overflow, "Python int too large to convert to C long")
        })
    }

    fn as_u64(&self, obj: &Object) -> HostResult<u64> {
        let value = self.int_value(obj).ok_or_else(|| self.not_an_integer(obj))?;
        if value < 0 {
            return Err(HostError::new(
                HostErrorKind::Overflow,
                "can't convert negative int to unsigned",
            ));
        }
        u64::try_from(value).map_err(|_| {
            HostError::new(HostErrorKind::Overflow, "int too big to convert")
        })
    }

    fn as_f64(&self, obj: &Object) -> HostResult<f64> {
        if let Kind::Float(value) = &obj.0.kind {
            return Ok(*value);
        }
        self.int_value(obj).map(|value| value as f64).ok_or_else(|| {
            HostError::type_error(format!("must be real number, not {}", self.type_name(obj)))
        })
    }

    fn new_str(&self, value: &str) -> Object {
        Object::new(Kind::Str(value.to_string()))
    }

    fn str_of(&self, obj: &Object) -> HostResult<String> {
        if let Kind::Instance { class, .. } = &obj.0.kind {
            if let Some(method) = self.lookup_class_attr(class, "__str__") {
                let text = self.call(&method, std::slice::from_ref(obj))?;
                return match &text.0.kind {
                    Kind::Str(text) => Ok(text.clone()),
                    _ => Err(HostError::type_error(format!(
                        "__str__ returned non-string (type {})",
                        self.type_name(&text)
                    ))),
                };
            }
        }
        Ok(match &obj.0.kind {
            Kind::None => "None".to_string(),
            Kind::Bool(true) => "True".to_string(),
            Kind::Bool(false) => "False".to_string(),
            Kind::Int(value) => value.to_string(),
            Kind::Float(value) if value.is_finite() && value.fract() == 0.0 => format!("{value:.1}"),
            Kind::Float(value) => value.to_string(),
            Kind::Str(value) => value.clone(),
            Kind::List(items) => {
                let items = items.lock().clone();
                let parts = items
                    .iter()
                    .map(|item| self.str_of(item))
                    .collect::<HostResult<Vec<_>>>()?;
                format!("[{}]", parts.join(", "))
            }
            Kind::Tuple(items) => {
                let parts = items
                    .iter()
                    .map(|item| self.str_of(item))
                    .collect::<HostResult<Vec<_>>>()?;
                format!("({})", parts.join(", "))
            }
            Kind::Module(name) => format!("<module '{name}'>"),
            Kind::Class(info) => format!("<class '{}'>", info.qualified),
            Kind::Instance { value: Some(value), .. } => value.to_string(),
            Kind::Instance { class, .. } => match obj.attr("message") {
                Some(message) if self.is_subclass(class, &self.inner.builtins.exception) => {
                    self.str_of(&message)?
                }
                _ => format!("<{} object>", self.type_name(obj)),
            },
            Kind::Capsule(_) => "<capsule object>".to_string(),
            Kind::Function(_) => "<built-in function>".to_string(),
        })
    }

    fn new_list(&self, items: Vec<Object>) -> Object {
        Object::new(Kind::List(Mutex::new(items)))
    }

    fn list_items(&self, obj: &Object) -> HostResult<Vec<Object>> {
        match &obj.0.kind {
            Kind::List(items) => Ok(items.lock().clone()),
            Kind::Tuple(items) => Ok(items.clone()),
            _ => Err(HostError::type_error(format!(
                "'{}' object is not iterable",
                self.type_name(obj)
            ))),
        }
    }

    fn new_tuple(&self, items: Vec<Object>) -> Object {
        Object::new(Kind::Tuple(items))
    }

    fn new_capsule(&self, capsule: Capsule) -> HostResult<Object> {
        Ok(Object::new(Kind::Capsule(Mutex::new(capsule))))
    }

    fn capsule_handle(&self, obj: &Object) -> Option<(EntityKind, EntityHandle)> {
        match &obj.0.kind {
            Kind::Capsule(capsule) => {
                let capsule = capsule.lock();
                Some((capsule.kind(), capsule.handle()))
            }
            _ => None,
        }
    }

    fn new_exception_class(&self, qualified_name: &str, bases: &[Object]) -> HostResult<Object> {
        let bases = if bases.is_empty() {
            vec![self.inner.builtins.exception.clone()]
        } else {
            bases.to_vec()
        };
        Ok(class(qualified_name, bases, None))
    }

    fn allow_threads<T, F>(&self, f: F) -> T
    where
        T: Send,
        F: FnOnce() -> T + Send,
    {
        self.inner.allow_threads_calls.fetch_add(1, Ordering::Relaxed);
        f()
    }

    fn with_thread_state<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&Self) -> T,
    {
        self.inner.thread_state_calls.fetch_add(1, Ordering::Relaxed);
        f(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_behave_like_python() {
        let host = MemoryHost::new();
        assert_eq!(host.as_i64(&host.new_i64(-5)).unwrap(), -5);
        assert_eq!(host.as_u64(&host.int(-1)).unwrap_err().kind, HostErrorKind::Overflow);
        assert_eq!(host.as_i64(&host.int(1 << 70)).unwrap_err().kind, HostErrorKind::Overflow);
        assert_eq!(host.as_i64(&host.new_f64(1.0)).unwrap_err().kind, HostErrorKind::Type);
        assert_eq!(host.as_i64(&host.new_bool(true)).unwrap(), 1);
        assert_eq!(host.str_of(&host.new_f64(2.0)).unwrap(), "2.0");
    }

    #[test]
    fn classes_and_instances() {
        let host = MemoryHost::new();
        let module = host.add_module("shapes");
        let shape = host.new_class(&module, "Shape", &[]);
        let square = host.new_class(&module, "Square", &[shape.clone()]);
        host.set_attr(&shape, "sides", host.new_i64(0)).unwrap();

        let obj = host.call(&square, &[]).unwrap();
        assert!(host.type_of(&obj).is(&square));
        assert!(host.is_instance(&obj, &shape).unwrap());
        assert_eq!(host.as_i64(&host.get_attr(&obj, "sides").unwrap()).unwrap(), 0);
        assert_eq!(host.describe(&obj), "Square");
        assert!(host.get_attr(&obj, "corners").is_err());
        assert!(host.call(&square, &[host.new_i64(1)]).is_err());

        let imported = host.import("shapes").unwrap();
        assert!(host.get_attr(&imported, "Square").unwrap().is(&square));
        assert_eq!(host.import("missing").unwrap_err().kind, HostErrorKind::Import);
    }

    #[test]
    fn exceptions_carry_message() {
        let host = MemoryHost::new();
        let builtins = host.import("builtins").unwrap();
        let overflow = host.get_attr(&builtins, "OverflowError").unwrap();
        let custom = host.new_exception_class("m.Custom", &[overflow.clone()]).unwrap();
        let err = host.call(&custom, &[host.new_str("too big")]).unwrap();
        assert!(host.is_instance(&err, &overflow).unwrap());
        assert_eq!(host.str_of(&err).unwrap(), "too big");
    }

    #[test]
    fn int_subclass_keeps_value() {
        let host = MemoryHost::new();
        let module = host.add_module("enums");
        let color = host.new_class(&module, "Color", &[host.int_class()]);
        let red = host.call(&color, &[host.new_u64(2)]).unwrap();
        assert_eq!(host.as_u64(&red).unwrap(), 2);
        assert!(host.type_of(&red).is(&color));
    }
}
