use crate::compiler::chunk::UserFunc;
use crate::core::heap::Handle;
use indexmap::IndexMap;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Shared, mutable object storage. Objects have handle semantics: copying a
/// `Val::Object` copies the handle, never the property table.
pub type ObjectRef = Rc<RefCell<ObjectData>>;

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum ArrayKey {
    Int(i64),
    Str(Rc<Vec<u8>>),
}

impl ArrayKey {
    /// Build a key from raw bytes, normalizing canonical decimal integers
    /// ("5" → 5, but "05" and "5.0" stay strings)
    /// Reference: $PHP_SRC_PATH/Zend/zend_hash.c - ZEND_HANDLE_NUMERIC_STR
    pub fn from_bytes(bytes: &[u8]) -> Self {
        if let Some(i) = canonical_int(bytes) {
            ArrayKey::Int(i)
        } else {
            ArrayKey::Str(Rc::new(bytes.to_vec()))
        }
    }

    pub fn to_val(&self) -> Val {
        match self {
            ArrayKey::Int(i) => Val::Int(*i),
            ArrayKey::Str(s) => Val::String(s.clone()),
        }
    }

    pub fn to_display(&self) -> String {
        match self {
            ArrayKey::Int(i) => i.to_string(),
            ArrayKey::Str(s) => String::from_utf8_lossy(s).into_owned(),
        }
    }
}

fn canonical_int(bytes: &[u8]) -> Option<i64> {
    let s = std::str::from_utf8(bytes).ok()?;
    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    if s == "-0" {
        return None;
    }
    s.parse::<i64>().ok()
}

/// Array metadata for efficient operations
/// Reference: $PHP_SRC_PATH/Zend/zend_hash.h - HashTable::nNextFreeElement
#[derive(Debug, Clone, Default)]
pub struct ArrayData {
    pub map: IndexMap<ArrayKey, Val>,
    pub next_free: i64, // Cached next auto-increment index
}

impl ArrayData {
    pub fn new() -> Self {
        Self {
            map: IndexMap::new(),
            next_free: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: IndexMap::with_capacity(capacity),
            next_free: 0,
        }
    }

    /// Insert a key-value pair and update next_free if needed
    /// Reference: $PHP_SRC_PATH/Zend/zend_hash.c - _zend_hash_index_add_or_update_i
    pub fn insert(&mut self, key: ArrayKey, value: Val) -> Option<Val> {
        if let ArrayKey::Int(i) = &key {
            if *i >= self.next_free {
                self.next_free = i.saturating_add(1);
            }
        }
        self.map.insert(key, value)
    }

    /// Append a value with auto-incremented key
    pub fn push(&mut self, value: Val) {
        let key = ArrayKey::Int(self.next_free);
        self.next_free = self.next_free.saturating_add(1);
        self.map.insert(key, value);
    }

    pub fn get(&self, key: &ArrayKey) -> Option<&Val> {
        self.map.get(key)
    }

    /// Remove preserving the order of the remaining entries
    pub fn remove(&mut self, key: &ArrayKey) -> Option<Val> {
        self.map.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Get the next auto-increment index (O(1))
    pub fn next_index(&self) -> i64 {
        self.next_free
    }

    /// Keys in iteration order: integer keys ascending, then every other key
    /// in table order.
    pub fn iteration_keys(&self) -> Vec<ArrayKey> {
        let mut ints: Vec<i64> = self
            .map
            .keys()
            .filter_map(|k| match k {
                ArrayKey::Int(i) => Some(*i),
                ArrayKey::Str(_) => None,
            })
            .collect();
        ints.sort_unstable();

        let mut keys: Vec<ArrayKey> = ints.into_iter().map(ArrayKey::Int).collect();
        keys.extend(
            self.map
                .keys()
                .filter(|k| matches!(k, ArrayKey::Str(_)))
                .cloned(),
        );
        keys
    }
}

impl From<Vec<Val>> for ArrayData {
    fn from(values: Vec<Val>) -> Self {
        let mut data = ArrayData::with_capacity(values.len());
        for value in values {
            data.push(value);
        }
        data
    }
}

impl PartialEq for ArrayData {
    fn eq(&self, other: &Self) -> bool {
        self.map == other.map
        // next_free is cached metadata
    }
}

static NEXT_OBJECT_ID: AtomicU32 = AtomicU32::new(1);

pub struct ObjectData {
    pub id: u32,
    pub class: Rc<str>,
    pub properties: IndexMap<Rc<str>, Val>,
    pub internal: Option<Rc<dyn Any>>, // For internal classes like Generator
}

impl ObjectData {
    pub fn new(class: Rc<str>) -> Self {
        Self {
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            class,
            properties: IndexMap::new(),
            internal: None,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Val> {
        self.properties.get(name)
    }

    pub fn set(&mut self, name: Rc<str>, value: Val) {
        self.properties.insert(name, value);
    }

    pub fn unset(&mut self, name: &str) -> Option<Val> {
        self.properties.shift_remove(name)
    }
}

impl fmt::Debug for ObjectData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectData")
            .field("id", &self.id)
            .field("class", &self.class)
            .field("properties", &self.properties)
            .field("internal", &self.internal.is_some())
            .finish()
    }
}

/// A variable captured by a closure, destined for `slot` in the callee.
/// By-reference captures hold a `Val::Reference`.
#[derive(Debug, Clone)]
pub struct BoundVar {
    pub slot: u32,
    pub value: Val,
}

#[derive(Debug, Clone)]
pub struct ClosureData {
    pub func: Rc<UserFunc>,
    pub bound: Vec<BoundVar>,
    pub this: Option<ObjectRef>,
    pub scope: Option<Rc<str>>,
}

#[derive(Debug, Clone, Default)]
pub enum Val {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Rc<Vec<u8>>),  // byte strings (COW)
    Array(Rc<ArrayData>), // COW
    Object(ObjectRef),
    Closure(Rc<ClosureData>),
    Reference(Handle), // indirection into the reference-cell arena
}

/// Strict (type + value) equality. Objects and closures compare by identity.
/// Reference: $PHP_SRC_PATH/Zend/zend_operators.c - zend_is_identical
impl PartialEq for Val {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Val::Null, Val::Null) => true,
            (Val::Bool(a), Val::Bool(b)) => a == b,
            (Val::Int(a), Val::Int(b)) => a == b,
            (Val::Float(a), Val::Float(b)) => a == b,
            (Val::String(a), Val::String(b)) => a == b,
            (Val::Array(a), Val::Array(b)) => Rc::ptr_eq(a, b) || a == b,
            (Val::Object(a), Val::Object(b)) => Rc::ptr_eq(a, b),
            (Val::Closure(a), Val::Closure(b)) => Rc::ptr_eq(a, b),
            (Val::Reference(a), Val::Reference(b)) => a == b,
            _ => false,
        }
    }
}

/// Result of numeric coercion
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn to_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    pub fn into_val(self) -> Val {
        match self {
            Number::Int(i) => Val::Int(i),
            Number::Float(f) => Val::Float(f),
        }
    }
}

impl Val {
    pub fn string(bytes: impl Into<Vec<u8>>) -> Val {
        Val::String(Rc::new(bytes.into()))
    }

    pub fn empty_array() -> Val {
        Val::Array(Rc::new(ArrayData::new()))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Val::Null => "null",
            Val::Bool(_) => "bool",
            Val::Int(_) => "int",
            Val::Float(_) => "float",
            Val::String(_) => "string",
            Val::Array(_) => "array",
            Val::Object(_) | Val::Closure(_) => "object",
            Val::Reference(_) => "reference",
        }
    }

    /// Type name as reported by gettype()
    pub fn gettype_name(&self) -> &'static str {
        match self {
            Val::Null => "NULL",
            Val::Bool(_) => "boolean",
            Val::Int(_) => "integer",
            Val::Float(_) => "double",
            Val::String(_) => "string",
            Val::Array(_) => "array",
            Val::Object(_) | Val::Closure(_) => "object",
            Val::Reference(_) => "reference",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Val::Null)
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Val::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Convert to string following PHP's zend_make_printable_zval semantics.
    /// Objects print their class name; `__toString` dispatch is the VM's job.
    /// Reference: $PHP_SRC_PATH/Zend/zend_operators.c - zend_make_printable_zval
    pub fn to_php_string_bytes(&self) -> Vec<u8> {
        match self {
            Val::Null => Vec::new(),
            Val::Bool(b) => {
                if *b {
                    b"1".to_vec()
                } else {
                    Vec::new()
                }
            }
            Val::Int(i) => i.to_string().into_bytes(),
            Val::Float(f) => format_float(*f).into_bytes(),
            Val::String(s) => s.to_vec(),
            Val::Array(_) => b"Array".to_vec(),
            Val::Object(obj) => obj.borrow().class.as_bytes().to_vec(),
            Val::Closure(_) => b"Closure".to_vec(),
            Val::Reference(_) => Vec::new(),
        }
    }

    /// Convert to boolean following PHP's zend_is_true semantics
    /// Reference: $PHP_SRC_PATH/Zend/zend_operators.c - zend_is_true
    pub fn to_bool(&self) -> bool {
        match self {
            Val::Null => false,
            Val::Bool(b) => *b,
            Val::Int(i) => *i != 0,
            Val::Float(f) => *f != 0.0,
            Val::String(s) => !(s.is_empty() || (s.len() == 1 && s[0] == b'0')),
            Val::Array(arr) => !arr.is_empty(),
            Val::Object(_) | Val::Closure(_) => true,
            Val::Reference(_) => false,
        }
    }

    /// Convert to integer following PHP's convert_to_long semantics
    /// Reference: $PHP_SRC_PATH/Zend/zend_operators.c - convert_to_long
    pub fn to_int(&self) -> i64 {
        match self {
            Val::Null => 0,
            Val::Bool(b) => *b as i64,
            Val::Int(i) => *i,
            Val::Float(f) => float_to_int(*f),
            Val::String(s) => match parse_numeric_prefix(s).0 {
                Number::Int(i) => i,
                Number::Float(f) => float_to_int(f),
            },
            Val::Array(arr) => !arr.is_empty() as i64,
            Val::Object(_) | Val::Closure(_) => 1,
            Val::Reference(_) => 0,
        }
    }

    /// Convert to float following PHP's convert_to_double semantics
    /// Reference: $PHP_SRC_PATH/Zend/zend_operators.c - convert_to_double
    pub fn to_float(&self) -> f64 {
        match self {
            Val::Null => 0.0,
            Val::Bool(b) => *b as i64 as f64,
            Val::Int(i) => *i as f64,
            Val::Float(f) => *f,
            Val::String(s) => parse_numeric_prefix(s).0.to_f64(),
            Val::Array(arr) => !arr.is_empty() as i64 as f64,
            Val::Object(_) | Val::Closure(_) => 1.0,
            Val::Reference(_) => 0.0,
        }
    }

    /// Numeric view used by arithmetic: keeps ints as ints, numeric strings
    /// become int or float depending on their spelling.
    pub fn to_number(&self) -> Number {
        match self {
            Val::Int(i) => Number::Int(*i),
            Val::Float(f) => Number::Float(*f),
            Val::String(s) => parse_numeric_prefix(s).0,
            other => Number::Int(other.to_int()),
        }
    }

    /// True for ints, floats and fully numeric strings
    /// Reference: $PHP_SRC_PATH/Zend/zend_operators.c - is_numeric_string_ex
    pub fn is_numeric(&self) -> bool {
        match self {
            Val::Int(_) | Val::Float(_) => true,
            Val::String(s) => {
                let (_, whole) = parse_numeric_prefix(s);
                whole
            }
            _ => false,
        }
    }

    /// Convert a value into an array key following PHP's offset rules
    /// Reference: $PHP_SRC_PATH/Zend/zend_execute.c - zend_fetch_dimension_address_inner
    pub fn to_array_key(&self) -> Option<ArrayKey> {
        match self {
            Val::Int(i) => Some(ArrayKey::Int(*i)),
            Val::String(s) => Some(ArrayKey::from_bytes(s)),
            Val::Bool(b) => Some(ArrayKey::Int(*b as i64)),
            Val::Float(f) => Some(ArrayKey::Int(float_to_int(*f))),
            Val::Null => Some(ArrayKey::Str(Rc::new(Vec::new()))),
            _ => None,
        }
    }

    /// Array{Get}: element lookup, absent keys and non-arrays yield None
    pub fn array_get(&self, key: &ArrayKey) -> Option<&Val> {
        match self {
            Val::Array(arr) => arr.get(key),
            _ => None,
        }
    }

    /// Array{Set}: promotes null to an empty array first. `None` appends.
    pub fn array_set(&mut self, key: Option<ArrayKey>, value: Val) -> bool {
        if matches!(self, Val::Null) {
            *self = Val::empty_array();
        }
        match self {
            Val::Array(arr) => {
                let data = Rc::make_mut(arr);
                match key {
                    Some(k) => {
                        data.insert(k, value);
                    }
                    None => data.push(value),
                }
                true
            }
            _ => false,
        }
    }

    /// Array{Unset}
    pub fn array_unset(&mut self, key: &ArrayKey) -> Option<Val> {
        match self {
            Val::Array(arr) => Rc::make_mut(arr).remove(key),
            _ => None,
        }
    }

    /// Array{Count}
    pub fn array_count(&self) -> usize {
        match self {
            Val::Array(arr) => arr.len(),
            _ => 0,
        }
    }

    /// Object{Get}
    pub fn object_get(&self, name: &str) -> Option<Val> {
        match self {
            Val::Object(obj) => obj.borrow().get(name).cloned(),
            _ => None,
        }
    }

    /// Object{Set}
    pub fn object_set(&self, name: Rc<str>, value: Val) -> bool {
        match self {
            Val::Object(obj) => {
                obj.borrow_mut().set(name, value);
                true
            }
            _ => false,
        }
    }

    /// Object{Unset}
    pub fn object_unset(&self, name: &str) -> Option<Val> {
        match self {
            Val::Object(obj) => obj.borrow_mut().unset(name),
            _ => None,
        }
    }
}

fn float_to_int(f: f64) -> i64 {
    if f.is_nan() || f.is_infinite() {
        0
    } else {
        f as i64
    }
}

/// Format a float the way PHP echoes it (precision 14, trailing zeros dropped)
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "NAN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "INF" } else { "-INF" }.to_string();
    }
    if f.fract() == 0.0 && f.abs() < 1e15 {
        return format!("{:.0}", f);
    }
    // Round to 14 significant digits, then print the shortest representation
    let rounded = format!("{:.*e}", 13, f).parse::<f64>().unwrap_or(f);
    format!("{}", rounded)
}

/// Parse the leading numeric portion of a string.
/// Returns the number and whether the whole string (modulo surrounding
/// whitespace) was numeric.
/// Reference: $PHP_SRC_PATH/Zend/zend_operators.c - _is_numeric_string_ex
pub fn parse_numeric_prefix(s: &[u8]) -> (Number, bool) {
    let mut i = 0;
    while i < s.len() && matches!(s[i], b' ' | b'\t' | b'\n' | b'\r' | b'\x0b' | b'\x0c') {
        i += 1;
    }
    let start = i;
    if i < s.len() && (s[i] == b'+' || s[i] == b'-') {
        i += 1;
    }
    let int_start = i;
    while i < s.len() && s[i].is_ascii_digit() {
        i += 1;
    }
    let mut has_digits = i > int_start;
    let mut is_float = false;

    if i < s.len() && s[i] == b'.' {
        let frac_start = i + 1;
        let mut j = frac_start;
        while j < s.len() && s[j].is_ascii_digit() {
            j += 1;
        }
        if has_digits || j > frac_start {
            has_digits = true;
            is_float = true;
            i = j;
        }
    }

    if has_digits && i < s.len() && (s[i] == b'e' || s[i] == b'E') {
        let mut j = i + 1;
        if j < s.len() && (s[j] == b'+' || s[j] == b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < s.len() && s[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            is_float = true;
            i = j;
        }
    }

    if !has_digits {
        return (Number::Int(0), false);
    }

    let end = i;
    let mut k = end;
    while k < s.len() && matches!(s[k], b' ' | b'\t' | b'\n' | b'\r' | b'\x0b' | b'\x0c') {
        k += 1;
    }
    let whole = k == s.len();

    let text = std::str::from_utf8(&s[start..end]).unwrap_or("0");
    if !is_float {
        if let Ok(n) = text.parse::<i64>() {
            return (Number::Int(n), whole);
        }
    }
    (Number::Float(text.parse::<f64>().unwrap_or(0.0)), whole)
}
