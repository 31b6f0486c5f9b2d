//! Value representation for FHIRPath evaluation.
//!
//! Values are cheap to clone (Arc-shared). System primitives are stored
//! inline; FHIR elements and resources keep a shared handle into the JSON
//! tree they came from, so output collections alias the input without
//! copying.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Date precision levels according to the FHIRPath spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DatePrecision {
    Year,  // @2014
    Month, // @2014-01
    Day,   // @2014-01-01
}

/// Time precision levels according to the FHIRPath spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimePrecision {
    Hour,        // @T10
    Minute,      // @T10:30
    Second,      // @T10:30:00
    Millisecond, // @T10:30:00.000
}

/// DateTime precision levels according to the FHIRPath spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DateTimePrecision {
    Year,        // @2015T
    Month,       // @2015-02T
    Day,         // @2015-02-04T
    Hour,        // @2015-02-04T14
    Minute,      // @2015-02-04T14:30
    Second,      // @2015-02-04T14:30:00
    Millisecond, // @2015-02-04T14:30:00.000
}

impl DatePrecision {
    pub fn as_datetime_precision(self) -> DateTimePrecision {
        match self {
            DatePrecision::Year => DateTimePrecision::Year,
            DatePrecision::Month => DateTimePrecision::Month,
            DatePrecision::Day => DateTimePrecision::Day,
        }
    }
}

/// A FHIRPath value. Clones share the underlying data.
#[derive(Clone, PartialEq)]
pub struct Value(Arc<ValueData>);

/// Internal value data representation.
#[derive(Debug, Clone)]
pub enum ValueData {
    Boolean(bool),
    // FHIRPath Integer is 32-bit signed; arithmetic overflow is an error.
    Integer(i32),
    Decimal(Decimal),
    String(Arc<str>),
    Date {
        value: NaiveDate,
        precision: DatePrecision,
    },
    DateTime {
        value: DateTime<Utc>,
        precision: DateTimePrecision,
        /// Timezone offset in seconds east of UTC. `None` means the literal
        /// or source field carried no offset; `Some(0)` means `Z`.
        timezone_offset: Option<i32>,
    },
    Time {
        value: NaiveTime,
        precision: TimePrecision,
    },
    Quantity {
        value: Decimal,
        unit: Arc<str>,
    },
    /// A FHIR element or resource: a shared handle into the source JSON
    /// tree plus the FHIR type name when statically known.
    Element {
        json: Arc<JsonValue>,
        ty: Option<Arc<str>>,
    },
}

impl PartialEq for ValueData {
    fn eq(&self, other: &Self) -> bool {
        use ValueData::*;
        match (self, other) {
            (Boolean(l), Boolean(r)) => l == r,
            (Integer(l), Integer(r)) => l == r,
            (Decimal(l), Decimal(r)) => l == r,
            (String(l), String(r)) => l == r,
            (
                Date {
                    value: lv,
                    precision: lp,
                },
                Date {
                    value: rv,
                    precision: rp,
                },
            ) => lv == rv && lp == rp,
            (
                DateTime {
                    value: lv,
                    precision: lp,
                    timezone_offset: lt,
                },
                DateTime {
                    value: rv,
                    precision: rp,
                    timezone_offset: rt,
                },
            ) => lv == rv && lp == rp && lt == rt,
            (
                Time {
                    value: lv,
                    precision: lp,
                },
                Time {
                    value: rv,
                    precision: rp,
                },
            ) => lv == rv && lp == rp,
            (
                Quantity {
                    value: lv,
                    unit: lu,
                },
                Quantity {
                    value: rv,
                    unit: ru,
                },
            ) => lv == rv && lu == ru,
            // Elements compare structurally; the type annotation is advisory.
            (Element { json: l, .. }, Element { json: r, .. }) => {
                Arc::ptr_eq(l, r) || l == r
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Value {
    pub fn data(&self) -> &ValueData {
        &self.0
    }

    pub fn boolean(b: bool) -> Self {
        Self(Arc::new(ValueData::Boolean(b)))
    }

    pub fn integer(i: i32) -> Self {
        Self(Arc::new(ValueData::Integer(i)))
    }

    pub fn decimal(d: Decimal) -> Self {
        Self(Arc::new(ValueData::Decimal(d)))
    }

    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Self(Arc::new(ValueData::String(s.into())))
    }

    pub fn date(value: NaiveDate, precision: DatePrecision) -> Self {
        Self(Arc::new(ValueData::Date { value, precision }))
    }

    pub fn datetime(
        value: DateTime<Utc>,
        precision: DateTimePrecision,
        timezone_offset: Option<i32>,
    ) -> Self {
        Self(Arc::new(ValueData::DateTime {
            value,
            precision,
            timezone_offset,
        }))
    }

    pub fn time(value: NaiveTime, precision: TimePrecision) -> Self {
        Self(Arc::new(ValueData::Time { value, precision }))
    }

    pub fn quantity(value: Decimal, unit: impl Into<Arc<str>>) -> Self {
        Self(Arc::new(ValueData::Quantity {
            value,
            unit: unit.into(),
        }))
    }

    pub fn element(json: Arc<JsonValue>, ty: Option<Arc<str>>) -> Self {
        Self(Arc::new(ValueData::Element { json, ty }))
    }

    /// Convert a JSON node into a value with no type information.
    ///
    /// Nulls and arrays produce `None`: nulls are absent values, and arrays
    /// are flattened at the collection level (`Collection::from_json`).
    pub fn from_json(json: &JsonValue) -> Option<Self> {
        match json {
            JsonValue::Null => None,
            JsonValue::Bool(b) => Some(Self::boolean(*b)),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    i32::try_from(i).map(Self::integer).ok().or_else(|| {
                        Decimal::try_from(i).ok().map(Self::decimal)
                    })
                } else {
                    n.as_f64()
                        .and_then(|f| Decimal::from_f64_retain(f))
                        .map(Self::decimal)
                }
            }
            JsonValue::String(s) => Some(Self::string(s.as_str())),
            JsonValue::Object(obj) => {
                let ty = obj
                    .get("resourceType")
                    .and_then(|v| v.as_str())
                    .map(Arc::from);
                Some(Self::element(Arc::new(json.clone()), ty))
            }
            JsonValue::Array(_) => None,
        }
    }

    /// Wrap an already-shared JSON resource without copying it.
    pub fn resource(json: Arc<JsonValue>) -> Self {
        let ty = json
            .get("resourceType")
            .and_then(|v| v.as_str())
            .map(Arc::from);
        Self::element(json, ty)
    }

    /// The FHIR type annotation of an element, when known.
    pub fn element_type(&self) -> Option<&str> {
        match self.data() {
            ValueData::Element { ty, .. } => ty.as_deref(),
            _ => None,
        }
    }

    /// The `resourceType` of an element, read from the JSON itself.
    pub fn resource_type(&self) -> Option<&str> {
        match self.data() {
            ValueData::Element { json, .. } => {
                json.get("resourceType").and_then(|v| v.as_str())
            }
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Arc<JsonValue>> {
        match self.data() {
            ValueData::Element { json, .. } => Some(json),
            _ => None,
        }
    }

    /// The System type name of this value (`Boolean`, `Integer`, ...), or
    /// `None` for elements.
    pub fn system_type_name(&self) -> Option<&'static str> {
        match self.data() {
            ValueData::Boolean(_) => Some("Boolean"),
            ValueData::Integer(_) => Some("Integer"),
            ValueData::Decimal(_) => Some("Decimal"),
            ValueData::String(_) => Some("String"),
            ValueData::Date { .. } => Some("Date"),
            ValueData::DateTime { .. } => Some("DateTime"),
            ValueData::Time { .. } => Some("Time"),
            ValueData::Quantity { .. } => Some("Quantity"),
            ValueData::Element { .. } => None,
        }
    }
}

/// Threshold above which collections switch to Arc-shared storage so cloning
/// stays O(1).
const COLLECTION_ARC_THRESHOLD: usize = 4;

/// An ordered, heterogeneous sequence of values. The empty collection denotes
/// "unknown/absent". Optimized for the singleton case.
#[derive(Clone, Debug, PartialEq)]
pub struct Collection {
    inner: CollectionInner,
}

#[derive(Clone, Debug, PartialEq)]
enum CollectionInner {
    Small(SmallVec<[Value; 4]>),
    Large(Arc<SmallVec<[Value; 4]>>),
}

impl Collection {
    pub fn empty() -> Self {
        Self {
            inner: CollectionInner::Small(SmallVec::new()),
        }
    }

    pub fn singleton(value: Value) -> Self {
        let mut inner = SmallVec::new();
        inner.push(value);
        Self {
            inner: CollectionInner::Small(inner),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: CollectionInner::Small(SmallVec::with_capacity(capacity)),
        }
    }

    /// Flatten a JSON node into values: arrays spread element-wise, nulls
    /// vanish, everything else becomes a single value.
    pub fn from_json(json: &JsonValue) -> Self {
        let mut out = Self::empty();
        match json {
            JsonValue::Array(items) => {
                for item in items {
                    if let Some(v) = Value::from_json(item) {
                        out.push(v);
                    }
                }
            }
            other => {
                if let Some(v) = Value::from_json(other) {
                    out.push(v);
                }
            }
        }
        out
    }

    fn vec_mut(&mut self) -> &mut SmallVec<[Value; 4]> {
        if let CollectionInner::Large(arc) = &self.inner {
            self.inner = CollectionInner::Small((**arc).clone());
        }
        match &mut self.inner {
            CollectionInner::Small(vec) => vec,
            CollectionInner::Large(_) => unreachable!(),
        }
    }

    fn normalize(&mut self) {
        if let CollectionInner::Small(vec) = &self.inner {
            if vec.len() > COLLECTION_ARC_THRESHOLD {
                let vec = vec.clone();
                self.inner = CollectionInner::Large(Arc::new(vec));
            }
        }
    }

    pub fn push(&mut self, value: Value) {
        self.vec_mut().push(value);
        self.normalize();
    }

    pub fn extend(&mut self, other: &Collection) {
        if other.is_empty() {
            return;
        }
        let vec = self.vec_mut();
        vec.extend(other.iter().cloned());
        self.normalize();
    }

    fn as_slice(&self) -> &[Value] {
        match &self.inner {
            CollectionInner::Small(vec) => vec,
            CollectionInner::Large(arc) => arc,
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.as_slice().iter()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.as_slice().get(index)
    }

    pub fn first(&self) -> Option<&Value> {
        self.as_slice().first()
    }

    pub fn last(&self) -> Option<&Value> {
        self.as_slice().last()
    }

    /// The single value of this collection: `None` when empty, an arity
    /// error when more than one element is present.
    pub fn singleton_value(&self, what: &str) -> Result<Option<&Value>> {
        match self.len() {
            0 => Ok(None),
            1 => Ok(self.first()),
            n => Err(Error::WrongArity(format!(
                "{what} requires a singleton collection, got {n} items"
            ))),
        }
    }

    /// Singleton Boolean accessor. Empty yields `None`.
    pub fn singleton_boolean(&self, what: &str) -> Result<Option<bool>> {
        match self.singleton_value(what)? {
            None => Ok(None),
            Some(v) => match v.data() {
                ValueData::Boolean(b) => Ok(Some(*b)),
                _ => Err(Error::WrongType(format!("{what} expects a Boolean"))),
            },
        }
    }

    /// Singleton String accessor. Empty yields `None`.
    pub fn singleton_string(&self, what: &str) -> Result<Option<Arc<str>>> {
        match self.singleton_value(what)? {
            None => Ok(None),
            Some(v) => match v.data() {
                ValueData::String(s) => Ok(Some(s.clone())),
                _ => Err(Error::WrongType(format!("{what} expects a String"))),
            },
        }
    }

    /// Singleton Integer accessor. Empty yields `None`.
    pub fn singleton_integer(&self, what: &str) -> Result<Option<i32>> {
        match self.singleton_value(what)? {
            None => Ok(None),
            Some(v) => match v.data() {
                ValueData::Integer(i) => Ok(Some(*i)),
                _ => Err(Error::WrongType(format!("{what} expects an Integer"))),
            },
        }
    }
}

impl FromIterator<Value> for Collection {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        let mut out = Collection::empty();
        for v in iter {
            out.push(v);
        }
        out
    }
}

impl From<Vec<Value>> for Collection {
    fn from(values: Vec<Value>) -> Self {
        values.into_iter().collect()
    }
}
