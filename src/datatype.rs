// used for dates, wall-clock times and instants
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
// used to resolve IANA zone names ("New_York") to offsets
use chrono_tz::Tz;
// used for the city -> zone lookup built once per process
use lazy_static::lazy_static;
// used to validate ref names
use regex::Regex;
// tag maps preserve insertion order for deterministic output
use indexmap::IndexMap;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use crate::grid::Grid;
use crate::units;

// ------------- Number -------------

/// A finite or non-finite double with an optional unit tag.
///
/// The unit is part of the value's identity: `1kg != 1`. No unit conversion
/// is performed; aliases are folded through [`crate::units::canonical`] at
/// construction. NaN compares by bit pattern so equality stays total.
#[derive(Debug, Clone)]
pub struct Number {
    value: f64,
    unit: Option<String>,
}

impl Number {
    pub fn new(value: f64, unit: Option<&str>) -> Self {
        let unit = match unit {
            Some(u) if !u.is_empty() => Some(units::canonical(u).to_string()),
            _ => None,
        };
        Self { value, unit }
    }
    pub fn value(&self) -> f64 {
        self.value
    }
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        let same = self.value == other.value || self.value.to_bits() == other.value.to_bits();
        same && self.unit == other.unit
    }
}
impl Eq for Number {}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.value.is_nan() {
            return write!(f, "NaN");
        }
        if self.value.is_infinite() {
            return write!(f, "{}INF", if self.value < 0.0 { "-" } else { "" });
        }
        write!(f, "{}", self.value)?;
        if let Some(unit) = &self.unit {
            write!(f, "{}", unit)?;
        }
        Ok(())
    }
}

// ------------- Ref -------------

/// An opaque entity identifier, with an optional human readable display
/// string. Equality and ordering consider the name only.
#[derive(Debug, Clone)]
pub struct Ref {
    name: String,
    dis: Option<String>,
}

impl Ref {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), dis: None }
    }
    pub fn with_dis(name: impl Into<String>, dis: impl Into<String>) -> Self {
        Self { name: name.into(), dis: Some(dis.into()) }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn dis(&self) -> Option<&str> {
        self.dis.as_deref()
    }
    /// Ref names are restricted to `a-zA-Z0-9_:-.~`.
    pub fn is_valid_name(name: &str) -> bool {
        lazy_static! {
            static ref REF_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_:\-.~]+$").unwrap();
        }
        REF_NAME.is_match(name)
    }
}

impl PartialEq for Ref {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}
impl Eq for Ref {}
impl PartialOrd for Ref {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Ref {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}
impl std::hash::Hash for Ref {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

// ------------- Coord -------------

/// A 2D coordinate in degrees latitude and longitude.
#[derive(Debug, Clone)]
pub struct Coord {
    lat: f64,
    lng: f64,
}

impl Coord {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
    pub fn lat(&self) -> f64 {
        self.lat
    }
    pub fn lng(&self) -> f64 {
        self.lng
    }
}

impl PartialEq for Coord {
    fn eq(&self, other: &Self) -> bool {
        (self.lat == other.lat || self.lat.to_bits() == other.lat.to_bits())
            && (self.lng == other.lng || self.lng.to_bits() == other.lng.to_bits())
    }
}
impl Eq for Coord {}

// ------------- Bin and XStr -------------

/// A MIME-tagged binary payload reference (Haystack 2.0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bin {
    mime: String,
}

impl Bin {
    pub fn new(mime: impl Into<String>) -> Self {
        Self { mime: mime.into() }
    }
    pub fn mime(&self) -> &str {
        &self.mime
    }
}

/// A named extension scalar carrying an encoded payload (Haystack 3.0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XStr {
    encoding: String,
    data: String,
}

impl XStr {
    pub fn new(encoding: impl Into<String>, data: impl Into<String>) -> Self {
        Self { encoding: encoding.into(), data: data.into() }
    }
    pub fn encoding(&self) -> &str {
        &self.encoding
    }
    pub fn data(&self) -> &str {
        &self.data
    }
}

// ------------- DateTimeTz -------------

lazy_static! {
    // Haystack names zones by city ("New_York"); chrono-tz knows the full
    // IANA name ("America/New_York"). First region in iteration order wins
    // for the handful of ambiguous city names.
    static ref CITY_ZONES: HashMap<&'static str, Tz> = {
        let mut m = HashMap::new();
        for tz in chrono_tz::TZ_VARIANTS.iter() {
            let name = tz.name();
            let city = name.rsplit('/').next().unwrap_or(name);
            m.entry(city).or_insert(*tz);
        }
        m
    };
}

/// An instant paired with the Haystack zone name it was expressed in.
///
/// The zone name is part of the value's identity: the same instant tagged
/// `New_York` and `Chicago` are different values.
#[derive(Debug, Clone)]
pub struct DateTimeTz {
    stamp: DateTime<FixedOffset>,
    zone: String,
}

impl DateTimeTz {
    /// Re-expresses `stamp` in the named zone. Fails when the zone name is
    /// neither a known city, `UTC`/`GMT`, nor a `UTC±h`/`GMT±h` offset.
    pub fn new(stamp: DateTime<FixedOffset>, zone: &str) -> Option<Self> {
        let stamp = match zone_offset(zone, &stamp)? {
            ZoneKind::Fixed(offset) => stamp.with_timezone(&offset),
            ZoneKind::Named(tz) => {
                let local = stamp.with_timezone(&tz);
                local.with_timezone(&local.offset().fix())
            }
        };
        Some(Self { stamp, zone: zone.to_string() })
    }

    /// The current instant in UTC.
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            stamp: now.with_timezone(&FixedOffset::east_opt(0).unwrap()),
            zone: "UTC".to_string(),
        }
    }

    /// An instant already carrying the offset of its zone.
    pub fn from_parts(stamp: DateTime<FixedOffset>, zone: impl Into<String>) -> Self {
        Self { stamp, zone: zone.into() }
    }

    pub fn from_utc(stamp: DateTime<Utc>) -> Self {
        Self {
            stamp: stamp.with_timezone(&FixedOffset::east_opt(0).unwrap()),
            zone: "UTC".to_string(),
        }
    }

    pub fn stamp(&self) -> DateTime<FixedOffset> {
        self.stamp
    }
    pub fn zone(&self) -> &str {
        &self.zone
    }
    pub fn to_utc(&self) -> DateTime<Utc> {
        self.stamp.with_timezone(&Utc)
    }
}

enum ZoneKind {
    Fixed(FixedOffset),
    Named(Tz),
}

fn zone_offset(zone: &str, _at: &DateTime<FixedOffset>) -> Option<ZoneKind> {
    if zone == "UTC" || zone == "GMT" {
        return Some(ZoneKind::Fixed(FixedOffset::east_opt(0)?));
    }
    for prefix in ["UTC", "GMT"] {
        if let Some(rest) = zone.strip_prefix(prefix) {
            if rest == "0" {
                return Some(ZoneKind::Fixed(FixedOffset::east_opt(0)?));
            }
            if let Ok(hours) = rest.parse::<i32>() {
                return Some(ZoneKind::Fixed(FixedOffset::east_opt(hours * 3600)?));
            }
        }
    }
    CITY_ZONES.get(zone).map(|tz| ZoneKind::Named(*tz))
}

/// Localizes a naive ISO stamp that carried no offset of its own.
pub fn localize(naive: chrono::NaiveDateTime, zone: &str) -> Option<DateTimeTz> {
    match zone_offset(zone, &Utc::now().fixed_offset())? {
        ZoneKind::Fixed(offset) => {
            let stamp = offset.from_local_datetime(&naive).earliest()?;
            Some(DateTimeTz::from_parts(stamp, zone))
        }
        ZoneKind::Named(tz) => {
            let local = tz.from_local_datetime(&naive).earliest()?;
            let stamp = local.with_timezone(&local.offset().fix());
            Some(DateTimeTz::from_parts(stamp, zone))
        }
    }
}

impl PartialEq for DateTimeTz {
    fn eq(&self, other: &Self) -> bool {
        self.stamp == other.stamp && self.zone == other.zone
    }
}
impl Eq for DateTimeTz {}

impl PartialOrd for DateTimeTz {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.stamp.cmp(&other.stamp))
    }
}

impl fmt::Display for DateTimeTz {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let date = self.stamp.date_naive();
        let time = self.stamp.time();
        write!(f, "{}T{}", date.format("%Y-%m-%d"), format_time(&time))?;
        if self.stamp.offset().local_minus_utc() == 0 && (self.zone == "UTC" || self.zone == "GMT") {
            write!(f, "Z")?;
        } else {
            write!(f, "{}", self.stamp.format("%:z"))?;
        }
        write!(f, " {}", self.zone)
    }
}

/// Wall-clock time in Zinc form, with millisecond precision when non-zero.
pub fn format_time(time: &NaiveTime) -> String {
    use chrono::Timelike;
    let millis = time.nanosecond() / 1_000_000;
    if millis == 0 {
        time.format("%H:%M:%S").to_string()
    } else {
        format!("{}.{:03}", time.format("%H:%M:%S"), millis)
    }
}

// ------------- Dict -------------

/// An insertion-ordered tag map. Equality is order-insensitive; iteration
/// and serialization follow insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dict(IndexMap<String, Value>);

impl Dict {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }
    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(name.into(), value)
    }
    /// Inserts a bare Marker tag.
    pub fn mark(&mut self, name: impl Into<String>) {
        self.0.insert(name.into(), Value::Marker);
    }
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.shift_remove(name)
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn iter(&self) -> indexmap::map::Iter<'_, String, Value> {
        self.0.iter()
    }
    pub fn keys(&self) -> indexmap::map::Keys<'_, String, Value> {
        self.0.keys()
    }
}

impl FromIterator<(String, Value)> for Dict {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Dict {
    type Item = (&'a String, &'a Value);
    type IntoIter = indexmap::map::Iter<'a, String, Value>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for Dict {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

// ------------- Value -------------

/// The tagged sum of every Haystack value. Values are immutable once
/// constructed; equality is structural throughout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Marker,
    Remove,
    Na,
    Bool(bool),
    Number(Number),
    Str(String),
    Uri(String),
    Ref(Ref),
    Bin(Bin),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(DateTimeTz),
    Coord(Coord),
    XStr(XStr),
    List(Vec<Value>),
    Dict(Dict),
    Grid(Box<Grid>),
}

impl Value {
    pub fn number(value: f64) -> Self {
        Value::Number(Number::new(value, None))
    }
    pub fn quantity(value: f64, unit: &str) -> Self {
        Value::Number(Number::new(value, Some(unit)))
    }
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }
    pub fn reference(name: impl Into<String>) -> Self {
        Value::Ref(Ref::new(name))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Haystack truthiness used by bare filter paths: present, not Null and
    /// not `false`.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Bool(false))
    }

    pub fn as_ref_value(&self) -> Option<&Ref> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Ordering used by filter comparisons. `None` means the two values are
    /// not comparable: different kinds, unit mismatch, or a kind without a
    /// defined order (Bool is equality-only, Marker and friends likewise).
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => {
                if a.unit() != b.unit() {
                    return None;
                }
                a.value().partial_cmp(&b.value())
            }
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Uri(a), Value::Uri(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}
