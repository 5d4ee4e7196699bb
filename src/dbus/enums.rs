//! Forward-compatible decoding of enum values received from the host.
//!
//! Hosts add states and types over time. Decoding never fails on a value
//! that was unknown when this code was written: it yields
//! [`Decoded::Unknown`], which still compares equal to the raw value, and the
//! first sighting of each distinct value is reported once through an
//! [`UnknownValueSink`].

use std::{
    collections::HashSet,
    fmt::{self, Debug, Display},
    hash::{Hash, Hasher},
    sync::Mutex,
};

use tracing::warn;

use super::Value;

/// Records which unknown enum values have already been reported.
///
/// Constructed once at startup and shared by every decoder; tests create a
/// fresh one each.
#[derive(Debug, Default)]
pub struct UnknownValueSink {
    seen: Mutex<HashSet<(&'static str, String)>>,
}

impl UnknownValueSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports an unknown value. Emits a warning and returns `true` the
    /// first time a (type, value) pair is seen, `false` afterwards.
    pub fn report(&self, type_name: &'static str, raw: &dyn Display) -> bool {
        let key = (type_name, raw.to_string());
        let first = self
            .seen
            .lock()
            .map(|mut seen| seen.insert(key))
            .unwrap_or(false);

        if first {
            warn!(
                enum_type = type_name,
                value = %raw,
                "Host reported a value this version does not know; keeping it as-is"
            );
        }
        first
    }

    /// Number of distinct unknown values reported so far.
    pub fn reported(&self) -> usize {
        self.seen.lock().map(|seen| seen.len()).unwrap_or(0)
    }
}

/// An enum whose members map to raw wire values.
///
/// Implemented through [`wire_enum!`](crate::wire_enum).
pub trait WireEnum: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// Primitive carried on the wire.
    type Raw: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static;

    /// Name used in diagnostics.
    const TYPE_NAME: &'static str;

    /// Every declared member, in declaration order.
    fn members() -> &'static [Self];

    /// Raw wire value of this member.
    fn raw(&self) -> Self::Raw;

    /// Extracts the raw primitive from a bus value.
    fn raw_from_value(value: &Value) -> Option<Self::Raw>;

    /// Looks up a declared member.
    fn from_raw(raw: &Self::Raw) -> Option<Self> {
        Self::members().iter().copied().find(|member| &member.raw() == raw)
    }

    /// Decodes a raw value, reporting it to `sink` if it is not declared.
    fn decode(raw: Self::Raw, sink: &UnknownValueSink) -> Decoded<Self> {
        match Self::from_raw(&raw) {
            Some(member) => Decoded::Known(member),
            None => {
                sink.report(Self::TYPE_NAME, &raw);
                Decoded::Unknown(raw)
            }
        }
    }

    /// Decodes a bus value; `None` only when the value has the wrong type.
    fn decode_value(value: &Value, sink: &UnknownValueSink) -> Option<Decoded<Self>> {
        Self::raw_from_value(value).map(|raw| Self::decode(raw, sink))
    }
}

/// Result of decoding a wire value into `E`.
///
/// Equality and hashing go through the raw value, so an `Unknown` compares
/// equal to the primitive it was built from and a later `Known` member with
/// the same value.
#[derive(Clone)]
pub enum Decoded<E: WireEnum> {
    /// A declared member.
    Known(E),
    /// A value outside the declared set. Never listed by `E::members()`.
    Unknown(E::Raw),
}

impl<E: WireEnum> Decoded<E> {
    /// Raw wire value.
    pub fn raw(&self) -> E::Raw {
        match self {
            Self::Known(member) => member.raw(),
            Self::Unknown(raw) => raw.clone(),
        }
    }

    /// The declared member, if any.
    pub fn known(&self) -> Option<E> {
        match self {
            Self::Known(member) => Some(*member),
            Self::Unknown(_) => None,
        }
    }

    /// True for declared members.
    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }
}

impl<E: WireEnum> PartialEq for Decoded<E> {
    fn eq(&self, other: &Self) -> bool {
        self.raw() == other.raw()
    }
}

impl<E: WireEnum> Eq for Decoded<E> {}

impl<E: WireEnum> Hash for Decoded<E> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw().hash(state);
    }
}

impl<E: WireEnum> PartialEq<E> for Decoded<E> {
    fn eq(&self, other: &E) -> bool {
        self.raw() == other.raw()
    }
}

macro_rules! impl_raw_eq {
    ($($raw:ty),+ $(,)?) => {
        $(
            impl<E: WireEnum<Raw = $raw>> PartialEq<$raw> for Decoded<E> {
                fn eq(&self, other: &$raw) -> bool {
                    self.raw() == *other
                }
            }
        )+
    };
}

impl_raw_eq!(u8, u16, u32, u64, i16, i32, i64, String);

impl<'a, E: WireEnum<Raw = String>> PartialEq<&'a str> for Decoded<E> {
    fn eq(&self, other: &&'a str) -> bool {
        self.raw() == *other
    }
}

impl<E: WireEnum> From<E> for Decoded<E> {
    fn from(member: E) -> Self {
        Self::Known(member)
    }
}

impl<E: WireEnum> Debug for Decoded<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(member) => write!(f, "{member:?}"),
            Self::Unknown(raw) => write!(f, "{}({raw:?})", E::TYPE_NAME),
        }
    }
}

impl<E: WireEnum> Display for Decoded<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw())
    }
}
