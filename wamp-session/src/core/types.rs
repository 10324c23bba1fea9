//! Value types carried in WAMP messages.
//!
//! Positional arguments are a [`List`] of [`Value`]s and keyword arguments are a [`Dictionary`].
//! Rust types convert to and from values through [`WampSerialize`] and [`WampDeserialize`].

pub use battler_wamp_values::{
    Dictionary,
    Integer,
    List,
    Value,
    WampDeserialize,
    WampDeserializeError,
    WampSerialize,
    WampSerializeError,
};

/// Serializes a sequence of values into a positional argument list.
pub fn list_from_values<I, T>(values: I) -> Result<List, WampSerializeError>
where
    I: IntoIterator<Item = T>,
    T: WampSerialize,
{
    values
        .into_iter()
        .map(|value| value.wamp_serialize())
        .collect()
}
