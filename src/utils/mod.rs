pub mod time;

use serde::{Deserialize, Deserializer};

/// Deserialize `null` as the type's default.
///
/// The server stores collections in nullable JSON columns, so a list field can
/// arrive as `null` even when the schema says it is a list.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
