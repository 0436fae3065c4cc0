use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::CacheError;

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CacheError> {
    Ok(serde_json::to_vec(value)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CacheError> {
    Ok(serde_json::from_slice(bytes)?)
}
