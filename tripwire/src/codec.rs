//! Key derivation and value encoding for cached query results.

use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use shared::{Error, Result};
use std::sync::Arc;

/// Deterministic identifier of one query input
pub type CacheKey = String;

/// Error type returned by user supplied callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type KeySerializer<I> = Arc<dyn Fn(&I) -> std::result::Result<CacheKey, BoxError> + Send + Sync>;
pub type ValueSerializer<O> = Arc<dyn Fn(&O) -> std::result::Result<String, BoxError> + Send + Sync>;
pub type ValueDeserializer<O> = Arc<dyn Fn(&str) -> std::result::Result<O, BoxError> + Send + Sync>;

const PREVIEW_MAX_CHARS: usize = 50;
const KEY_SEPARATOR: char = '.';

/// Derive a cache key from the full textual representation of an input
///
/// The key is a readable preview of the text followed by the hex SHA-256 of
/// the exact text, so truncating the preview never costs uniqueness.
pub fn key_from_text(text: &str) -> CacheKey {
    let mut preview = String::with_capacity(text.len());
    for ch in text.chars() {
        let ch = match ch {
            '{' | '}' | '[' | ']' | '(' | ')' | ':' | ',' | '"' | '\'' | ' ' => '_',
            other => other,
        };
        if !(ch.is_ascii_alphanumeric() || ch == '_') {
            continue;
        }
        // collapse runs of underscores
        if ch == '_' && preview.ends_with('_') {
            continue;
        }
        preview.push(ch);
    }
    let preview: String = preview
        .trim_matches('_')
        .chars()
        .take(PREVIEW_MAX_CHARS)
        .collect();

    let digest = Sha256::digest(text.as_bytes());
    format!("{}{}{}", preview, KEY_SEPARATOR, hex::encode(digest))
}

/// Default key serializer: JSON text of the input, in field declaration order
pub fn default_key<I: Serialize>(input: &I) -> Result<CacheKey> {
    let text = serde_json::to_string(input)
        .map_err(|e| Error::Serialization(format!("Failed to serialize key: {}", e)))?;
    Ok(key_from_text(&text))
}

/// Key and value codec used by one query cache
pub struct KeyCodec<I, O> {
    key: KeySerializer<I>,
    serialize_value: ValueSerializer<O>,
    deserialize_value: ValueDeserializer<O>,
}

impl<I, O> Clone for KeyCodec<I, O> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            serialize_value: self.serialize_value.clone(),
            deserialize_value: self.deserialize_value.clone(),
        }
    }
}

impl<I, O> std::fmt::Debug for KeyCodec<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCodec").finish_non_exhaustive()
    }
}

impl<I, O> KeyCodec<I, O>
where
    I: Serialize,
    O: Serialize + DeserializeOwned,
{
    /// JSON keys and JSON values
    pub fn json() -> Self {
        Self {
            key: Arc::new(|input: &I| -> std::result::Result<CacheKey, BoxError> {
                let text = serde_json::to_string(input)?;
                Ok(key_from_text(&text))
            }),
            serialize_value: Arc::new(|output: &O| -> std::result::Result<String, BoxError> {
                Ok(serde_json::to_string(output)?)
            }),
            deserialize_value: Arc::new(|text: &str| -> std::result::Result<O, BoxError> {
                Ok(serde_json::from_str(text)?)
            }),
        }
    }
}

impl<I, O> Default for KeyCodec<I, O>
where
    I: Serialize,
    O: Serialize + DeserializeOwned,
{
    fn default() -> Self {
        Self::json()
    }
}

impl<I, O> KeyCodec<I, O> {
    /// Fully custom codec for inputs and outputs that are not serde types
    pub fn custom<K, S, D>(key: K, serialize_value: S, deserialize_value: D) -> Self
    where
        K: Fn(&I) -> std::result::Result<CacheKey, BoxError> + Send + Sync + 'static,
        S: Fn(&O) -> std::result::Result<String, BoxError> + Send + Sync + 'static,
        D: Fn(&str) -> std::result::Result<O, BoxError> + Send + Sync + 'static,
    {
        Self {
            key: Arc::new(key),
            serialize_value: Arc::new(serialize_value),
            deserialize_value: Arc::new(deserialize_value),
        }
    }

    pub fn with_key_serializer<K>(mut self, key: K) -> Self
    where
        K: Fn(&I) -> std::result::Result<CacheKey, BoxError> + Send + Sync + 'static,
    {
        self.key = Arc::new(key);
        self
    }

    /// Replace both value directions together; they must round-trip
    pub fn with_value_codec<S, D>(mut self, serialize_value: S, deserialize_value: D) -> Self
    where
        S: Fn(&O) -> std::result::Result<String, BoxError> + Send + Sync + 'static,
        D: Fn(&str) -> std::result::Result<O, BoxError> + Send + Sync + 'static,
    {
        self.serialize_value = Arc::new(serialize_value);
        self.deserialize_value = Arc::new(deserialize_value);
        self
    }

    pub fn serialize_key(&self, input: &I) -> Result<CacheKey> {
        (self.key)(input).map_err(|e| Error::Serialization(format!("Failed to serialize key: {}", e)))
    }

    pub fn serialize_value(&self, output: &O) -> Result<String> {
        (self.serialize_value)(output)
            .map_err(|e| Error::Serialization(format!("Failed to serialize value: {}", e)))
    }

    pub fn deserialize_value(&self, text: &str) -> Result<O> {
        (self.deserialize_value)(text)
            .map_err(|e| Error::Serialization(format!("Failed to deserialize value: {}", e)))
    }
}
