//! Key traits
//!
//! Any ordered, hashable value can key a graph. Keys that also implement
//! [`GraphKey`] can be written to the binary formats, where every key is
//! stored as a length-prefixed byte string.

use std::fmt::Debug;
use std::hash::Hash;

use crate::error::{HnswError, Result};

/// Bounds required of a graph key
pub trait Key: Clone + Ord + Hash + Debug + Send + Sync + 'static {}

impl<T> Key for T where T: Clone + Ord + Hash + Debug + Send + Sync + 'static {}

/// Key with a byte encoding for persistence
pub trait GraphKey: Key {
    fn encode_key(&self) -> Vec<u8>;
    fn decode_key(bytes: &[u8]) -> Result<Self>;
}

impl GraphKey for String {
    fn encode_key(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| HnswError::protocol(format!("key is not valid UTF-8: {e}")))
    }
}

// Integer keys are stored as their decimal text so that files stay readable
// by string-keyed loaders.
macro_rules! impl_integer_key {
    ($($t:ty),*) => {
        $(
            impl GraphKey for $t {
                fn encode_key(&self) -> Vec<u8> {
                    self.to_string().into_bytes()
                }

                fn decode_key(bytes: &[u8]) -> Result<Self> {
                    let text = std::str::from_utf8(bytes)
                        .map_err(|e| HnswError::protocol(format!("key is not valid UTF-8: {e}")))?;
                    text.parse::<$t>().map_err(|e| {
                        HnswError::protocol(format!(
                            "cannot parse key {:?} as {}: {}",
                            text,
                            stringify!($t),
                            e
                        ))
                    })
                }
            }
        )*
    };
}

impl_integer_key!(i32, i64, u32, u64, usize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_keys() {
        for key in ["", "a", "hello world", "键值🔑"] {
            let encoded = key.to_string().encode_key();
            assert_eq!(String::decode_key(&encoded).unwrap(), key);
        }
        assert!(String::decode_key(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_integer_keys() {
        assert_eq!(i64::decode_key(&(-42i64).encode_key()).unwrap(), -42);
        assert_eq!(u64::decode_key(&u64::MAX.encode_key()).unwrap(), u64::MAX);
        assert_eq!(u32::decode_key(b"7").unwrap(), 7);
        assert!(matches!(
            u32::decode_key(b"-1"),
            Err(HnswError::Protocol(_))
        ));
        assert!(i32::decode_key(b"abc").is_err());
    }
}
