use serde::{Deserialize, Serialize};
use std::fmt;

/// A lexicographically-ordered version string derived from the upstream log
/// sequence number (§3 "Version / Watermark"). Bytewise `Ord` on the inner
/// string IS the watermark order — callers must never compare watermarks
/// from different upstreams or shards.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Watermark(String);

impl Watermark {
    pub fn new(raw: impl Into<String>) -> Self { Self(raw.into()) }

    pub fn as_str(&self) -> &str { &self.0 }

    /// The zero watermark: less than any watermark a real commit can produce.
    pub fn zero() -> Self { Self(String::new()) }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl From<String> for Watermark {
    fn from(s: String) -> Self { Self(s) }
}

impl From<&str> for Watermark {
    fn from(s: &str) -> Self { Self(s.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_bytewise_on_the_inner_string() {
        let a = Watermark::new("0000000100000001");
        let b = Watermark::new("0000000100000002");
        let c = Watermark::new("0000000200000000");
        assert!(a < b);
        assert!(b < c);
        assert!(Watermark::zero() < a);
    }
}
