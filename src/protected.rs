use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// A secret string kept XOR-masked with a random pad while it sits in memory.
///
/// The clear text only exists transiently, inside the value returned by
/// [`ProtectedValue::reveal`]. Both buffers are wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ProtectedValue {
    masked: Vec<u8>,
    pad: Vec<u8>,
}

impl ProtectedValue {
    pub fn from_text(text: &str) -> Self {
        let bytes = text.as_bytes();
        let mut pad = vec![0u8; bytes.len()];
        OsRng.fill_bytes(&mut pad);
        let masked = bytes.iter().zip(&pad).map(|(b, p)| b ^ p).collect();
        Self { masked, pad }
    }

    fn unmasked(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(
            self.masked
                .iter()
                .zip(&self.pad)
                .map(|(m, p)| m ^ p)
                .collect(),
        )
    }

    pub fn reveal(&self) -> String {
        // Built from a &str, so the unmasked bytes are always valid UTF-8.
        String::from_utf8_lossy(&self.unmasked()).into_owned()
    }

    pub fn len(&self) -> usize {
        self.masked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masked.is_empty()
    }
}

impl PartialEq for ProtectedValue {
    fn eq(&self, other: &Self) -> bool {
        *self.unmasked() == *other.unmasked()
    }
}

impl fmt::Debug for ProtectedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProtectedValue(***)")
    }
}

// Serialized in clear text: protected values only ever reach disk inside the
// encrypted container payload.
impl Serialize for ProtectedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let clear = Zeroizing::new(self.reveal());
        serializer.serialize_str(&clear)
    }
}

impl<'de> Deserialize<'de> for ProtectedValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let clear = Zeroizing::new(String::deserialize(deserializer)?);
        Ok(Self::from_text(&clear))
    }
}
