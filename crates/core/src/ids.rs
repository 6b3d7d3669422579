use std::fmt;
use std::path::{Component, Path};

use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::ValidationError;

/// Accepts either a msgpack `bin` or a sequence of integers and yields a fixed-size array.
pub(crate) struct ByteArrayVisitor<const N: usize>;

impl<'de, const N: usize> Visitor<'de> for ByteArrayVisitor<N> {
    type Value = [u8; N];

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{N} bytes")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        v.try_into().map_err(|_| E::invalid_length(v.len(), &self))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut out = [0u8; N];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = seq
                .next_element()?
                .ok_or_else(|| de::Error::invalid_length(i, &self))?;
        }
        if seq.next_element::<u8>()?.is_some() {
            return Err(de::Error::invalid_length(N + 1, &self));
        }
        Ok(out)
    }
}

macro_rules! byte_id {
    ($name:ident, $len:expr, $short:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name([u8; $len]);

        impl $name {
            pub fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn from_slice(bytes: &[u8]) -> Result<Self, crate::CoreError> {
                let arr: [u8; $len] = bytes.try_into().map_err(|_| {
                    crate::CoreError::InvalidData(format!(
                        "{} must be {} bytes, got {}",
                        stringify!($name),
                        $len,
                        bytes.len()
                    ))
                })?;
                Ok(Self(arr))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_bytes(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserializer
                    .deserialize_bytes(ByteArrayVisitor::<$len>)
                    .map(Self)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(", stringify!($name))?;
                for byte in &self.0[..$short] {
                    write!(f, "{:02x}", byte)?;
                }
                write!(f, ")")
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for byte in &self.0[..$short] {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    };
}

// Writer ids are ed25519 public keys.
byte_id!(WriterId, 32, 8);
byte_id!(Signature, 64, 4);
byte_id!(ContentHash, 32, 8);

impl ContentHash {
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Globally unique identity of a change entry, stable across catalog copies.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(Uuid);

impl EntryId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, crate::CoreError> {
        Uuid::from_slice(bytes)
            .map(Self)
            .map_err(|e| crate::CoreError::InvalidData(format!("entry id: {e}")))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Serialize for EntryId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(self.0.as_bytes())
    }
}

impl<'de> Deserialize<'de> for EntryId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer
            .deserialize_bytes(ByteArrayVisitor::<16>)
            .map(Self::from_bytes)
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", &self.0.to_string()[..8])
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of an image: its path relative to the library root, `/`-separated.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageKey(String);

impl ImageKey {
    pub fn new(key: impl Into<String>) -> Result<Self, ValidationError> {
        let key = key.into();
        let key = key.trim();
        if key.is_empty() {
            return Err(ValidationError::EmptyImageKey);
        }
        Ok(Self(key.replace('\\', "/")))
    }

    /// Key for `path` relative to `root`. Paths outside `root`, or any path when
    /// `root` is empty, keep their root and drive prefix so they never collide
    /// with keys inside it.
    pub fn relative_to(root: &Path, path: &Path) -> Result<Self, ValidationError> {
        let (relative, outside) = match path.strip_prefix(root) {
            Ok(rest) if !root.as_os_str().is_empty() => (rest, false),
            _ => (path, true),
        };
        let mut key = String::new();
        for component in relative.components() {
            let part = match component {
                Component::Prefix(prefix) if outside => {
                    key.push_str(&prefix.as_os_str().to_string_lossy());
                    continue;
                }
                Component::RootDir if outside => {
                    key.push('/');
                    continue;
                }
                Component::Normal(part) => part.to_string_lossy(),
                Component::ParentDir => "..".into(),
                _ => continue,
            };
            if !key.is_empty() && !key.ends_with('/') {
                key.push('/');
            }
            key.push_str(&part);
        }
        Self::new(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File stem of the last path segment, used as the display name when no
    /// custom filename is set.
    pub fn stem(&self) -> &str {
        let name = self.0.rsplit('/').next().unwrap_or(&self.0);
        match name.rfind('.') {
            Some(0) | None => name,
            Some(dot) => &name[..dot],
        }
    }
}

impl fmt::Debug for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageKey({:?})", self.0)
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for ImageKey {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
