use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use rmpv::Value;
use rmpv::ext::from_value;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CoreError, ValidationError};
use crate::hlc::Hlc;
use crate::identity::{WriterIdentity, verify_signature};
use crate::ids::*;

pub type TagSet = BTreeSet<String>;

/// The per-image attribute a change entry writes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Tags,
    CustomFilename,
    /// Whether the image is part of the catalog. Written by add/remove, never by `apply`.
    Presence,
    /// A field added by a newer version. Kept in the log, ignored by the projection.
    Unknown(String),
}

impl Field {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Tags => "tags",
            Self::CustomFilename => "custom_filename",
            Self::Presence => "presence",
            Self::Unknown(name) => name,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }

    /// Name written in entry bodies.
    fn wire_name(&self) -> &str {
        match self {
            Self::Tags => "Tags",
            Self::CustomFilename => "CustomFilename",
            Self::Presence => "Presence",
            Self::Unknown(name) => name,
        }
    }

    fn from_wire_name(name: &str) -> Self {
        match name {
            "Tags" => Self::Tags,
            "CustomFilename" => Self::CustomFilename,
            "Presence" => Self::Presence,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Parses user-facing field names; only editable fields are accepted.
impl FromStr for Field {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "tags" => Ok(Self::Tags),
            "custom_filename" | "filename" => Ok(Self::CustomFilename),
            _ => Err(ValidationError::InvalidField(s.to_string())),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.wire_name())
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_wire_name(&name))
    }
}

/// Encoded as a one-entry map `{variant: value}`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Tags(TagSet),
    Filename(Option<String>),
    Presence(bool),
    /// Value of a field this version does not know, carried byte-for-byte.
    Opaque { variant: String, value: Value },
}

impl FieldValue {
    pub fn field(&self) -> Field {
        match self {
            Self::Tags(_) => Field::Tags,
            Self::Filename(_) => Field::CustomFilename,
            Self::Presence(_) => Field::Presence,
            Self::Opaque { variant, .. } => Field::Unknown(variant.clone()),
        }
    }

    /// Whether this value can be written to `field`. Unknown fields accept any
    /// opaque value, since a newer version may name its values differently.
    pub fn fits(&self, field: &Field) -> bool {
        match (self, field) {
            (Self::Opaque { .. }, Field::Unknown(_)) => true,
            (Self::Opaque { .. }, _) | (_, Field::Unknown(_)) => false,
            (value, field) => &value.field() == field,
        }
    }

    /// Value of `field` on an image that has never been written.
    pub fn initial(field: &Field) -> Self {
        match field {
            Field::Tags => Self::Tags(TagSet::new()),
            Field::CustomFilename => Self::Filename(None),
            Field::Presence => Self::Presence(false),
            Field::Unknown(name) => Self::Opaque {
                variant: name.clone(),
                value: Value::Nil,
            },
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tags(tags) => {
                let joined: Vec<&str> = tags.iter().map(String::as_str).collect();
                write!(f, "{{{}}}", joined.join(", "))
            }
            Self::Filename(Some(name)) => write!(f, "{name:?}"),
            Self::Filename(None) => f.write_str("(none)"),
            Self::Presence(true) => f.write_str("present"),
            Self::Presence(false) => f.write_str("removed"),
            Self::Opaque { value, .. } => write!(f, "{value}"),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Self::Tags(tags) => map.serialize_entry("Tags", tags)?,
            Self::Filename(name) => map.serialize_entry("Filename", name)?,
            Self::Presence(present) => map.serialize_entry("Presence", present)?,
            Self::Opaque { variant, value } => map.serialize_entry(variant.as_str(), value)?,
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (key, value) = match Value::deserialize(deserializer)? {
            Value::Map(mut pairs) if pairs.len() == 1 => pairs.remove(0),
            other => {
                return Err(D::Error::custom(format!(
                    "field value must be a one-entry map, got {other}"
                )));
            }
        };
        let variant = key
            .as_str()
            .ok_or_else(|| D::Error::custom("field value tag is not a string"))?
            .to_string();
        match variant.as_str() {
            "Tags" => from_value(value).map(Self::Tags).map_err(D::Error::custom),
            "Filename" => from_value(value).map(Self::Filename).map_err(D::Error::custom),
            "Presence" => from_value(value).map(Self::Presence).map_err(D::Error::custom),
            _ => Ok(Self::Opaque { variant, value }),
        }
    }
}

/// Why an entry was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    Edit,
    Undo { of: EntryId },
    Redo { of: EntryId },
    /// Revival written by a merge when a concurrent edit beat a deletion.
    MergeRestore,
}

/// One immutable record in a catalog's change log.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEntry {
    /// Position in this copy's log (1-based). Not signed: merges re-sequence.
    pub seq: u64,
    pub entry_id: EntryId,
    pub image: ImageKey,
    pub field: Field,
    pub old: FieldValue,
    pub new: FieldValue,
    pub hlc: Hlc,
    pub writer: WriterId,
    pub origin: Origin,
    /// Body keys written by newer versions; carried through rewrites untouched.
    pub unknown: BTreeMap<String, Value>,
    pub signature: Signature,
}

/// Keys of the msgpack body map this version understands.
const KNOWN_KEYS: [&str; 9] = [
    "entry_id",
    "image",
    "field",
    "old",
    "new",
    "hlc",
    "writer",
    "origin",
    "signature",
];

#[derive(Serialize)]
struct SignedContent<'a> {
    entry_id: &'a EntryId,
    image: &'a ImageKey,
    field: &'a Field,
    old: &'a FieldValue,
    new: &'a FieldValue,
    hlc: &'a Hlc,
    writer: &'a WriterId,
    origin: &'a Origin,
}

#[derive(Serialize, Deserialize)]
struct EntryBody {
    entry_id: EntryId,
    image: ImageKey,
    field: Field,
    old: FieldValue,
    new: FieldValue,
    hlc: Hlc,
    writer: WriterId,
    origin: Origin,
    signature: Signature,
}

fn ser_err(e: impl fmt::Display) -> CoreError {
    CoreError::Serialization(e.to_string())
}

/// Encode `known` as a named map and append the opaque `unknown` pairs.
fn encode_with_unknown<T: Serialize>(
    known: &T,
    unknown: &BTreeMap<String, Value>,
) -> Result<Vec<u8>, CoreError> {
    let bytes = rmp_serde::to_vec_named(known).map_err(ser_err)?;
    if unknown.is_empty() {
        return Ok(bytes);
    }
    let mut pairs = match rmpv::decode::read_value(&mut bytes.as_slice()).map_err(ser_err)? {
        Value::Map(pairs) => pairs,
        _ => return Err(CoreError::Serialization("entry body is not a map".into())),
    };
    for (key, value) in unknown {
        pairs.push((Value::from(key.as_str()), value.clone()));
    }
    let mut out = Vec::with_capacity(bytes.len());
    rmpv::encode::write_value(&mut out, &Value::Map(pairs)).map_err(ser_err)?;
    Ok(out)
}

impl ChangeEntry {
    /// Build and sign an entry. `seq` is assigned when the entry is appended to a log.
    pub fn new_signed(
        identity: &WriterIdentity,
        hlc: Hlc,
        image: ImageKey,
        old: FieldValue,
        new: FieldValue,
        origin: Origin,
    ) -> Result<Self, CoreError> {
        let field = new.field();
        if !old.fits(&field) {
            return Err(CoreError::InvalidData(format!(
                "old value is {} but new value is {}",
                old.field(),
                field
            )));
        }
        let entry_id = EntryId::new();
        let writer = identity.writer_id();
        let unknown = BTreeMap::new();
        let message = encode_with_unknown(
            &SignedContent {
                entry_id: &entry_id,
                image: &image,
                field: &field,
                old: &old,
                new: &new,
                hlc: &hlc,
                writer: &writer,
                origin: &origin,
            },
            &unknown,
        )?;
        let signature = identity.sign(&message);

        Ok(Self {
            seq: 0,
            entry_id,
            image,
            field,
            old,
            new,
            hlc,
            writer,
            origin,
            unknown,
            signature,
        })
    }

    /// Bytes covered by the signature: the body without `signature`.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, CoreError> {
        encode_with_unknown(
            &SignedContent {
                entry_id: &self.entry_id,
                image: &self.image,
                field: &self.field,
                old: &self.old,
                new: &self.new,
                hlc: &self.hlc,
                writer: &self.writer,
                origin: &self.origin,
            },
            &self.unknown,
        )
    }

    pub fn verify_signature(&self) -> Result<(), CoreError> {
        let message = self.signing_bytes()?;
        verify_signature(&self.writer, &self.entry_id, &message, &self.signature)
    }

    /// Self-describing msgpack map of everything but `seq`.
    pub fn to_body(&self) -> Result<Vec<u8>, CoreError> {
        encode_with_unknown(
            &EntryBody {
                entry_id: self.entry_id,
                image: self.image.clone(),
                field: self.field.clone(),
                old: self.old.clone(),
                new: self.new.clone(),
                hlc: self.hlc,
                writer: self.writer,
                origin: self.origin,
                signature: self.signature,
            },
            &self.unknown,
        )
    }

    pub fn from_body(seq: u64, bytes: &[u8]) -> Result<Self, CoreError> {
        let pairs = match rmpv::decode::read_value(&mut &bytes[..]).map_err(ser_err)? {
            Value::Map(pairs) => pairs,
            _ => return Err(CoreError::Serialization("entry body is not a map".into())),
        };

        let mut known = Vec::with_capacity(KNOWN_KEYS.len());
        let mut unknown = BTreeMap::new();
        for (key, value) in pairs {
            let name = key
                .as_str()
                .ok_or_else(|| CoreError::Serialization("entry body key is not a string".into()))?
                .to_string();
            if KNOWN_KEYS.contains(&name.as_str()) {
                known.push((key, value));
            } else {
                unknown.insert(name, value);
            }
        }

        let mut buf = Vec::with_capacity(bytes.len());
        rmpv::encode::write_value(&mut buf, &Value::Map(known)).map_err(ser_err)?;
        let body: EntryBody = rmp_serde::from_slice(&buf).map_err(ser_err)?;

        if !body.old.fits(&body.field) || !body.new.fits(&body.field) {
            return Err(CoreError::InvalidData(format!(
                "entry {} values do not match field {}",
                body.entry_id, body.field
            )));
        }

        Ok(Self {
            seq,
            entry_id: body.entry_id,
            image: body.image,
            field: body.field,
            old: body.old,
            new: body.new,
            hlc: body.hlc,
            writer: body.writer,
            origin: body.origin,
            unknown,
            signature: body.signature,
        })
    }

    /// Log order shared by every copy: timestamp, then writer id, then entry id.
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.hlc
            .cmp(&other.hlc)
            .then_with(|| self.writer.cmp(&other.writer))
            .then_with(|| self.entry_id.cmp(&other.entry_id))
    }

    /// True when replaying the entry leaves the value unchanged (e.g. re-adding a tag).
    pub fn is_noop(&self) -> bool {
        self.old == self.new
    }
}
