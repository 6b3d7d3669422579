pub mod entry;
pub mod error;
pub mod hlc;
pub mod identity;
pub mod ids;
pub mod mutation;
pub mod vector_clock;

pub use entry::{ChangeEntry, Field, FieldValue, Origin, TagSet};
pub use error::{CoreError, ValidationError};
pub use hlc::{Hlc, HlcClock};
pub use identity::WriterIdentity;
pub use ids::*;
pub use mutation::Mutation;
pub use vector_clock::VectorClock;
