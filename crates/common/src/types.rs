//! Identifier types for SFU components.
//!
//! Every identifier is a UUID newtype so a producer id can never be passed
//! where a consumer id is expected. On the wire they serialize as the plain
//! hyphenated UUID string.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random identifier
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a signaling connection (one participant).
    ConnectionId
);

uuid_id!(
    /// Unique identifier for a media router.
    RouterId
);

uuid_id!(
    /// Unique identifier for a WebRTC transport.
    TransportId
);

uuid_id!(
    /// Unique identifier for a published media stream.
    ProducerId
);

uuid_id!(
    /// Unique identifier for a subscribed copy of a producer.
    ConsumerId
);
