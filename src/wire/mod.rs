//! Textual wire grammar.
//!
//! Every message is one top-level, attribute-tagged element terminated by a
//! newline. Outbound messages are rendered by [`writer`] straight into a
//! [`Transport`](crate::transport::Transport); inbound bytes are split into
//! messages by [`MessageDecoder`], parsed into [`Element`] trees, and applied
//! to shadow vectors by [`apply_snoop`].
//!
//! | element | direction | purpose |
//! |---|---|---|
//! | `def*Vector` | driver → client | first publication of a vector |
//! | `set*Vector` | driver → client | new values |
//! | `new*Vector` | client → driver | requested values |
//! | `delProperty` | driver → client | vector or whole device removed |
//! | `getProperties` | both | ask for definitions |
//! | `enableBLOB` | both | BLOB delivery preference |
//! | `message` | driver → client | free-text diagnostic |
//! | `pingRequest` / `pingReply` | both | liveness with a correlation uid |

mod decoder;
mod element;
mod escape;
pub(crate) mod snoop;
pub mod writer;

pub use decoder::MessageDecoder;
pub use element::Element;
pub use escape::escape;
pub use snoop::{apply_snoop, SnoopOutcome};

/// Protocol version advertised in `getProperties`.
pub const PROTOCOL_VERSION: &str = "1.7";

/// Column at which inline base64 is wrapped.
pub const BASE64_LINE_WIDTH: usize = 72;

/// Current UTC time as `YYYY-MM-DDTHH:MM:SS`.
pub fn timestamp_now() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}
