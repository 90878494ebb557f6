//! Typed façades over the daemon's management surface
//!
//! Pure parameter marshalling: each manager turns typed options into
//! a JSON-RPC parameter object and calls through the client. No state
//! lives here.

pub mod accounts;
pub mod contacts;
pub mod devices;
pub mod groups;
pub mod stickers;

pub use accounts::AccountManager;
pub use contacts::ContactManager;
pub use devices::DeviceManager;
pub use groups::GroupManager;
pub use stickers::StickerManager;

use serde_json::{json, Value};

/// Guess whether a recipient string names a group rather than a phone
/// number
///
/// The daemon gives us no structural tag, so this mirrors its own
/// heuristic: group ids are base64-ish (`=`, `/`, or a `+` anywhere
/// but the leading position), phone numbers are not. Known to be a
/// heuristic; do not "fix" it without a stronger protocol invariant.
pub fn is_group_id(recipient: &str) -> bool {
    recipient.contains('=')
        || recipient.contains('/')
        || recipient
            .char_indices()
            .any(|(i, c)| c == '+' && i > 0)
}

/// Base parameter object addressing a recipient, group or direct
pub fn recipient_params(recipient: &str) -> Value {
    if is_group_id(recipient) {
        json!({ "groupId": recipient })
    } else {
        json!({ "recipient": [recipient] })
    }
}
