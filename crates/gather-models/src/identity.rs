use serde::{Deserialize, Serialize};

/// Who a connection belongs to once the handshake completes. Created by the
/// registration flow; the gateway only ever reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
    /// Community reputation, carried through for display only.
    #[serde(default)]
    pub trust_level: i32,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            trust_level: 0,
        }
    }
}
