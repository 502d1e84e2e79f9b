//! Domain records stored and replicated by the service.

use serde::{Deserialize, Serialize};

/// A registered account. Password is stored as given; the original
/// system's hashing step is a client/GUI concern and out of scope here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub password: String,
}

/// A single chat message, owned by the recipient's mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub sender: String,
    pub recipient: String,
    pub body: String,
    pub read: bool,
    /// `MM/DD HH:MM`-formatted send time, stamped once by the accepting
    /// replica and replicated verbatim so followers don't re-derive it.
    pub timestamp: String,
}
