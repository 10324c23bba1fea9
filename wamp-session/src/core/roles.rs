use std::fmt::Display;

/// A role a session advertises to the router when joining a realm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerRole {
    // Calls procedures.
    Caller,
    // Registers procedures.
    Callee,
    // Publishes events to topics.
    Publisher,
    // Subscribes to topics.
    Subscriber,
}

impl PeerRole {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Caller => "caller",
            Self::Callee => "callee",
            Self::Publisher => "publisher",
            Self::Subscriber => "subscriber",
        }
    }
}

impl Display for PeerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
