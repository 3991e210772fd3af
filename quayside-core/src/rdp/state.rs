//! Connection phase tracking

use std::fmt;

/// Phases of the server-side connection sequence.
///
/// The receive path dispatches on this state exhaustively: every delivered
/// stream runs exactly one handshake acceptor, or the active-phase
/// demultiplexer once `Active` is reached. States advance monotonically;
/// the only backward transition is `Active` to `License` during a
/// server-initiated reactivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Waiting for the X.224 connection request
    #[default]
    Initial,
    /// X.224 negotiation answered, waiting for MCS Connect-Initial
    Nego,
    /// MCS domain connected, waiting for Erect-Domain
    McsConnect,
    /// Waiting for Attach-User
    McsErectDomain,
    /// Waiting for the channel joins
    McsAttachUser,
    /// All channels joined, waiting for the client info packet
    McsChannelJoin,
    /// Licensing answered, waiting for Confirm-Active
    License,
    /// Session is activated; data and fast-path PDUs flow
    Active,
}

impl ConnectionState {
    /// True once the handshake has completed and the demultiplexer owns the
    /// receive path.
    pub fn is_active(self) -> bool {
        self == ConnectionState::Active
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Initial => "initial",
            ConnectionState::Nego => "nego",
            ConnectionState::McsConnect => "mcs-connect",
            ConnectionState::McsErectDomain => "mcs-erect-domain",
            ConnectionState::McsAttachUser => "mcs-attach-user",
            ConnectionState::McsChannelJoin => "mcs-channel-join",
            ConnectionState::License => "license",
            ConnectionState::Active => "active",
        };
        write!(f, "{name}")
    }
}
