use crate::connection::Connection;

/// A protocol two peers may run over a [`Connection`], negotiated before any byte is exchanged.
///
/// The connection manager asks the local side whether it wants to initiate and the remote side
/// whether it accepts. Exactly one of `initiate_failed` / `accept_failed` / `run_protocol` follows
/// every positive answer, so implementations can release whatever they acquired while deciding.
pub trait PeerProtocol<C: Connection> {
    type Error;

    fn should_initiate(&mut self) -> bool;

    /// The peer declined after `should_initiate` returned `true`.
    fn initiate_failed(&mut self);

    fn should_accept(&mut self) -> bool;

    /// Something went wrong after `should_accept` returned `true`.
    fn accept_failed(&mut self);

    /// Whether to accept an incoming request for this protocol while our own is outstanding.
    fn accept_on_simultaneous_initiate(&self) -> bool;

    fn run_protocol(&mut self, connection: &C) -> Result<(), Self::Error>;
}
