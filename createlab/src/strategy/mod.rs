//! Command strategies.
//!
//! A strategy is one unit of protocol logic: it knows how to encode a
//! command, push it through a transport and interpret what comes back. The
//! queue worker hands each strategy exclusive access to the transport for
//! the duration of [`CommandStrategy::execute`].
//!
//! | Strategy | Transport | Response |
//! |---|---|---|
//! | [`NoReturnValueStrategy`] | serial | success flag |
//! | [`FixedReturnValueStrategy`] | serial | exactly N bytes |
//! | [`VariableLengthReturnValueStrategy`] | serial | header + length-prefixed body |
//! | [`HandshakeStrategy`] | serial | success flag, after a settle delay |
//! | [`HidCommandStrategy`] | HID | report payload matching the command id |
//!
//! New protocol shapes implement [`CommandStrategy`] directly.

pub mod fixed;
pub mod handshake;
pub mod hid;
pub mod no_return;
pub mod variable;

pub use fixed::FixedReturnValueStrategy;
pub use handshake::{DEFAULT_SETTLE_DELAY, HandshakeStrategy};
pub use hid::HidCommandStrategy;
pub use no_return::NoReturnValueStrategy;
pub use variable::VariableLengthReturnValueStrategy;

use crate::{command::CommandResponse, error::Result};

/// One executable unit of protocol logic against a transport `T`.
///
/// Implementations must bound every read and write in time: the queue's
/// outer timeout cannot interrupt a blocked strategy.
pub trait CommandStrategy<T: ?Sized>: Send {
    /// Run the exchange and describe the outcome.
    ///
    /// Timeouts and echo failures are reported through the returned
    /// [`CommandResponse`]; `Err` is reserved for transport failures.
    fn execute(&mut self, io: &mut T) -> Result<CommandResponse>;

    /// Short label used in log messages.
    fn label(&self) -> String {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full).to_string()
    }
}

impl<T: ?Sized, S: CommandStrategy<T> + ?Sized> CommandStrategy<T> for Box<S> {
    fn execute(&mut self, io: &mut T) -> Result<CommandResponse> {
        (**self).execute(io)
    }

    fn label(&self) -> String {
        (**self).label()
    }
}
