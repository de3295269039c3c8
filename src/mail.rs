mod message;
mod sender;

pub use message::Email;
pub use sender::{send_email, smtp_transport};

#[cfg(test)]
pub(crate) use sender::testing;
