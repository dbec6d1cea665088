//! Static firewall policy checks, run before anything touches the host.

pub mod matcher;
pub mod validator;
