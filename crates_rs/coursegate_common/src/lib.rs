//! Request gating for the course Mini-App: a probe-banning shield and an
//! access gate that only admits clients with Telegram identity proof.

pub mod access_gate;
pub mod bot_shield;
pub mod client_ip;
pub mod cookie_jar;
pub mod init_data;
pub mod request_class;
pub mod secret_policy;
pub mod token;
