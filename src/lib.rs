//! Syzygy - Device-Link Authorization Service
//!
//! Pairs a screen-constrained TV client with a Dropbox account: the TV
//! starts a flow and shows a QR code, the phone completes consent on the
//! provider's hosted page, and the server issues the TV first-party
//! access/refresh tokens decoupled from the provider's own. The server
//! half runs from `main`; the client half (API client, adaptive poller,
//! provider data client) is the library surface the TV app links against.

pub mod client;
pub mod device;
pub mod dropbox;
pub mod errors;
pub mod flow;
pub mod poller;
pub mod provider;
pub mod security;
pub mod settings;
pub mod store;
pub mod web;
