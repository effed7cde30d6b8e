pub mod backend;
pub mod channel;
pub mod chat;
pub mod config;
pub mod handlers;
pub mod housekeeping;
pub mod login;
pub mod multiplayer;
pub mod presence;
pub mod routes;
pub mod server;
pub mod session;
pub mod spectator;
