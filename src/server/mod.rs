pub mod budget;
pub mod handlers;
pub mod protocol;
pub mod server;
pub mod state;
pub mod tools;

pub use server::{serve_stdio, serve_tcp};
pub use state::{DaemonState, PlanModeFlag};
