pub mod config;
pub mod dhcp;
pub mod error;
pub mod handlers;
pub mod hw;
pub mod ndp;
pub mod packet;
pub mod state;
pub mod stats;
pub mod switch;
pub mod test_util;

pub use switch::Switch;
