pub mod buffer_pool;
pub mod chunk;
pub mod config;
pub mod error;
pub mod objects;
pub mod packet;
mod peer;
pub mod pipe;
mod recv_queue;
mod send_queue;
mod transport;
mod uri;
mod worker;

pub mod prelude;
