//! Bounded producer/consumer buffering between capture threads and the
//! single-threaded scheduler.

mod ring;

pub use ring::RingBuffer;
