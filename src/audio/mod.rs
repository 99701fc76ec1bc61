// Audio capture side - device input to the sample ring
//
// The capture callback owns only the producer half of the ring; everything
// downstream of the ring runs on the graph worker. No allocation, locking,
// or blocking happens inside the callback beyond the ring's atomic index
// protocol.

pub mod capture;
pub mod ring;

pub use capture::CaptureStream;
pub use ring::{sample_ring, RingConsumer, RingProducer};
