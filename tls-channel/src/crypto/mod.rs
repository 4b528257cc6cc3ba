/// Cipher suites and record protection built on *ring*.
pub mod ring;
