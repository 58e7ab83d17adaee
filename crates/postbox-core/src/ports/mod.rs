//! Ports - 抽象化レイヤー
//!
//! Capabilities the core depends on but that tests want to swap out.

pub mod clock;

pub use self::clock::{Clock, FixedClock, SystemClock};
