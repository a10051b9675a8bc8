pub mod candle;
pub mod recommendation;
pub mod signal;
pub mod tick;
