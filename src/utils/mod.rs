pub mod utils_time;

pub use utils_time::{current_time_ms, parse_instant_ms};
