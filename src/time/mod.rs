pub mod clock;
pub mod expiry;
pub mod session;

pub use clock::{Clock, SimClock, WallClock};
pub use expiry::{next_expiry_from_calendar, resolve_expiry};
pub use session::{is_market_open, is_trading_day, parse_window_time, trading_date, within_window};
