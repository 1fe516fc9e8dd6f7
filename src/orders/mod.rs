pub mod fills;

pub use fills::exit_fill_price;
