pub mod types;
pub mod quantity;
pub mod price;
pub mod config;
pub mod error;

pub use types::*;
pub use quantity::{QuantityParseError, QuantitySpec, Unit};
pub use price::{parse_price, PriceEncoding, PriceParseError};
pub use config::{Config, ExtractionStrategy};
pub use error::PriceScoutError;
