//! Independent session-row enrichment steps. Each resolver degrades
//! gracefully on its own data errors; none of them fails the row.

pub mod categories;
pub mod demographics;
pub mod geoip;
pub mod images;
pub mod inputs;
pub mod substitute;
