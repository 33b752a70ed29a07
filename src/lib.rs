pub mod error;
pub mod logging;
pub mod nc_utils;
pub mod utils;
