pub mod cookies;
pub mod rate_limit;
