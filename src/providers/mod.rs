pub mod exchangerates;
pub mod rate_limiter;
pub mod util;

pub use exchangerates::ExchangeRatesFetcher;
pub use rate_limiter::RateLimiter;
