mod http_client;
mod retry;

pub use http_client::build_host_client;
pub use retry::{RetryPolicy, RetryingClient, Sleeper, StatusClass, TokioSleeper, classify_status};
