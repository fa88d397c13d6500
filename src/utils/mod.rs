pub mod retry;

pub use retry::{with_single_retry, RetryTimer};
