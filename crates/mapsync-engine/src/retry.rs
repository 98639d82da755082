use std::time::Duration;

/// Poll `attempt` until it yields a value, sleeping a fixed interval
/// between tries, for at most `max_attempts` tries. The first attempt runs
/// immediately.
///
/// This is the single bounded-wait primitive for every "DOM-equivalent not
/// ready yet" situation: widget remount after a re-layout, focus
/// reassertion, view readiness.
pub async fn retry_until<T>(
    mut attempt: impl FnMut() -> Option<T>,
    max_attempts: u32,
    interval: Duration,
) -> Option<T> {
    for n in 0..max_attempts {
        if let Some(value) = attempt() {
            return Some(value);
        }
        if n + 1 < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }
    None
}
