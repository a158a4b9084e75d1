//! The bootstrap state machines and the credential rotation loop.

use std::time::Duration;

use tokio::time::Instant;

mod follower;
mod health;
mod leader;
mod rotation;

pub use follower::*;
pub use health::*;
pub use leader::*;
pub use rotation::*;

/// `Instant::now() + limit`, clamped instead of overflowing.
pub(crate) fn deadline_after(limit: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(limit)
        .unwrap_or_else(|| now + Duration::from_secs(30 * 86_400))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn huge_limit_does_not_overflow_test() {
        let deadline = deadline_after(Duration::MAX);
        assert!(deadline > Instant::now());
        let near = deadline_after(Duration::from_millis(10));
        assert!(near <= Instant::now() + Duration::from_millis(10));
    }
}
