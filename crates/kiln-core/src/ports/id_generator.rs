//! IdGenerator port
//!
//! ジョブ ID は一度払い出したら再利用しない。同じミリ秒内に複数の
//! submit が来ても、単調増加の ULID で衝突と順序の逆転を防ぐ。

use std::sync::Mutex;
use std::time::SystemTime;

use ulid::{Generator, Ulid};

use crate::domain::JobId;
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_job_id(&self) -> JobId;
}

/// Monotonic ULIDs stamped with the injected clock.
///
/// With a `FixedClock` every id shares the timestamp part and the random part
/// keeps increasing.
pub struct UlidGenerator<C> {
    clock: C,
    state: Mutex<Generator>,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            state: Mutex::new(Generator::new()),
        }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_job_id(&self) -> JobId {
        let now = SystemTime::from(self.clock.now());
        let next = match self.state.lock() {
            Ok(mut generator) => generator.generate_from_datetime(now).ok(),
            Err(_) => None,
        };
        // 乱数部が桁あふれした（または lock が poisoned）ときは非単調で払い出す
        let ulid = next.unwrap_or_else(|| {
            let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
            Ulid::from_parts(timestamp_ms, rand::random())
        });
        JobId::from(ulid)
    }
}
