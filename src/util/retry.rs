/// プロバイダ呼び出しの再試行バックオフ（Full Jitter方式）。
use std::time::Duration;

use rand::Rng;

/// 再試行回数と遅延幅の設定。
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryConfig {
    /// 総試行回数の上限（初回を含む）
    pub(crate) max_attempts: usize,
    /// 指数バックオフの基準遅延（ミリ秒）
    pub(crate) base_delay_ms: u64,
    /// 遅延の上限（ミリ秒）
    pub(crate) max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 10000,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub(crate) const fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// `attempt` 回目（0起点）の再試行前に待つ時間。
    ///
    /// 上限 `base * 2^(attempt-1)` を `max_delay_ms` でキャップし、
    /// その範囲から一様に抽選します（Full Jitter）。
    #[must_use]
    pub(crate) fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        let shift = u32::try_from(attempt - 1).unwrap_or(u32::MAX);
        let factor = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
        let exponential_delay = self.base_delay_ms.saturating_mul(factor);

        let capped_delay = exponential_delay.min(self.max_delay_ms);

        let jittered_delay = if capped_delay > 0 {
            let mut rng = rand::rng();
            rng.random_range(0..=capped_delay)
        } else {
            0
        };

        Duration::from_millis(jittered_delay)
    }

    /// サーバー指定の待機ヒント（Retry-After等）を優先した遅延時間を返す。
    ///
    /// ヒントは `max_delay_ms` でキャップされます。ヒントがない場合は
    /// 通常のFull Jitter遅延を返します。
    #[must_use]
    pub(crate) fn delay_with_hint(&self, attempt: usize, hint: Option<Duration>) -> Duration {
        match hint {
            Some(hinted) => hinted.min(Duration::from_millis(self.max_delay_ms)),
            None => self.delay_for_attempt(attempt),
        }
    }

    /// `attempt` 回の試行後にまだ再試行枠が残っているか。
    #[must_use]
    pub(crate) const fn can_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}
