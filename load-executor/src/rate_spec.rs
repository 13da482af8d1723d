use linkload_http::ConstantRate;

pub trait RateScheme {
    fn next(&mut self, nth: u32, last_rate: Option<u32>) -> u32;
}

impl RateScheme for ConstantRate {
    #[inline]
    fn next(&mut self, _nth: u32, _last_rate: Option<u32>) -> u32 {
        self.count_per_sec
    }
}

/// Iterations to start in a cycle that only covers `fraction` of a time unit.
#[inline]
pub(crate) fn scaled(rate: u32, fraction: f64) -> u32 {
    (rate as f64 * fraction).round() as u32
}
