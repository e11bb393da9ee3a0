//! Send pacing derived from the line rate.
//!
//! Slow lines get a longer gap between chunks so the transmitter never runs
//! ahead of what the UART can shift out. Pacing is sleep based and therefore
//! approximate.

use std::time::Duration;

/// Gap between two sender writes for `baud`.
pub fn pacing_interval(baud: u32) -> Duration {
    match baud {
        0..=300 => Duration::from_millis(250),
        301..=1200 => Duration::from_millis(50),
        _ => Duration::from_millis(10),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_rates() {
        assert_eq!(pacing_interval(9600), Duration::from_millis(10));
        assert_eq!(pacing_interval(300), Duration::from_millis(250));
        assert_eq!(pacing_interval(1200), Duration::from_millis(50));
    }

    #[test]
    fn test_band_edges() {
        assert_eq!(pacing_interval(50), Duration::from_millis(250));
        assert_eq!(pacing_interval(301), Duration::from_millis(50));
        assert_eq!(pacing_interval(600), Duration::from_millis(50));
        assert_eq!(pacing_interval(1201), Duration::from_millis(10));
        assert_eq!(pacing_interval(230400), Duration::from_millis(10));
    }
}
