//! `grpc-timeout` deadlines.
//!
//! Wire form: one to eight ASCII digits followed by a single unit letter,
//! e.g. `10S`, `500m`, `2H`. Stored as the original amount/unit pair so
//! serialization reproduces the received header bit-exactly.

use std::time::Duration;

/// Unit letter of a `grpc-timeout` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutUnit {
    /// `H` - hours.
    Hours,
    /// `M` - minutes.
    Minutes,
    /// `S` - seconds.
    Seconds,
    /// `m` - milliseconds.
    Millis,
    /// `u` - microseconds.
    Micros,
    /// `n` - nanoseconds.
    Nanos,
}

impl TimeoutUnit {
    fn letter(self) -> char {
        match self {
            TimeoutUnit::Hours => 'H',
            TimeoutUnit::Minutes => 'M',
            TimeoutUnit::Seconds => 'S',
            TimeoutUnit::Millis => 'm',
            TimeoutUnit::Micros => 'u',
            TimeoutUnit::Nanos => 'n',
        }
    }

    fn from_letter(letter: u8) -> Option<Self> {
        match letter {
            b'H' => Some(TimeoutUnit::Hours),
            b'M' => Some(TimeoutUnit::Minutes),
            b'S' => Some(TimeoutUnit::Seconds),
            b'm' => Some(TimeoutUnit::Millis),
            b'u' => Some(TimeoutUnit::Micros),
            b'n' => Some(TimeoutUnit::Nanos),
            _ => None,
        }
    }
}

/// Maximum amount expressible on the wire (eight digits).
const MAX_AMOUNT: u64 = 99_999_999;

/// A parsed `grpc-timeout` deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    amount: u64,
    unit: TimeoutUnit,
}

impl Timeout {
    /// Build a timeout; `None` if `amount` exceeds the eight-digit wire
    /// limit.
    pub fn new(amount: u64, unit: TimeoutUnit) -> Option<Self> {
        (amount <= MAX_AMOUNT).then_some(Self { amount, unit })
    }

    /// Pick the finest unit that can express `duration` within eight
    /// digits. Durations beyond ~99999999 hours saturate.
    pub fn from_duration(duration: Duration) -> Self {
        let nanos = duration.as_nanos();
        let candidates = [
            (TimeoutUnit::Nanos, 1u128),
            (TimeoutUnit::Micros, 1_000),
            (TimeoutUnit::Millis, 1_000_000),
            (TimeoutUnit::Seconds, 1_000_000_000),
            (TimeoutUnit::Minutes, 60 * 1_000_000_000),
            (TimeoutUnit::Hours, 3600 * 1_000_000_000),
        ];
        for (unit, scale) in candidates {
            if nanos % scale == 0 && nanos / scale <= MAX_AMOUNT as u128 {
                return Self {
                    amount: (nanos / scale) as u64,
                    unit,
                };
            }
        }
        // Not exactly expressible: round up in the finest unit that fits.
        for (unit, scale) in candidates {
            let amount = nanos.div_ceil(scale);
            if amount <= MAX_AMOUNT as u128 {
                return Self {
                    amount: amount as u64,
                    unit,
                };
            }
        }
        Self {
            amount: MAX_AMOUNT,
            unit: TimeoutUnit::Hours,
        }
    }

    /// The deadline as a [`Duration`].
    pub fn to_duration(self) -> Duration {
        match self.unit {
            TimeoutUnit::Hours => Duration::from_secs(self.amount * 3600),
            TimeoutUnit::Minutes => Duration::from_secs(self.amount * 60),
            TimeoutUnit::Seconds => Duration::from_secs(self.amount),
            TimeoutUnit::Millis => Duration::from_millis(self.amount),
            TimeoutUnit::Micros => Duration::from_micros(self.amount),
            TimeoutUnit::Nanos => Duration::from_nanos(self.amount),
        }
    }

    /// Parse a `grpc-timeout` header value.
    pub fn parse(value: &[u8]) -> Option<Self> {
        if value.len() < 2 || value.len() > 9 {
            return None;
        }
        let (digits, unit) = value.split_at(value.len() - 1);
        let unit = TimeoutUnit::from_letter(unit[0])?;
        if !digits.iter().all(u8::is_ascii_digit) {
            return None;
        }
        let amount: u64 = std::str::from_utf8(digits).ok()?.parse().ok()?;
        Some(Self { amount, unit })
    }

    /// Render the wire value, e.g. `10S`.
    pub fn wire_value(self) -> String {
        format!("{}{}", self.amount, self.unit.letter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_every_unit() {
        let cases: [(&[u8], Duration); 6] = [
            (b"2H", Duration::from_secs(7200)),
            (b"3M", Duration::from_secs(180)),
            (b"10S", Duration::from_secs(10)),
            (b"500m", Duration::from_millis(500)),
            (b"250u", Duration::from_micros(250)),
            (b"999n", Duration::from_nanos(999)),
        ];
        for (wire, expected) in cases {
            let timeout = Timeout::parse(wire).unwrap();
            assert_eq!(timeout.to_duration(), expected);
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Timeout::parse(b"").is_none());
        assert!(Timeout::parse(b"S").is_none());
        assert!(Timeout::parse(b"10").is_none());
        assert!(Timeout::parse(b"10X").is_none());
        assert!(Timeout::parse(b"1 0S").is_none());
        // Nine digits exceed the wire limit.
        assert!(Timeout::parse(b"123456789S").is_none());
    }

    #[test]
    fn test_wire_round_trip() {
        for wire in ["1H", "99999999n", "500m", "0S"] {
            let timeout = Timeout::parse(wire.as_bytes()).unwrap();
            assert_eq!(timeout.wire_value(), wire);
        }
    }

    #[test]
    fn test_from_duration_picks_finest_fitting_unit() {
        // 10s is 10^10 ns: too many digits as nanos, exact as micros.
        assert_eq!(
            Timeout::from_duration(Duration::from_secs(10)).wire_value(),
            "10000000u"
        );
        assert_eq!(
            Timeout::from_duration(Duration::from_nanos(250)).wire_value(),
            "250n"
        );
        // Round-trips through the duration it encodes.
        let t = Timeout::from_duration(Duration::from_millis(1500));
        assert_eq!(t.to_duration(), Duration::from_millis(1500));
    }

    #[test]
    fn test_new_rejects_over_limit() {
        assert!(Timeout::new(100_000_000, TimeoutUnit::Seconds).is_none());
        assert!(Timeout::new(99_999_999, TimeoutUnit::Seconds).is_some());
    }
}
