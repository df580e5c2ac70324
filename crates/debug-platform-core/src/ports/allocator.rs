//! PortAllocator: validation and storage of the stub-port configuration.

use std::collections::BTreeSet;

use thiserror::Error;

use super::map::{PortMap, StubPortContext};
use super::{in_stub_window, HIGH_PORT, LOW_PORT};

/// A single port value that could not be accepted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortValueError {
    /// The text is not an unsigned integer in decimal, `0x` hex or `0` octal.
    #[error("invalid port number string {0}")]
    NotNumeric(String),

    /// The number parsed but falls outside the stub-port window.
    #[error("port number {value} is not in the valid user port range of {LOW_PORT} - {HIGH_PORT}")]
    OutOfRange { value: u64 },
}

/// Error type for [`PortAllocator::configure`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortError {
    #[error(transparent)]
    InvalidPortValue(#[from] PortValueError),

    /// The range's lower bound is strictly greater than its upper bound.
    #[error("minimum stub port ({low}) is greater than maximum stub port ({high})")]
    InvalidPortRange { low: u16, high: u16 },
}

/// One stub-port configuration directive.
///
/// Several directives may be applied to the same allocator: an offset and a
/// map coexist, and successive sets or ranges accumulate into one map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubPortSpec {
    Unset,
    /// Default stub port is the client-facing listen port plus this offset.
    FixedOffset(u16),
    ExplicitSet(BTreeSet<u16>),
    /// Half-open: `low` is included, `high` is not.  `low == high` is empty.
    Range { low: u16, high: u16 },
}

/// Validates stub-port directives and stores the result.
///
/// # Example
///
/// ```rust
/// use debug_platform_core::{PortAllocator, StubPortSpec};
///
/// let mut ports = PortAllocator::new();
/// ports.configure(StubPortSpec::Range { low: 6000, high: 6003 }).unwrap();
/// assert_eq!(ports.map().ports().collect::<Vec<_>>(), vec![6000, 6001, 6002]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortAllocator {
    offset: Option<u16>,
    map: PortMap,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one directive.
    ///
    /// Every value is checked against `[LOW_PORT, HIGH_PORT]` before anything
    /// is stored, so a failed call leaves the allocator unchanged.
    ///
    /// # Errors
    ///
    /// [`PortError::InvalidPortValue`] for a value outside the window and
    /// [`PortError::InvalidPortRange`] when `low > high`.
    pub fn configure(&mut self, spec: StubPortSpec) -> Result<(), PortError> {
        match spec {
            StubPortSpec::Unset => {}
            StubPortSpec::FixedOffset(offset) => {
                check_window(offset)?;
                self.offset = Some(offset);
            }
            StubPortSpec::ExplicitSet(ports) => {
                for &port in &ports {
                    check_window(port)?;
                }
                for port in ports {
                    self.map.insert_unassigned(port);
                }
            }
            StubPortSpec::Range { low, high } => {
                check_window(low)?;
                check_window(high)?;
                if low > high {
                    return Err(PortError::InvalidPortRange { low, high });
                }
                for port in low..high {
                    self.map.insert_unassigned(port);
                }
            }
        }
        Ok(())
    }

    /// The configured listen-port offset, if any.
    pub fn offset(&self) -> Option<u16> {
        self.offset
    }

    /// The broker-held port map.
    pub fn map(&self) -> &PortMap {
        &self.map
    }

    /// Returns `true` when neither an offset nor any map entry is configured.
    pub fn is_unconfigured(&self) -> bool {
        self.offset.is_none() && self.map.is_empty()
    }

    /// Produces the private copy a protocol engine does its claiming in.
    pub fn context(&self) -> StubPortContext {
        StubPortContext::new(self.map.clone(), self.offset)
    }
}

fn check_window(port: u16) -> Result<(), PortValueError> {
    if in_stub_window(u64::from(port)) {
        Ok(())
    } else {
        Err(PortValueError::OutOfRange {
            value: u64::from(port),
        })
    }
}

/// Parses a port argument the way `strtoul(raw, &end, 0)` would, then checks
/// it against the stub-port window.
///
/// Accepts decimal, `0x`/`0X` hexadecimal and leading-zero octal, with an
/// optional `+` sign.  The whole string must be consumed.
///
/// # Errors
///
/// [`PortValueError::NotNumeric`] when the text is not a number and
/// [`PortValueError::OutOfRange`] when the number is outside
/// `[LOW_PORT, HIGH_PORT]`.
pub fn parse_port_value(raw: &str) -> Result<u16, PortValueError> {
    let value = parse_unsigned_auto_radix(raw)
        .ok_or_else(|| PortValueError::NotNumeric(raw.to_string()))?;
    if !in_stub_window(value) {
        return Err(PortValueError::OutOfRange { value });
    }
    // In-window values always fit.
    u16::try_from(value).map_err(|_| PortValueError::OutOfRange { value })
}

fn parse_unsigned_auto_radix(raw: &str) -> Option<u64> {
    let text = raw.trim_start();
    let text = text.strip_prefix('+').unwrap_or(text);

    let (digits, radix) = if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        (hex, 16)
    } else if text.len() > 1 && text.starts_with('0') {
        (&text[1..], 8)
    } else {
        (text, 10)
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    // Too many digits for u64: strtoul clamps to ULONG_MAX, which is out of range anyway.
    Some(u64::from_str_radix(digits, radix).unwrap_or(u64::MAX))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ports: &[u16]) -> StubPortSpec {
        StubPortSpec::ExplicitSet(ports.iter().copied().collect())
    }

    #[test]
    fn test_parse_port_value_accepts_decimal() {
        assert_eq!(parse_port_value("6000"), Ok(6000));
    }

    #[test]
    fn test_parse_port_value_accepts_hex_and_octal() {
        assert_eq!(parse_port_value("0x1770"), Ok(6000));
        assert_eq!(parse_port_value("013560"), Ok(6000));
    }

    #[test]
    fn test_parse_port_value_accepts_window_bounds() {
        assert_eq!(parse_port_value(&LOW_PORT.to_string()), Ok(LOW_PORT));
        assert_eq!(parse_port_value(&HIGH_PORT.to_string()), Ok(HIGH_PORT));
    }

    #[test]
    fn test_parse_port_value_rejects_trailing_garbage() {
        assert_eq!(
            parse_port_value("6000abc"),
            Err(PortValueError::NotNumeric("6000abc".to_string()))
        );
    }

    #[test]
    fn test_parse_port_value_rejects_empty_and_bare_prefix() {
        assert!(matches!(parse_port_value(""), Err(PortValueError::NotNumeric(_))));
        assert!(matches!(parse_port_value("0x"), Err(PortValueError::NotNumeric(_))));
    }

    #[test]
    fn test_parse_port_value_rejects_values_outside_window() {
        assert_eq!(
            parse_port_value("70000"),
            Err(PortValueError::OutOfRange { value: 70000 })
        );
        assert_eq!(
            parse_port_value("80"),
            Err(PortValueError::OutOfRange { value: 80 })
        );
    }

    #[test]
    fn test_parse_port_value_huge_number_is_out_of_range() {
        let result = parse_port_value("99999999999999999999999");
        assert!(matches!(result, Err(PortValueError::OutOfRange { .. })));
    }

    #[test]
    fn test_configure_fixed_offset_stores_offset() {
        let mut ports = PortAllocator::new();
        ports.configure(StubPortSpec::FixedOffset(2000)).unwrap();
        assert_eq!(ports.offset(), Some(2000));
        assert!(ports.map().is_empty());
    }

    #[test]
    fn test_configure_fixed_offset_below_window_fails() {
        let mut ports = PortAllocator::new();
        let result = ports.configure(StubPortSpec::FixedOffset(100));
        assert_eq!(
            result,
            Err(PortError::InvalidPortValue(PortValueError::OutOfRange {
                value: 100
            }))
        );
        assert_eq!(ports.offset(), None);
    }

    #[test]
    fn test_configure_explicit_set_adds_unassigned_entries() {
        let mut ports = PortAllocator::new();
        ports.configure(set(&[6000, 6004])).unwrap();
        assert_eq!(ports.map().len(), 2);
        assert!(ports.map().is_unassigned(6000));
        assert!(ports.map().is_unassigned(6004));
    }

    #[test]
    fn test_configure_explicit_set_is_all_or_nothing() {
        let mut ports = PortAllocator::new();
        let result = ports.configure(set(&[6000, 65000]));
        assert!(matches!(result, Err(PortError::InvalidPortValue(_))));
        assert!(ports.map().is_empty(), "no entry may be stored on failure");
    }

    #[test]
    fn test_configure_range_is_half_open() {
        let mut ports = PortAllocator::new();
        ports
            .configure(StubPortSpec::Range {
                low: 6000,
                high: 6003,
            })
            .unwrap();
        assert_eq!(
            ports.map().ports().collect::<Vec<_>>(),
            vec![6000, 6001, 6002]
        );
    }

    #[test]
    fn test_configure_equal_range_bounds_adds_nothing() {
        let mut ports = PortAllocator::new();
        ports
            .configure(StubPortSpec::Range {
                low: 6000,
                high: 6000,
            })
            .unwrap();
        assert!(ports.map().is_empty());
    }

    #[test]
    fn test_configure_inverted_range_fails() {
        let mut ports = PortAllocator::new();
        let result = ports.configure(StubPortSpec::Range {
            low: 6003,
            high: 6000,
        });
        assert_eq!(
            result,
            Err(PortError::InvalidPortRange {
                low: 6003,
                high: 6000
            })
        );
    }

    #[test]
    fn test_offset_and_map_coexist() {
        let mut ports = PortAllocator::new();
        ports.configure(StubPortSpec::FixedOffset(1500)).unwrap();
        ports.configure(set(&[7000])).unwrap();
        ports
            .configure(StubPortSpec::Range {
                low: 6000,
                high: 6002,
            })
            .unwrap();
        assert_eq!(ports.offset(), Some(1500));
        assert_eq!(
            ports.map().ports().collect::<Vec<_>>(),
            vec![6000, 6001, 7000]
        );
    }

    #[test]
    fn test_unset_leaves_allocator_unconfigured() {
        let mut ports = PortAllocator::new();
        ports.configure(StubPortSpec::Unset).unwrap();
        assert!(ports.is_unconfigured());
    }

    #[test]
    fn test_context_is_an_independent_copy() {
        let mut ports = PortAllocator::new();
        ports.configure(set(&[6000])).unwrap();
        let mut context = ports.context();
        context.next_stub_port(5000, uuid::Uuid::new_v4());
        assert!(
            ports.map().is_unassigned(6000),
            "claims in a context must not leak back into the broker map"
        );
    }
}
