//! Integration tests for stub-port configuration.
//!
//! These exercise `PortAllocator` through the public API the same way the
//! server crate does when it turns command-line options into a broker
//! configuration.  They sweep the whole `u16` space where the property is
//! about "every value", rather than sampling a few.

use std::collections::BTreeSet;

use debug_platform_core::{
    parse_port_value, PortAllocator, PortError, PortValueError, StubPort, StubPortSpec,
    HIGH_PORT, LOW_PORT,
};
use uuid::Uuid;

// ── Value validation ──────────────────────────────────────────────────────────

/// `configure` succeeds exactly for ports inside `[LOW_PORT, HIGH_PORT]`.
#[test]
fn test_offset_accepted_iff_inside_window() {
    for port in 0..=u16::MAX {
        let mut allocator = PortAllocator::new();
        let result = allocator.configure(StubPortSpec::FixedOffset(port));
        let inside = (LOW_PORT..=HIGH_PORT).contains(&port);

        assert_eq!(result.is_ok(), inside, "port {port}");
        if !inside {
            assert!(matches!(result, Err(PortError::InvalidPortValue(_))));
        }
    }
}

#[test]
fn test_explicit_port_accepted_iff_inside_window() {
    for port in (0..=u16::MAX).step_by(7) {
        let mut allocator = PortAllocator::new();
        let result = allocator.configure(StubPortSpec::ExplicitSet(BTreeSet::from([port])));
        assert_eq!(
            result.is_ok(),
            (LOW_PORT..=HIGH_PORT).contains(&port),
            "port {port}"
        );
    }
}

#[test]
fn test_parse_rejects_offset_above_high_port() {
    assert_eq!(
        parse_port_value("70000"),
        Err(PortValueError::OutOfRange { value: 70000 })
    );
}

// ── Range expansion ───────────────────────────────────────────────────────────

/// For `min < max` the map gains exactly `max - min` unassigned entries; for
/// `min == max` it gains none; for `min > max` configuration fails.
#[test]
fn test_range_entry_count_matches_bounds() {
    let bounds = [6000u16, 6001, 6003, 6010, 7000];
    for &low in &bounds {
        for &high in &bounds {
            let mut allocator = PortAllocator::new();
            let result = allocator.configure(StubPortSpec::Range { low, high });

            if low > high {
                assert_eq!(result, Err(PortError::InvalidPortRange { low, high }));
                assert!(allocator.map().is_empty());
            } else {
                assert!(result.is_ok());
                assert_eq!(allocator.map().len(), usize::from(high - low));
                assert_eq!(allocator.map().unassigned_count(), allocator.map().len());
            }
        }
    }
}

#[test]
fn test_range_6000_to_6003_excludes_upper_bound() {
    let mut allocator = PortAllocator::new();
    allocator
        .configure(StubPortSpec::Range {
            low: 6000,
            high: 6003,
        })
        .expect("valid range");

    let ports: Vec<u16> = allocator.map().ports().collect();
    assert_eq!(ports, vec![6000, 6001, 6002]);
    assert!(!allocator.map().contains(6003));
}

// ── Engine-facing context ─────────────────────────────────────────────────────

/// Every claim from a context lands on a configured port, and the context
/// runs dry after exactly as many claims as there are ports.
#[test]
fn test_context_hands_out_each_mapped_port_once() {
    let mut allocator = PortAllocator::new();
    allocator
        .configure(StubPortSpec::Range {
            low: 6000,
            high: 6005,
        })
        .unwrap();
    let mut context = allocator.context();

    let mut handed_out = BTreeSet::new();
    while let Some(StubPort::Assigned(port)) = context.next_stub_port(5000, Uuid::new_v4()) {
        assert!(handed_out.insert(port), "port {port} handed out twice");
    }

    assert_eq!(handed_out, allocator.map().ports().collect::<BTreeSet<_>>());
    assert_eq!(allocator.map().unassigned_count(), 5, "broker map untouched");
}
