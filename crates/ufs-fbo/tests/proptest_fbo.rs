//! Property-based tests for ufs-fbo using proptest.
//!
//! These cover the codec, the range builder, and the state gating of the
//! control surface against the in-memory device.

use std::sync::Arc;

use proptest::prelude::*;
use ufs_fbo::{
    codec::{QUERY_ATTR_IDN_FBO_LEVEL_EXE, QUERY_ATTR_IDN_FBO_PROG_STATE},
    decode_capabilities, encode_descriptor, DeviceCapabilities, DeviceProfile, FboConfig,
    FboDescriptor, FboError, MockUfsDevice, ProgressState, RangeRequest, TransportCall, UfsHost,
    ValidationError,
};

/// Generator for descriptors satisfying min <= rec <= max and count >= 1.
fn any_valid_descriptor() -> impl Strategy<Value = FboDescriptor> {
    (any::<u32>(), any::<u32>(), any::<u32>())
        .prop_map(|(a, b, c)| {
            let mut sizes = [a, b, c];
            sizes.sort_unstable();
            sizes
        })
        .prop_flat_map(|[min, rec, max]| {
            (any::<u16>(), 1u8..=255u8, any::<u16>()).prop_map(
                move |(version, max_range_count, alignment)| FboDescriptor {
                    version,
                    rec_range_size: rec,
                    max_range_size: max,
                    min_range_size: min,
                    max_range_count,
                    alignment,
                },
            )
        })
}

fn any_state() -> impl Strategy<Value = ProgressState> {
    prop_oneof![
        Just(ProgressState::Idle),
        Just(ProgressState::Ongoing),
        Just(ProgressState::AnalysisComplete),
        Just(ProgressState::OptimizationComplete),
        Just(ProgressState::InternalError),
    ]
}

fn small_caps(max_count: u8) -> DeviceCapabilities {
    DeviceCapabilities::new(
        FboDescriptor {
            version: 0x0100,
            rec_range_size: 64,
            max_range_size: 4096,
            min_range_size: 16,
            max_range_count: max_count,
            alignment: 0,
        },
        0,
    )
}

fn host_for(profile: DeviceProfile) -> (Arc<MockUfsDevice>, UfsHost<MockUfsDevice>) {
    let device = Arc::new(MockUfsDevice::from_profile(profile));
    let mut host = UfsHost::new(device.clone(), FboConfig::default());
    host.probe_fbo(&device.device_descriptor()).unwrap();
    (device, host)
}

fn range_text(pairs: &[(u64, u64)]) -> String {
    pairs
        .iter()
        .flat_map(|(open, close)| [format!("{:x}", open), format!("{:X}", close)])
        .collect::<Vec<_>>()
        .join(",")
}

proptest! {
    /// Test: decoding a valid descriptor and re-encoding reproduces the bytes.
    #[test]
    fn test_descriptor_round_trip(desc in any_valid_descriptor()) {
        let raw = encode_descriptor(&desc);
        let decoded = decode_capabilities(&raw).unwrap();
        prop_assert_eq!(decoded, desc);
        prop_assert_eq!(encode_descriptor(&decoded), raw);
    }

    /// Test: every accepted list has an even token count within the range limit.
    #[test]
    fn test_accepted_lists_respect_count(
        tokens in proptest::collection::vec(0u64..0x1000, 1..12),
        max_count in 1u8..6,
    ) {
        let text = tokens
            .iter()
            .map(|t| format!("{:x}", t))
            .collect::<Vec<_>>()
            .join(",");
        let caps = small_caps(max_count);
        match RangeRequest::parse(&text, &caps) {
            Ok(request) => {
                prop_assert_eq!(tokens.len() % 2, 0);
                prop_assert!(tokens.len() / 2 <= max_count as usize);
                prop_assert_eq!(request.len(), tokens.len() / 2);
            }
            Err(ValidationError::OddTokenCount(n)) => prop_assert_eq!(n % 2, 1),
            Err(ValidationError::TooManyRanges { requested, max }) => {
                prop_assert!(requested > max)
            }
            Err(_) => {}
        }
        if tokens.len() == 1 || tokens.len() % 2 == 1 || tokens.len() / 2 > max_count as usize {
            prop_assert!(RangeRequest::parse(&text, &caps).is_err());
        }
    }

    /// Test: a pair is accepted iff it is ordered and its inclusive length is in bounds.
    #[test]
    fn test_pair_acceptance_matches_bounds(open in 0u64..0x10000, close in 0u64..0x10000) {
        let caps = small_caps(4);
        let result = RangeRequest::parse(&range_text(&[(open, close)]), &caps);
        let valid = close >= open && (16..=4096).contains(&(close - open + 1));
        prop_assert_eq!(result.is_ok(), valid);

        if let Ok(request) = &result {
            let range = request.ranges()[0];
            prop_assert_eq!(range.start_lba, open);
            prop_assert_eq!(range.close_lba(), close);

            let payload = request.to_payload(4096).unwrap();
            prop_assert_eq!(payload.len(), 20);
            prop_assert_eq!(&payload[12..16], &(open as u32).to_be_bytes()[..]);
            prop_assert_eq!(&payload[16..19], &range.length.to_be_bytes()[1..]);
        } else if close < open {
            let is_decreasing = matches!(
                result,
                Err(ValidationError::DecreasingRange { .. })
            );
            prop_assert!(is_decreasing);
        }
    }

    /// Test: range submission reaches the device only when it is idle.
    #[test]
    fn test_submit_gated_on_idle(state in any_state()) {
        let mut profile = DeviceProfile::default();
        profile.descriptor.min_range_size = 16;
        profile.descriptor.rec_range_size = 16;
        let (device, host) = host_for(profile);
        device.set_progress_state(state);
        device.clear_calls();

        let result = host.require_fbo().unwrap().submit_ranges("10,1F");
        let executed = device
            .calls()
            .iter()
            .any(|c| matches!(c, TransportCall::Execute { .. }));

        if state == ProgressState::Idle {
            prop_assert_eq!(result.unwrap(), 1);
            prop_assert!(executed);
        } else {
            let illegal = matches!(result, Err(FboError::IllegalState(s)) if s == state);
            prop_assert!(illegal);
            prop_assert!(!executed);
        }
        prop_assert_eq!(device.power_refs(), 0);
    }

    /// Test: out-of-range thresholds never touch the device; in-range ones are state gated.
    #[test]
    fn test_threshold_validation(value in 0u32..64, state in any_state()) {
        let (device, host) = host_for(DeviceProfile::default());
        device.set_progress_state(state);
        device.clear_calls();
        let fbo = host.require_fbo().unwrap();

        let result = fbo.set_threshold(value);
        if value > 10 {
            let rejected = matches!(
                result,
                Err(FboError::Validation(ValidationError::ThresholdOutOfRange(_)))
            );
            prop_assert!(rejected);
            prop_assert!(device.calls().is_empty());
        } else if matches!(state, ProgressState::Ongoing | ProgressState::InternalError) {
            let illegal = matches!(result, Err(FboError::IllegalState(_)));
            prop_assert!(illegal);
            prop_assert_eq!(device.attribute(QUERY_ATTR_IDN_FBO_LEVEL_EXE), Some(0));
        } else {
            prop_assert!(result.is_ok());
            prop_assert_eq!(fbo.get_threshold() as u32, value);
        }
    }
}

#[test]
fn test_probe_scenario_threshold_three() {
    let profile = DeviceProfile {
        descriptor: FboDescriptor {
            version: 0x0100,
            rec_range_size: 65536,
            max_range_size: 1048576,
            min_range_size: 4096,
            max_range_count: 4,
            alignment: 0,
        },
        exec_threshold: 3,
        ..Default::default()
    };
    let (_device, host) = host_for(profile);
    assert_eq!(host.require_fbo().unwrap().get_threshold(), 3);
}

#[test]
fn test_single_range_scenario() {
    let mut profile = DeviceProfile::default();
    profile.descriptor.min_range_size = 16;
    profile.descriptor.rec_range_size = 16;
    let (device, host) = host_for(profile);

    host.require_fbo().unwrap().submit_ranges("10,1F").unwrap();
    let payload = device.last_write().unwrap();
    assert_eq!(&payload[12..16], &[0x00, 0x00, 0x00, 0x10]);
    assert_eq!(&payload[16..19], &[0x00, 0x00, 0x10]);
}

#[test]
fn test_trailing_separator_scenario() {
    let (device, host) = host_for(DeviceProfile::default());
    device.clear_calls();

    let err = host.require_fbo().unwrap().submit_ranges("10,1F,").unwrap_err();
    assert!(matches!(err, FboError::Validation(ValidationError::Malformed(_))));
    assert!(device.calls().is_empty());
}

#[test]
fn test_unknown_state_scenario() {
    let (device, host) = host_for(DeviceProfile::default());
    device.set_attribute(QUERY_ATTR_IDN_FBO_PROG_STATE, 0x7);

    let err = host.require_fbo().unwrap().get_progress_state().unwrap_err();
    assert_eq!(err.to_string(), "Decode error: Unknown progress state 0x7");
}

#[test]
fn test_submit_while_ongoing_scenario() {
    let (device, host) = host_for(DeviceProfile::default());
    device.set_progress_state(ProgressState::Ongoing);
    device.clear_calls();

    let err = host.require_fbo().unwrap().submit_ranges("0,fff").unwrap_err();
    assert!(matches!(err, FboError::IllegalState(ProgressState::Ongoing)));
    assert_eq!(
        device.calls(),
        vec![TransportCall::ReadAttribute(QUERY_ATTR_IDN_FBO_PROG_STATE)]
    );
}
