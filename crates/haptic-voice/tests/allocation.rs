//! Allocation behavior across the public API.
//!
//! These tests drive both policies through `NoteAllocator` the way a
//! session does: one registry, one allocator, commands collected per call.

use haptic_voice::{
    build_allocator, Allocation, AllocatorConfig, AllocatorPolicy, Command, DeviceChange,
    DeviceId, MotorRegistry, NoteAllocator, Occupancy,
};
use proptest::prelude::*;
use std::collections::HashSet;
use std::time::{Duration, Instant};

const C4: u8 = 60;
const E4: u8 = 64;
const G4: u8 = 67;
const C5: u8 = 72;

fn registry(motors_per_device: &[u8]) -> MotorRegistry {
    let mut registry = MotorRegistry::new();
    for (id, &count) in motors_per_device.iter().enumerate() {
        registry.attach_device(DeviceId(id as u32), count).unwrap();
    }
    registry
}

fn allocator(
    registry: &MotorRegistry,
    policy: AllocatorPolicy,
    tail: Duration,
) -> Box<dyn NoteAllocator> {
    build_allocator(
        registry,
        AllocatorConfig {
            policy,
            release_tail: tail,
            ..Default::default()
        },
    )
}

/// Every bound motor carries exactly the voice the allocator reports.
fn assert_consistent(registry: &MotorRegistry, alloc: &dyn NoteAllocator) {
    let voices = alloc.snapshot();
    let motors: HashSet<_> = voices.iter().map(|v| v.motor).collect();
    assert_eq!(motors.len(), voices.len(), "two voices share a motor");

    for voice in &voices {
        let motor = registry.get(voice.motor).expect("voice on unknown motor");
        assert_eq!(motor.occupancy(), Occupancy::Bound(voice.id));
    }
    let bound = registry.motors().iter().filter(|m| !m.is_free()).count();
    assert_eq!(bound, voices.len(), "motor bound without a voice");
}

// ---------------------------------------------------------------------------
// Polyphony
// ---------------------------------------------------------------------------

#[test]
fn test_fourth_note_steals_oldest() {
    let mut reg = registry(&[3]);
    let mut alloc = allocator(&reg, AllocatorPolicy::Polyphony, Duration::ZERO);
    let mut out = Vec::new();
    let t0 = Instant::now();

    for (i, note) in [C4, E4, G4].into_iter().enumerate() {
        let result = alloc.on_note_on(
            &mut reg,
            note,
            100,
            0,
            t0 + Duration::from_millis(i as u64),
            &mut out,
        );
        assert!(matches!(result, Allocation::Allocated { .. }));
    }

    let result = alloc.on_note_on(&mut reg, C5, 100, 0, t0 + Duration::from_millis(3), &mut out);
    assert!(matches!(result, Allocation::Stolen { stolen_voice_id: 1, .. }));

    let mut notes: Vec<u8> = alloc.snapshot().iter().map(|v| v.note).collect();
    notes.sort_unstable();
    assert_eq!(notes, vec![E4, G4, C5]);
    assert_consistent(&reg, alloc.as_ref());
}

#[test]
fn test_note_on_off_round_trip_within_tail() {
    let tail = Duration::from_millis(20);
    let mut reg = registry(&[2]);
    let mut alloc = allocator(&reg, AllocatorPolicy::Polyphony, tail);
    let mut out = Vec::new();
    let t0 = Instant::now();

    alloc.on_note_on(&mut reg, C4, 100, 3, t0, &mut out);
    alloc.on_note_off(&mut reg, C4, 3, t0, &mut out);
    alloc.tick(&mut reg, t0 + tail, &mut out);

    assert_eq!(reg.free_count(), 2);
    assert_eq!(alloc.voice_count(), 0);
    assert!(out.last().is_some_and(Command::is_silence));
}

#[test]
fn test_detach_mid_note_leaves_no_binding() {
    let mut reg = registry(&[2, 2]);
    let mut alloc = allocator(&reg, AllocatorPolicy::Polyphony, Duration::ZERO);
    let mut out = Vec::new();
    let now = Instant::now();

    for note in [C4, E4, G4] {
        alloc.on_note_on(&mut reg, note, 100, 0, now, &mut out);
    }
    alloc
        .on_device_change(&mut reg, DeviceChange::Detached(DeviceId(1)), &mut out)
        .unwrap();

    assert_eq!(alloc.voice_count(), 2);
    assert!(alloc.snapshot().iter().all(|v| v.note != G4));
    assert_consistent(&reg, alloc.as_ref());

    // Remaining pool still steals correctly
    alloc.on_note_on(&mut reg, C5, 100, 0, now, &mut out);
    assert_eq!(alloc.voice_count(), 2);
    assert_consistent(&reg, alloc.as_ref());
}

#[test]
fn test_attach_grows_pool() {
    let mut reg = registry(&[1]);
    let mut alloc = allocator(&reg, AllocatorPolicy::Polyphony, Duration::ZERO);
    let mut out = Vec::new();
    let now = Instant::now();

    alloc.on_note_on(&mut reg, C4, 100, 0, now, &mut out);
    alloc
        .on_device_change(
            &mut reg,
            DeviceChange::Attached {
                device: DeviceId(5),
                motors: 2,
            },
            &mut out,
        )
        .unwrap();

    let result = alloc.on_note_on(&mut reg, E4, 100, 0, now, &mut out);
    assert!(matches!(
        result,
        Allocation::Allocated { motor, .. } if motor.device == DeviceId(5)
    ));
    assert_eq!(alloc.voice_count(), 2);
}

#[test]
fn test_empty_registry_drops_notes() {
    let mut reg = MotorRegistry::new();
    let mut alloc = allocator(&reg, AllocatorPolicy::Polyphony, Duration::ZERO);
    let mut out = Vec::new();

    let result = alloc.on_note_on(&mut reg, C4, 100, 0, Instant::now(), &mut out);
    assert_eq!(result, Allocation::Dropped);
    assert!(out.is_empty());
}

// ---------------------------------------------------------------------------
// Single voice
// ---------------------------------------------------------------------------

#[test]
fn test_single_voice_retrigger_sounds_once() {
    let mut reg = registry(&[2]);
    let mut alloc = allocator(&reg, AllocatorPolicy::SingleVoice, Duration::ZERO);
    let mut out = Vec::new();
    let now = Instant::now();

    alloc.on_note_on(&mut reg, C4, 100, 1, now, &mut out);
    alloc.on_note_on(&mut reg, C5, 100, 1, now, &mut out);

    let voices = alloc.snapshot();
    assert_eq!(voices.len(), 1);
    assert_eq!(voices[0].note, C5);

    // Both commands hit the same motor; the last one wins
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].motor, out[1].motor);
    let c5_hz = out[1].frequency_hz;
    let sounding: Vec<_> = reg
        .motors()
        .iter()
        .filter(|m| !m.is_free())
        .map(|m| m.id())
        .collect();
    assert_eq!(sounding, vec![out[1].motor]);
    assert!((c5_hz - 523.251).abs() < 0.01);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Op {
    On { note: u8, velocity: u8, channel: u8 },
    Off { note: u8, channel: u8 },
    Tick,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u8..=127, 0u8..=127, 0u8..4).prop_map(|(note, velocity, channel)| Op::On {
            note,
            velocity,
            channel
        }),
        2 => (0u8..=127, 0u8..4).prop_map(|(note, channel)| Op::Off { note, channel }),
        1 => Just(Op::Tick),
    ]
}

proptest! {
    #[test]
    fn prop_voices_never_exceed_motors(
        devices in prop::collection::vec(1u8..=3, 1..4),
        ops in prop::collection::vec(op(), 1..200),
        single_voice in any::<bool>(),
    ) {
        let mut reg = registry(&devices);
        let policy = if single_voice {
            AllocatorPolicy::SingleVoice
        } else {
            AllocatorPolicy::Polyphony
        };
        let mut alloc = allocator(&reg, policy, Duration::from_millis(3));
        let total = reg.total_motor_count();
        let t0 = Instant::now();
        let mut out = Vec::new();

        for (i, op) in ops.into_iter().enumerate() {
            let now = t0 + Duration::from_millis(i as u64);
            match op {
                Op::On { note, velocity, channel } => {
                    alloc.on_note_on(&mut reg, note, velocity, channel, now, &mut out);
                }
                Op::Off { note, channel } => {
                    alloc.on_note_off(&mut reg, note, channel, now, &mut out);
                }
                Op::Tick => alloc.tick(&mut reg, now, &mut out),
            }
            prop_assert!(alloc.voice_count() <= total);
            assert_consistent(&reg, alloc.as_ref());
        }
    }

    #[test]
    fn prop_older_voice_always_stolen_first(
        first_velocity in 1u8..=127,
        second_velocity in 1u8..=127,
        gap_ms in 1u64..1000,
    ) {
        let mut reg = registry(&[2]);
        let mut alloc = allocator(&reg, AllocatorPolicy::Polyphony, Duration::ZERO);
        let mut out = Vec::new();
        let t0 = Instant::now();

        alloc.on_note_on(&mut reg, C4, first_velocity, 0, t0, &mut out);
        alloc.on_note_on(&mut reg, E4, second_velocity, 0, t0 + Duration::from_millis(gap_ms), &mut out);
        let result = alloc.on_note_on(&mut reg, G4, 100, 0, t0 + Duration::from_millis(gap_ms + 1), &mut out);

        let is_first_stolen = matches!(result, Allocation::Stolen { stolen_voice_id: 1, .. });
        prop_assert!(is_first_stolen);
    }
}
