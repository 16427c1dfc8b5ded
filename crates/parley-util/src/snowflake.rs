use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Custom epoch: 2025-01-01T00:00:00Z
const PARLEY_EPOCH: u64 = 1_735_689_600_000;

const SEQUENCE_BITS: u64 = 12;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Last issued `(millis since epoch << 12) | sequence`.
static STATE: AtomicU64 = AtomicU64::new(0);

/// Generate a Snowflake ID.
/// Format: 42 bits timestamp | 10 bits worker | 12 bits sequence
///
/// Ids from one process are strictly increasing. When the sequence runs out
/// within a millisecond, or the wall clock steps backwards, the timestamp
/// part is carried forward from the last issued id.
pub fn generate(worker_id: u16) -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let now = now.saturating_sub(PARLEY_EPOCH);

    let mut current = STATE.load(Ordering::Relaxed);
    let state = loop {
        let next = advance(current, now);
        match STATE.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => break next,
            Err(actual) => current = actual,
        }
    };

    let timestamp = state >> SEQUENCE_BITS;
    let seq = state & SEQUENCE_MASK;
    let id = (timestamp << 22) | ((worker_id as u64 & 0x3FF) << 12) | seq;
    id as i64
}

fn advance(state: u64, now: u64) -> u64 {
    let last = state >> SEQUENCE_BITS;
    if now > last {
        return now << SEQUENCE_BITS;
    }
    let seq = state & SEQUENCE_MASK;
    if seq == SEQUENCE_MASK {
        (last + 1) << SEQUENCE_BITS
    } else {
        state + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(state: u64) -> (u64, u64) {
        (state >> SEQUENCE_BITS, state & SEQUENCE_MASK)
    }

    #[test]
    fn ids_are_positive_and_distinct() {
        let a = generate(1);
        let b = generate(1);
        assert!(a > 0);
        assert_ne!(a, b);
    }

    #[test]
    fn sequence_resets_on_a_new_millisecond() {
        let state = (100 << SEQUENCE_BITS) | 7;
        assert_eq!(parts(advance(state, 101)), (101, 0));
        assert_eq!(parts(advance(state, 100)), (100, 8));
    }

    #[test]
    fn exhausted_sequence_borrows_the_next_millisecond() {
        let full = (100 << SEQUENCE_BITS) | SEQUENCE_MASK;
        let next = advance(full, 100);
        assert!(next > full);
        assert_eq!(parts(next), (101, 0));
    }

    #[test]
    fn clock_stepping_back_keeps_ids_increasing() {
        let state = (500 << SEQUENCE_BITS) | 3;
        let next = advance(state, 400);
        assert_eq!(parts(next), (500, 4));
    }

    #[test]
    fn ids_strictly_increase_across_sequence_wraps() {
        let mut previous = generate(1);
        for _ in 0..20_000 {
            let id = generate(1);
            assert!(id > previous, "id went backwards: {previous} then {id}");
            previous = id;
        }
    }
}
