//! Short, human-typeable identifiers for assets and users.

use rand::Rng;

/// Values drawn per half: the range of three base-36 digits.
const HALF_RANGE: u32 = 36 * 36 * 36;
const HALF_LEN: usize = 3;

/// Generate a 6-character `[0-9a-z]` identifier.
///
/// Collisions are not checked here.
pub fn generate_id() -> String {
    let mut rng = rand::rng();
    let first = rng.random_range(0..HALF_RANGE);
    let second = rng.random_range(0..HALF_RANGE);
    let mut id = String::with_capacity(HALF_LEN * 2);
    push_base36(&mut id, first);
    push_base36(&mut id, second);
    id
}

/// Append `value` in lowercase base 36, zero-padded to three digits.
fn push_base36(out: &mut String, value: u32) {
    let mut digits = ['0'; HALF_LEN];
    let mut rest = value % HALF_RANGE;
    for slot in digits.iter_mut().rev() {
        // `from_digit` is infallible for digits below the radix.
        *slot = char::from_digit(rest % 36, 36).unwrap_or('0');
        rest /= 36;
    }
    out.extend(digits);
}
