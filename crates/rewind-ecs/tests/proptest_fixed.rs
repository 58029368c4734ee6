//! Property tests for the fixed-point layer.

use proptest::prelude::*;
use rewind_ecs::fixed::{Fx, FxVec3};

fn small_fx() -> impl Strategy<Value = Fx> {
    (-1_000_000_000_000i64..1_000_000_000_000i64).prop_map(Fx::from_raw)
}

proptest! {
    #[test]
    fn integer_arithmetic_is_exact(a in -30_000i32..30_000, b in -30_000i32..30_000) {
        prop_assert_eq!(Fx::from_int(a) + Fx::from_int(b), Fx::from_int(a + b));
        prop_assert_eq!(Fx::from_int(a) * Fx::from_int(b), Fx::from_int(a * b));
    }

    #[test]
    fn multiplication_commutes(a in small_fx(), b in small_fx()) {
        prop_assert_eq!(a * b, b * a);
    }

    #[test]
    fn sqrt_is_a_floor(raw in 0i64..i64::MAX / 2) {
        let x = Fx::from_raw(raw);
        let r = x.sqrt();
        prop_assert!(r * r <= x);
        let next = r + Fx::EPSILON;
        // (r + eps)^2 overshoots x, up to the truncation of the product.
        prop_assert!(next * next + Fx::from_raw(2) >= x);
    }

    #[test]
    fn clamp_length_never_exceeds_limit(
        x in -100i32..100, y in -100i32..100, z in -100i32..100, limit in 1i32..50,
    ) {
        let v = FxVec3::new(Fx::from_int(x), Fx::from_int(y), Fx::from_int(z));
        let clamped = v.clamp_length(Fx::from_int(limit));
        prop_assert!(clamped.length() <= Fx::from_int(limit));
        if v.length() <= Fx::from_int(limit) {
            prop_assert_eq!(clamped, v);
        }
    }
}
