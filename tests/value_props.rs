//! Value encoding properties.
//!
//! Every constructor of a tagged value decodes back to the same kind and
//! payload, numbers survive the trip through a context, and the saturating
//! int32 conversion clamps instead of wrapping.

use pocketjs::api::{
    js_get_property_str, js_new_float64, js_new_int32, js_new_int64, js_new_object,
    js_set_property_str, js_to_int32, js_to_int32_sat, js_to_number,
};
use pocketjs::conversion::js_to_int32_sat as to_int32_sat;
use pocketjs::jsvalue::{
    new_bool, new_catch_offset, new_short_func, new_short_int, new_string_char,
    JS_SHORTINT_MAX, JS_SHORTINT_MIN, JS_STRING_CHAR_MAX, JS_TAG_SPECIAL_BITS,
};
use pocketjs::{JSContext, JSValue, StdLibraryDef, ValueKind};
use proptest::prelude::*;

const SPECIAL_PAYLOAD_MAX: u32 = (1 << (32 - JS_TAG_SPECIAL_BITS)) - 1;

fn new_context() -> JSContext<'static> {
    JSContext::new_runtime(&StdLibraryDef::EMPTY, 64 * 1024).expect("context init")
}

/// Strategy for values that need no heap.
fn arb_immediate() -> impl Strategy<Value = (JSValue, ValueKind)> {
    prop_oneof![
        (JS_SHORTINT_MIN..=JS_SHORTINT_MAX).prop_map(|i| (new_short_int(i), ValueKind::Int(i))),
        any::<bool>().prop_map(|b| (new_bool(b), ValueKind::Bool(b))),
        (0..=JS_STRING_CHAR_MAX).prop_map(|c| (new_string_char(c), ValueKind::StringChar(c))),
        (0..=SPECIAL_PAYLOAD_MAX).prop_map(|i| (new_short_func(i), ValueKind::ShortFunc(i))),
        (0..=SPECIAL_PAYLOAD_MAX).prop_map(|pc| (new_catch_offset(pc), ValueKind::CatchOffset(pc))),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn immediate_values_decode_to_their_kind((val, kind) in arb_immediate()) {
        prop_assert_eq!(val.kind(), kind);
        prop_assert_eq!(JSValue::from_bits(val.bits()), val);
        prop_assert!(!val.is_ptr());
    }

    #[test]
    fn int32_round_trips_through_a_context(v in any::<i32>()) {
        let mut ctx = new_context();
        let val = js_new_int32(&mut ctx, v);
        prop_assert_eq!(val.is_int(), (JS_SHORTINT_MIN..=JS_SHORTINT_MAX).contains(&v));
        prop_assert_eq!(js_to_int32(&mut ctx, val), Some(v));
        prop_assert_eq!(js_to_number(&mut ctx, val), Some(v as f64));
    }

    #[test]
    fn int64_is_exact_up_to_2_53(v in -(1i64 << 53)..=(1i64 << 53)) {
        let mut ctx = new_context();
        let val = js_new_int64(&mut ctx, v);
        prop_assert_eq!(js_to_number(&mut ctx, val), Some(v as f64));
    }

    #[test]
    fn float_bits_survive_boxing(d in any::<f64>().prop_filter("not NaN", |d| !d.is_nan())) {
        let mut ctx = new_context();
        let val = js_new_float64(&mut ctx, d);
        let back = js_to_number(&mut ctx, val).unwrap();
        prop_assert_eq!(back.to_bits(), d.to_bits());
    }

    #[test]
    fn int32_sat_clamps(d in any::<f64>()) {
        let expected = if d.is_nan() {
            0
        } else if d >= i32::MAX as f64 {
            i32::MAX
        } else if d <= i32::MIN as f64 {
            i32::MIN
        } else {
            d.trunc() as i32
        };
        prop_assert_eq!(to_int32_sat(d), expected);
        let mut ctx = new_context();
        let val = js_new_float64(&mut ctx, d);
        prop_assert_eq!(js_to_int32_sat(&mut ctx, val), Some(expected));
    }

    #[test]
    fn properties_hold_any_immediate(name in "[a-z]{1,8}", (val, _) in arb_immediate()) {
        let mut ctx = new_context();
        let obj = js_new_object(&mut ctx);
        prop_assert_eq!(js_set_property_str(&mut ctx, obj, &name, val), pocketjs::JS_UNDEFINED);
        prop_assert_eq!(js_get_property_str(&mut ctx, obj, &name), val);
    }
}

#[test]
fn saturation_of_huge_values() {
    let mut ctx = new_context();
    let val = js_new_float64(&mut ctx, 1e300);
    assert_eq!(js_to_int32_sat(&mut ctx, val), Some(i32::MAX));
    assert_eq!(js_to_int32(&mut ctx, val), Some(0));
}
