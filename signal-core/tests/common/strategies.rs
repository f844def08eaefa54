// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Proptest Strategies
//!
//! Reusable proptest strategies for property-based testing.

use proptest::prelude::*;

/// Strategy for a contiguous run `1..=n` delivered in random order, with
/// some sequences repeated.
///
/// Yields `(n, arrivals)`.
pub fn shuffled_run_strategy() -> impl Strategy<Value = (i64, Vec<i64>)> {
    (1i64..40).prop_flat_map(|n| {
        (Just(n), proptest::collection::vec(1..=n, 0..10)).prop_flat_map(|(n, repeats)| {
            let mut arrivals: Vec<i64> = (1..=n).collect();
            arrivals.extend(repeats);
            (Just(n), Just(arrivals).prop_shuffle())
        })
    })
}
