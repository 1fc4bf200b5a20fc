//! Internal testing utilities for the structinfo crates.

use std::fmt::Debug;
use std::panic::{RefUnwindSafe, UnwindSafe};

/// Table-driven test runner.
///
/// Each case in a collection is run through a test closure. Panics are caught
/// so that every case is evaluated, and the run fails at the end with the
/// number of failing cases and their debug representations.
///
/// The usual pattern is a local `Case` struct deriving `Debug`, an array of
/// cases named `cases` and a call to [`test_each`](TestCases::test_each).
///
/// ## Example
///
/// ```
/// use structinfo_testing::TestCases;
///
/// // Add #[test] attribute
/// fn test_output_size() {
///   #[derive(Debug)]
///   struct Case {
///     input: i64,
///     kernel: i64,
///     expected: i64,
///   }
///
///   let cases = [
///     Case { input: 28, kernel: 3, expected: 26 },
///     Case { input: 28, kernel: 1, expected: 28 },
///   ];
///
///   cases.test_each(|&Case { input, kernel, expected }| {
///     assert_eq!(input - kernel + 1, expected);
///   });
/// }
/// # test_output_size();
/// ```
///
/// ## Passing cases by reference vs. value
///
/// `test_each` lends each case to the closure so it can still be printed if
/// the closure panics. Use `test_each_clone` or `test_each_value` when the
/// closure needs to own the case.
///
/// ## Unwind safety
///
/// Cases and the values captured by the closure must be
/// [unwind safe](https://doc.rust-lang.org/std/panic/fn.catch_unwind.html).
/// Types with interior mutability, such as a builder holding a cache, should
/// be created inside the closure rather than captured, or wrapped with
/// [`AssertUnwindSafe`](std::panic::AssertUnwindSafe).
pub trait TestCases {
    /// The data for a single test case.
    type Case;

    /// Run `test` with a reference to each case, catching panics.
    ///
    /// Panics after all cases have run if any of them failed.
    fn test_each(self, test: impl Fn(&Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe;

    /// Variant of [`test_each`](TestCases::test_each) which passes a clone of
    /// each case to the test function.
    fn test_each_clone(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + Clone + UnwindSafe;

    /// Variant of [`test_each`](TestCases::test_each) which passes each case
    /// by value.
    ///
    /// Cases are formatted before the test function runs, so that failures
    /// can still be reported after the case has been moved.
    fn test_each_value(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + UnwindSafe;
}

/// Panic with a summary of failing cases, if there are any.
fn check_failures<T: Debug>(failures: &[T]) {
    assert!(
        failures.is_empty(),
        "{} test cases failed: {:?}",
        failures.len(),
        failures
    );
}

impl<I: IntoIterator> TestCases for I {
    type Case = I::Item;

    fn test_each(self, test: impl Fn(&I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe,
    {
        let failures: Vec<_> = self
            .into_iter()
            .filter(|case| std::panic::catch_unwind(|| test(case)).is_err())
            .collect();
        check_failures(&failures);
    }

    fn test_each_clone(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        Self::Case: Clone + Debug + UnwindSafe,
    {
        let test = &test;
        let failures: Vec<_> = self
            .into_iter()
            .filter(|case| {
                let value = case.clone();
                std::panic::catch_unwind(move || test(value)).is_err()
            })
            .collect();
        check_failures(&failures);
    }

    fn test_each_value(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + UnwindSafe,
    {
        let test = &test;
        let failures: Vec<String> = self
            .into_iter()
            .filter_map(|case| {
                let case_str = format!("{:?}", case);
                std::panic::catch_unwind(move || test(case))
                    .is_err()
                    .then_some(case_str)
            })
            .collect();
        check_failures(&failures);
    }
}
