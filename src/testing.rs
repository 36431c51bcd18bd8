//! Helpers for unit tests.

/// Global constructor that will run before tests.
#[ctor::ctor]
fn ctor() {
	use tracing_subscriber::fmt::format::FmtSpan;
	use tracing_subscriber::EnvFilter;

	let _ = tracing_subscriber::fmt()
		.compact()
		.with_file(true)
		.with_level(true)
		.with_line_number(true)
		.with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
		.with_target(true)
		.with_test_writer()
		.with_thread_names(true)
		.with_env_filter(EnvFilter::from_default_env())
		.try_init();
}

/// Wrapper over std's `assert!()` macro that uses [`anyhow::ensure!()`] instead.
macro_rules! assert {
	($($t:tt)*) => {
		::anyhow::ensure!($($t)*)
	};
}

pub(crate) use assert;

/// Wrapper over std's `assert_eq!()` macro that uses [`anyhow::ensure!()`] instead.
macro_rules! assert_eq {
	($left:expr, $right:expr $(,)?) => {
		match (&$left, &$right) {
			(left, right) => {
				if *left != *right {
					::anyhow::bail!(
						"assertion `left == right` failed\n  left: {:?}\n right: {:?}",
						left,
						right,
					);
				}
			}
		}
	};
	($left:expr, $right:expr, $($t:tt)*) => {
		match (&$left, &$right) {
			(left, right) => ::anyhow::ensure!(*left == *right, $($t)*),
		}
	};
}

pub(crate) use assert_eq;

/// Wrapper over std's `assert_ne!()` macro that uses [`anyhow::ensure!()`] instead.
macro_rules! assert_ne {
	($left:expr, $right:expr $(,)?) => {
		match (&$left, &$right) {
			(left, right) => {
				if *left == *right {
					::anyhow::bail!(
						"assertion `left != right` failed\n  left: {:?}\n right: {:?}",
						left,
						right,
					);
				}
			}
		}
	};
}

pub(crate) use assert_ne;

/// Wrapper over std's `assert_matches!()` macro that uses [`anyhow::ensure!()`] instead.
macro_rules! assert_matches {
	($expr:expr, $pat:pat $(if $cond:expr)? $(,)?) => {
		::anyhow::ensure!(
			matches!($expr, $pat $(if $cond)?),
			"assertion `{}` does not match `{}` failed",
			stringify!($expr),
			stringify!($pat $(if $cond)?),
		)
	};
}

pub(crate) use assert_matches;
