//! Self-registration for pluggable implementations.

/// Ties an implementation to the name it is selected by in configuration.
///
/// Each pluggable module exposes a `Registry` type implementing this trait,
/// e.g. `"memory"` for `[storage.implementations.memory]`.
pub trait ImplementationRegistry {
	/// Configuration key naming this implementation.
	const NAME: &'static str;

	/// Factory signature defined by the owning module.
	type Factory;

	fn factory() -> Self::Factory;
}
