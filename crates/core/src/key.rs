//! Null-key detection for [`crate::backend::CacheBackend::set`].
//!
//! Rust's type system already separates "no value" (`Option::None`,
//! `remove`) from "a present value" at the type level for most key types, so
//! the only place the C1 "null keys are rejected" invariant has teeth is for
//! key types that can themselves express absence — chiefly `Option<K>`.
//! Concrete key types used with the backends in this workspace implement
//! this trait to opt into that check; the default for a type that can never
//! be null is simply `false`.

/// Types usable as cache keys implement this so [`crate::backend::CacheBackend::set`]
/// can reject a null key with [`crate::error::Error::InvalidArgument`].
pub trait NullableKey {
    /// Returns `true` if this key value represents "no key" and must be
    /// rejected by `set`.
    fn is_null_key(&self) -> bool {
        false
    }
}

impl<T> NullableKey for Option<T> {
    fn is_null_key(&self) -> bool {
        self.is_none()
    }
}

macro_rules! impl_never_null {
    ($($ty:ty),* $(,)?) => {
        $(impl NullableKey for $ty {})*
    };
}

impl_never_null!(
    String, &str, bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize
);

/// Key types that can manufacture a fresh, guaranteed-unique value for use
/// as an availability self-test probe (see `MemoryBackend::is_available`
/// and `FileBackend::is_available`). Only implemented for key types where a
/// collision-free probe is cheap to construct.
pub trait ProbeKey: NullableKey {
    /// Produce a key value that is extremely unlikely to collide with any
    /// real key already stored in the backend.
    fn generate_probe() -> Self;
}

impl ProbeKey for String {
    fn generate_probe() -> Self {
        format!("__lattice_probe_{}", uuid::Uuid::new_v4())
    }
}
