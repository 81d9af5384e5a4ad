use std::borrow::Borrow;
use std::fmt::{self, Write};
use std::sync::Arc;

use serde::{Serialize, Serializer};

/// The separator written in front of every part of a default [`CacheKey`].
pub const KEY_SEPARATOR: char = ':';

/// The key under which a cache entry is stored.
///
/// Keys are derived from the lookup parameter, either by the default [`KeyParts`] derivation or
/// by a custom key function given to the builder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    /// Creates a key from an already derived string.
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    /// Derives the default key for `param`.
    pub fn from_parts<P: KeyParts + ?Sized>(param: &P) -> Self {
        let mut builder = CacheKeyBuilder::default();
        param.write_key_parts(&mut builder);
        builder.build()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

impl Serialize for CacheKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// A builder for [`CacheKey`]s.
///
/// Every part is written with a leading [`KEY_SEPARATOR`], so `("user", 42)` becomes `:user:42`.
/// The builder also implements [`Write`](std::fmt::Write), which appends to the current part.
#[derive(Debug, Default)]
pub struct CacheKeyBuilder {
    key: String,
}

impl CacheKeyBuilder {
    /// Starts a new part and writes its string representation.
    pub fn push_part(&mut self, part: impl fmt::Display) {
        self.key.push(KEY_SEPARATOR);
        // writing into a `String` never fails
        let _ = write!(self.key, "{part}");
    }

    /// Finalize the [`CacheKey`].
    pub fn build(self) -> CacheKey {
        CacheKey::new(self.key)
    }
}

impl fmt::Write for CacheKeyBuilder {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.key.write_str(s)
    }
}

/// A lookup parameter that can be turned into a default [`CacheKey`].
///
/// Each "argument" of the parameter contributes one part. Tuples are the way to pass more than
/// one argument.
///
/// This must be deterministic: logically equal parameters have to write equal parts, otherwise
/// they will end up in different cache entries.
pub trait KeyParts {
    /// Writes all the parts of `self` into the `builder`.
    fn write_key_parts(&self, builder: &mut CacheKeyBuilder);
}

macro_rules! display_key_parts {
    ($($ty:ty),* $(,)?) => {
        $(
            impl KeyParts for $ty {
                fn write_key_parts(&self, builder: &mut CacheKeyBuilder) {
                    builder.push_part(self);
                }
            }
        )*
    };
}

display_key_parts!(
    str, String, char, bool, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize,
    f32, f64,
);

impl KeyParts for () {
    fn write_key_parts(&self, _builder: &mut CacheKeyBuilder) {}
}

impl<T: KeyParts + ?Sized> KeyParts for &T {
    fn write_key_parts(&self, builder: &mut CacheKeyBuilder) {
        (**self).write_key_parts(builder)
    }
}

impl<T: KeyParts + ?Sized> KeyParts for Box<T> {
    fn write_key_parts(&self, builder: &mut CacheKeyBuilder) {
        (**self).write_key_parts(builder)
    }
}

impl<T: KeyParts + ?Sized> KeyParts for Arc<T> {
    fn write_key_parts(&self, builder: &mut CacheKeyBuilder) {
        (**self).write_key_parts(builder)
    }
}

/// `None` is written as the literal `undefined` part, so it stays distinguishable from a
/// missing argument.
impl<T: KeyParts> KeyParts for Option<T> {
    fn write_key_parts(&self, builder: &mut CacheKeyBuilder) {
        match self {
            Some(value) => value.write_key_parts(builder),
            None => builder.push_part("undefined"),
        }
    }
}

impl<T: KeyParts> KeyParts for [T] {
    fn write_key_parts(&self, builder: &mut CacheKeyBuilder) {
        for part in self {
            part.write_key_parts(builder);
        }
    }
}

impl<T: KeyParts> KeyParts for Vec<T> {
    fn write_key_parts(&self, builder: &mut CacheKeyBuilder) {
        self.as_slice().write_key_parts(builder)
    }
}

macro_rules! tuple_key_parts {
    ($($name:ident),+) => {
        impl<$($name: KeyParts),+> KeyParts for ($($name,)+) {
            #[allow(non_snake_case)]
            fn write_key_parts(&self, builder: &mut CacheKeyBuilder) {
                let ($($name,)+) = self;
                $($name.write_key_parts(builder);)+
            }
        }
    };
}

tuple_key_parts!(A);
tuple_key_parts!(A, B);
tuple_key_parts!(A, B, C);
tuple_key_parts!(A, B, C, D);

/// A function deriving the [`CacheKey`] for a lookup parameter.
pub type KeyFn<P> = Arc<dyn Fn(&P) -> CacheKey + Send + Sync>;

/// The default [`KeyFn`], based on [`KeyParts`].
pub fn default_key_fn<P: KeyParts>() -> KeyFn<P> {
    Arc::new(|param: &P| CacheKey::from_parts(param))
}
