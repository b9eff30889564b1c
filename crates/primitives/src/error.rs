use std::fmt;

/// A pair of values, one of which is expected and one of which is received.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GotExpected<T> {
    /// The received value.
    pub got: T,
    /// The expected value.
    pub expected: T,
}

impl<T: fmt::Display> fmt::Display for GotExpected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "got {}, expected {}", self.got, self.expected)
    }
}

impl<T: fmt::Debug + fmt::Display> std::error::Error for GotExpected<T> {}

impl<T> From<(T, T)> for GotExpected<T> {
    #[inline]
    fn from((got, expected): (T, T)) -> Self {
        Self { got, expected }
    }
}

/// A pair of values, one of which is expected and one of which is received,
/// boxed to keep large error variants small.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GotExpectedBoxed<T>(pub Box<GotExpected<T>>);

impl<T: fmt::Display> fmt::Display for GotExpectedBoxed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<T: fmt::Debug + fmt::Display> std::error::Error for GotExpectedBoxed<T> {}

impl<T> std::ops::Deref for GotExpectedBoxed<T> {
    type Target = GotExpected<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> From<(T, T)> for GotExpectedBoxed<T> {
    #[inline]
    fn from(value: (T, T)) -> Self {
        Self(Box::new(GotExpected::from(value)))
    }
}
