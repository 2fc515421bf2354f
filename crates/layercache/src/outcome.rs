//! Value-or-error wrapper carried through every cache layer.
//!
//! Tiers, the executor and the orchestrator all return [`Outcome<T>`]. Unlike a
//! bare `Result`, an outcome always has a value: failures and misses carry the
//! zero value of `T`, and `del` can report a tolerated error while still
//! handing back the value it removed.

use crate::error::{CacheError, CacheResult};

/// The outcome of a cache operation.
#[derive(Debug, Clone)]
pub struct Outcome<T> {
    data: T,
    error: Option<CacheError>,
}

impl<T: Default> Outcome<T> {
    /// A successful outcome carrying `data`.
    pub fn success(data: T) -> Self {
        Self { data, error: None }
    }

    /// A failed outcome; the data is the zero value.
    pub fn failure(error: CacheError) -> Self {
        Self {
            data: T::default(),
            error: Some(error),
        }
    }

    /// A successful outcome carrying the zero value.
    pub fn miss() -> Self {
        Self::success(T::default())
    }
}

impl<T> Outcome<T> {
    /// Borrow the carried value.
    pub fn data(&self) -> &T {
        &self.data
    }

    /// Take the carried value, discarding any error.
    pub fn into_data(self) -> T {
        self.data
    }

    /// Replace the carried value, keeping the error state.
    pub fn set_data(&mut self, data: T) {
        self.data = data;
    }

    pub fn err(&self) -> Option<&CacheError> {
        self.error.as_ref()
    }

    pub fn set_err(&mut self, error: Option<CacheError>) {
        self.error = error;
    }

    /// `true` when no error is attached.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Convert into a standard `Result`, dropping the data on failure.
    pub fn into_result(self) -> CacheResult<T> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.data),
        }
    }
}

impl<T: Default> Default for Outcome<T> {
    fn default() -> Self {
        Self::miss()
    }
}

impl<T: Default> From<CacheResult<T>> for Outcome<T> {
    fn from(result: CacheResult<T>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(err) => Self::failure(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_carries_zero_value() {
        let outcome: Outcome<String> = Outcome::failure(CacheError::Loader("nope".into()));
        assert!(!outcome.is_ok());
        assert_eq!(outcome.data(), "");
        assert!(matches!(outcome.err(), Some(CacheError::Loader(_))));
    }

    #[test]
    fn test_set_data_keeps_error() {
        let mut outcome: Outcome<u32> = Outcome::failure(CacheError::Config("bad".into()));
        outcome.set_data(7);
        assert_eq!(*outcome.data(), 7);
        assert!(outcome.into_result().is_err());
    }

    #[test]
    fn test_from_result() {
        let ok: Outcome<u32> = Ok(3).into();
        assert_eq!(ok.into_result().ok(), Some(3));

        let err: Outcome<u32> = Err(CacheError::Serialization("eof".into())).into();
        assert_eq!(*err.data(), 0);
    }

    #[test]
    fn test_default_is_miss() {
        let outcome: Outcome<Vec<u8>> = Outcome::default();
        assert!(outcome.is_ok());
        assert!(outcome.data().is_empty());
    }
}
