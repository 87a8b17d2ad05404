//! Shared helpers for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use kvdeck::{Context, DataStore, EnumerateRequest, Error, RawEntry, Result, StoreConfig};
use parking_lot::Mutex;

/// One raw call as seen by [`RecordingStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Get {
        key: Vec<u8>,
        required: bool,
    },
    Set {
        key: Vec<u8>,
        value: Vec<u8>,
        ttl: u64,
    },
    CompareAndSet {
        key: Vec<u8>,
        value: Vec<u8>,
        ttl: u64,
        version: i64,
    },
    Increment {
        key: Vec<u8>,
        initial: i64,
        delta: i64,
        ttl: u64,
    },
    Touch {
        key: Vec<u8>,
        ttl: u64,
    },
    Remove {
        key: Vec<u8>,
    },
    Enumerate(EnumerateRequest),
}

/// Engine that records every raw call and answers from canned data.
pub struct RecordingStore {
    config: StoreConfig,
    calls: Mutex<Vec<Call>>,
    entry: Mutex<Option<RawEntry>>,
    entries: Mutex<Vec<RawEntry>>,
    failure: Mutex<Option<Error>>,
    cas_result: bool,
    increment_result: i64,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::new("recording"))
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            config,
            calls: Mutex::new(Vec::new()),
            entry: Mutex::new(None),
            entries: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            cas_result: true,
            increment_result: 0,
        }
    }

    /// Answer gets with `entry`.
    pub fn returning(self, entry: RawEntry) -> Self {
        *self.entry.lock() = Some(entry);
        self
    }

    /// Answer enumerations with `entries`, in order.
    pub fn enumerating(self, entries: Vec<RawEntry>) -> Self {
        *self.entries.lock() = entries;
        self
    }

    /// Fail the next raw call with `err`.
    pub fn failing(self, err: Error) -> Self {
        *self.failure.lock() = Some(err);
        self
    }

    pub fn with_increment_result(mut self, previous: i64) -> Self {
        self.increment_result = previous;
        self
    }

    pub fn with_cas_result(mut self, swapped: bool) -> Self {
        self.cas_result = swapped;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// The one raw call made so far; panics on any other count.
    pub fn single_call(&self) -> Call {
        let calls = self.calls();
        assert_eq!(calls.len(), 1, "expected exactly one raw call, got {calls:?}");
        calls.into_iter().next().unwrap()
    }

    fn record(&self, call: Call) -> Result<()> {
        self.calls.lock().push(call);
        match self.failure.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// A raw entry with the given key and value.
pub fn entry(key: &str, value: impl Into<Vec<u8>>) -> RawEntry {
    RawEntry {
        key: key.as_bytes().to_vec(),
        value: value.into(),
        ttl: 0,
        version: 1,
    }
}

#[async_trait]
impl DataStore for RecordingStore {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn config(&self) -> &StoreConfig {
        &self.config
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn get_raw(&self, _ctx: &Context, key: &[u8], required: bool) -> Result<Option<RawEntry>> {
        self.record(Call::Get {
            key: key.to_vec(),
            required,
        })?;
        match self.entry.lock().clone() {
            None if required => Err(Error::NotFound),
            entry => Ok(entry),
        }
    }

    async fn set_raw(&self, _ctx: &Context, key: &[u8], value: Vec<u8>, ttl: u64) -> Result<()> {
        self.record(Call::Set {
            key: key.to_vec(),
            value,
            ttl,
        })
    }

    async fn compare_and_set_raw(
        &self,
        _ctx: &Context,
        key: &[u8],
        value: Vec<u8>,
        ttl: u64,
        version: i64,
    ) -> Result<bool> {
        self.record(Call::CompareAndSet {
            key: key.to_vec(),
            value,
            ttl,
            version,
        })?;
        Ok(self.cas_result)
    }

    async fn increment_raw(
        &self,
        _ctx: &Context,
        key: &[u8],
        initial: i64,
        delta: i64,
        ttl: u64,
    ) -> Result<i64> {
        self.record(Call::Increment {
            key: key.to_vec(),
            initial,
            delta,
            ttl,
        })?;
        Ok(self.increment_result)
    }

    async fn touch_raw(&self, _ctx: &Context, key: &[u8], ttl: u64) -> Result<()> {
        self.record(Call::Touch {
            key: key.to_vec(),
            ttl,
        })
    }

    async fn remove_raw(&self, _ctx: &Context, key: &[u8]) -> Result<()> {
        self.record(Call::Remove { key: key.to_vec() })
    }

    async fn enumerate_raw(
        &self,
        _ctx: &Context,
        request: &EnumerateRequest,
        callback: &mut (dyn FnMut(RawEntry) -> bool + Send),
    ) -> Result<()> {
        // hand out entries before reporting a canned failure
        self.calls.lock().push(Call::Enumerate(request.clone()));
        let entries = self.entries.lock().clone();
        for entry in entries {
            if !callback(entry) {
                break;
            }
        }
        match self.failure.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
