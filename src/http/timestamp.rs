//! Cached wall-clock timestamp strings.
//!
//! Formatting an RFC1123 date for every request is measurable waste when a
//! busy loop handles thousands of requests per millisecond tick; the cache
//! formats once per loop-time change and hands out shared references.

use std::rc::Rc;
use std::time::SystemTime;

use chrono::{DateTime, Local, Utc};

/// `Sun, 06 Nov 1994 08:49:37 GMT`
pub const TIMESTR_RFC1123_LEN: usize = 29;
/// `29/Aug/2014:15:34:38 +0900`
pub const TIMESTR_LOG_LEN: usize = 26;

/// The two fixed-width ASCII renderings of one wall-clock instant.
pub struct TimestampStr {
    pub rfc1123: String,
    pub log: String,
}

impl TimestampStr {
    fn format(at: SystemTime) -> Self {
        let utc: DateTime<Utc> = at.into();
        let local: DateTime<Local> = at.into();
        let s = Self {
            rfc1123: utc.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
            log: local.format("%d/%b/%Y:%H:%M:%S %z").to_string(),
        };
        debug_assert_eq!(s.rfc1123.len(), TIMESTR_RFC1123_LEN);
        debug_assert_eq!(s.log.len(), TIMESTR_LOG_LEN);
        s
    }
}

/// A wall-clock sample plus its shared formatted strings.
#[derive(Clone)]
pub struct Timestamp {
    pub at: SystemTime,
    pub str: Rc<TimestampStr>,
}

/// Per-context cache keyed on the loop's millisecond clock.
#[derive(Default)]
pub(crate) struct TimestampCache {
    loop_ms_at: Option<u64>,
    value: Option<Timestamp>,
}

impl TimestampCache {
    /// Returns the cached timestamp when the loop clock has not moved since
    /// the last call, formatting fresh strings otherwise.
    pub(crate) fn get(&mut self, loop_ms: u64) -> Timestamp {
        if self.loop_ms_at == Some(loop_ms) {
            if let Some(ts) = &self.value {
                return ts.clone();
            }
        }
        let at = SystemTime::now();
        let ts = Timestamp {
            at,
            str: Rc::new(TimestampStr::format(at)),
        };
        self.loop_ms_at = Some(loop_ms);
        self.value = Some(ts.clone());
        ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_widths() {
        let s = TimestampStr::format(SystemTime::UNIX_EPOCH);
        assert_eq!(s.rfc1123.len(), TIMESTR_RFC1123_LEN);
        assert_eq!(s.rfc1123, "Thu, 01 Jan 1970 00:00:00 GMT");
        assert_eq!(s.log.len(), TIMESTR_LOG_LEN);
    }

    #[test]
    fn same_tick_reuses_the_same_strings() {
        let mut cache = TimestampCache::default();
        let a = cache.get(42);
        let b = cache.get(42);
        assert!(Rc::ptr_eq(&a.str, &b.str));
        assert_eq!(a.str.rfc1123, b.str.rfc1123);
    }

    #[test]
    fn tick_change_reformats() {
        let mut cache = TimestampCache::default();
        let a = cache.get(1);
        let b = cache.get(2);
        assert!(!Rc::ptr_eq(&a.str, &b.str));
    }
}
