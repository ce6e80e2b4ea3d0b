//! Timeout wheels: one wheel per duration.
//!
//! Entries share the wheel's fixed duration and are appended at the tail, so
//! the list is always sorted by wake time and a single deadline (the head's)
//! is enough to drive the whole wheel. A zero-duration wheel doubles as the
//! deferred-task queue: entries linked with `wake_at = now` fire on the next
//! loop tick.
//!
//! The wheel itself is pure — callers pass `now` explicitly — and the
//! per-context driver task owns the actual timer (see
//! [`Context`](crate::server::context::Context)).

use std::time::Duration;

use tokio::time::Instant;

const NIL: usize = usize::MAX;

type TimeoutCb = Box<dyn FnOnce()>;

/// Handle to a linked entry; stale after the entry fires or is unlinked.
#[derive(Clone, Copy, Debug)]
pub struct TimeoutEntry {
    slot: usize,
    gen: u64,
}

struct Slot {
    gen: u64,
    wake_at: Instant,
    prev: usize,
    next: usize,
    cb: Option<TimeoutCb>,
}

pub struct Wheel {
    duration: Duration,
    slots: Vec<Slot>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    next_gen: u64,
    len: usize,
}

impl Wheel {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            slots: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            next_gen: 1,
            len: 0,
        }
    }

    #[inline]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends an entry waking at `now + duration`. The list stays sorted
    /// because every entry shares the same duration.
    pub fn link(&mut self, now: Instant, cb: TimeoutCb) -> TimeoutEntry {
        let gen = self.next_gen;
        self.next_gen += 1;

        let slot = match self.free.pop() {
            Some(i) => i,
            None => {
                self.slots.push(Slot {
                    gen: 0,
                    wake_at: now,
                    prev: NIL,
                    next: NIL,
                    cb: None,
                });
                self.slots.len() - 1
            }
        };

        {
            let s = &mut self.slots[slot];
            s.gen = gen;
            s.wake_at = now + self.duration;
            s.prev = self.tail;
            s.next = NIL;
            s.cb = Some(cb);
        }

        if self.tail == NIL {
            self.head = slot;
        } else {
            self.slots[self.tail].next = slot;
        }
        self.tail = slot;
        self.len += 1;

        TimeoutEntry { slot, gen }
    }

    /// Detaches an entry in O(1). Returns `false` if the handle is stale
    /// (already fired or unlinked).
    pub fn unlink(&mut self, entry: &TimeoutEntry) -> bool {
        if !self.is_linked(entry) {
            return false;
        }
        self.detach(entry.slot);
        self.slots[entry.slot].cb = None;
        self.free.push(entry.slot);
        true
    }

    #[inline]
    pub fn is_linked(&self, entry: &TimeoutEntry) -> bool {
        self.slots
            .get(entry.slot)
            .is_some_and(|s| s.gen == entry.gen && s.cb.is_some())
    }

    /// The head's wake time — the single underlying timer is armed to this.
    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        (self.head != NIL).then(|| self.slots[self.head].wake_at)
    }

    /// Detaches and returns the head's callback if it is due. Dispatch pops
    /// one entry at a time so callbacks may re-link onto any wheel; the
    /// caller re-reads the head afterwards simply by calling again.
    pub fn pop_due(&mut self, now: Instant) -> Option<TimeoutCb> {
        if self.head == NIL || self.slots[self.head].wake_at > now {
            return None;
        }
        let slot = self.head;
        self.detach(slot);
        let cb = self.slots[slot].cb.take();
        self.free.push(slot);
        cb
    }

    fn detach(&mut self, slot: usize) {
        let (prev, next) = {
            let s = &self.slots[slot];
            (s.prev, s.next)
        };
        if prev == NIL {
            self.head = next;
        } else {
            self.slots[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.slots[next].prev = prev;
        }
        self.len -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn wheel_of(ms: u64) -> Wheel {
        Wheel::new(Duration::from_millis(ms))
    }

    #[test]
    fn entries_fire_in_link_order() {
        let fired = Rc::new(RefCell::new(Vec::new()));
        let mut wheel = wheel_of(100);
        let t0 = Instant::now();

        for i in 0..3 {
            let fired = fired.clone();
            wheel.link(t0 + Duration::from_millis(i), Box::new(move || fired.borrow_mut().push(i)));
        }

        // Nothing is due before t0 + duration.
        assert!(wheel.pop_due(t0 + Duration::from_millis(99)).is_none());

        let late = t0 + Duration::from_millis(200);
        while let Some(cb) = wheel.pop_due(late) {
            cb();
        }
        assert_eq!(*fired.borrow(), vec![0, 1, 2]);
        assert!(wheel.is_empty());
    }

    #[test]
    fn unlink_is_o1_and_disarms_when_empty() {
        let mut wheel = wheel_of(50);
        let t0 = Instant::now();
        let a = wheel.link(t0, Box::new(|| {}));
        let b = wheel.link(t0, Box::new(|| {}));

        assert!(wheel.unlink(&a));
        assert!(!wheel.unlink(&a), "stale handle must not detach twice");
        assert_eq!(wheel.deadline(), Some(t0 + Duration::from_millis(50)));

        assert!(wheel.unlink(&b));
        assert_eq!(wheel.deadline(), None);
    }

    #[test]
    fn callback_may_relink_during_dispatch() {
        let wheel = Rc::new(RefCell::new(wheel_of(0)));
        let count = Rc::new(RefCell::new(0));
        let t0 = Instant::now();

        {
            let wheel2 = wheel.clone();
            let count2 = count.clone();
            wheel.borrow_mut().link(
                t0,
                Box::new(move || {
                    *count2.borrow_mut() += 1;
                    let count3 = count2.clone();
                    wheel2
                        .borrow_mut()
                        .link(t0, Box::new(move || *count3.borrow_mut() += 1));
                }),
            );
        }

        // Pop under a short borrow, invoke after releasing it; re-read the
        // head each round since the callback may have changed it.
        loop {
            let cb = wheel.borrow_mut().pop_due(t0);
            match cb {
                Some(cb) => cb(),
                None => break,
            }
        }
        assert_eq!(*count.borrow(), 2);
    }

    #[test]
    fn zero_duration_wheel_is_due_immediately() {
        let mut wheel = wheel_of(0);
        let t0 = Instant::now();
        wheel.link(t0, Box::new(|| {}));
        assert_eq!(wheel.deadline(), Some(t0));
        assert!(wheel.pop_due(t0).is_some());
    }

    #[test]
    fn slots_are_recycled() {
        let mut wheel = wheel_of(10);
        let t0 = Instant::now();
        for _ in 0..100 {
            let e = wheel.link(t0, Box::new(|| {}));
            assert!(wheel.unlink(&e));
        }
        assert!(wheel.slots.len() <= 2);
    }
}
