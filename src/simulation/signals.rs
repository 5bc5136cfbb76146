use std::fmt;

use crate::types::Timespan;

/// A synchronous fan-out callback list.
///
/// Emission iterates the registered slots in connection order on the calling
/// (driver) thread; there is no cross-thread delivery and slots must not
/// block. Cross-block notifications travel as messages, never as signals.
pub struct Signal<T = ()> {
    slots: Vec<Box<dyn FnMut(&T)>>,
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn connect(&mut self, slot: impl FnMut(&T) + 'static) {
        self.slots.push(Box::new(slot));
    }

    pub fn emit(&mut self, arg: &T) {
        for slot in &mut self.slots {
            slot(arg);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal").field("slots", &self.len()).finish()
    }
}

/// The driver's notification surface.
///
/// Per step the emission order is: `time_about_to_progress(arrival)`, clock
/// advance, `time(arrival)`, message dispatch, `step`.
#[derive(Debug, Default)]
pub struct SimulationSignals {
    pub start: Signal,
    pub step: Signal,
    pub stop: Signal,
    pub time: Signal<Timespan>,
    pub time_about_to_progress: Signal<Timespan>,
    pub agents_created: Signal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

    #[test]
    fn emission_follows_connection_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut signal: Signal<u32> = Signal::new();
        for label in ["a", "b", "c"] {
            let seen = Rc::clone(&seen);
            signal.connect(move |arg| seen.borrow_mut().push(format!("{label}{arg}")));
        }

        signal.emit(&1);
        signal.emit(&2);

        assert_eq!(
            *seen.borrow(),
            vec!["a1", "b1", "c1", "a2", "b2", "c2"]
        );
    }

    #[test]
    fn empty_signal_emits_to_no_one() {
        let mut signal: Signal = Signal::new();
        assert!(signal.is_empty());
        signal.emit(&());
    }
}
