use std::fmt;

/// Monotonic tag identifying a point in the work submitted to one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Serial(u64);

impl Serial {
    pub const ZERO: Serial = Serial(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Queue serial clock owned by a context.
///
/// `current()` tags the work being recorded right now. `submit()` closes that
/// batch and opens the next one. `complete()` is fed from fence polling and
/// only ever moves forward, never past the last submitted serial.
#[derive(Debug, Clone)]
pub struct SerialClock {
    current: Serial,
    last_submitted: Serial,
    last_completed: Serial,
}

impl Default for SerialClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialClock {
    pub fn new() -> Self {
        Self {
            current: Serial(1),
            last_submitted: Serial::ZERO,
            last_completed: Serial::ZERO,
        }
    }

    pub fn current(&self) -> Serial {
        self.current
    }

    pub fn last_submitted(&self) -> Serial {
        self.last_submitted
    }

    pub fn last_completed(&self) -> Serial {
        self.last_completed
    }

    /// True while work tagged with `serial` may still be executing.
    pub fn is_in_use(&self, serial: Serial) -> bool {
        serial > self.last_completed
    }

    /// Marks the current batch as submitted and returns its serial.
    pub fn submit(&mut self) -> Serial {
        let submitted = self.current;
        self.last_submitted = submitted;
        self.current = submitted.next();
        submitted
    }

    pub fn complete(&mut self, serial: Serial) {
        let serial = serial.min(self.last_submitted);
        if serial > self.last_completed {
            self.last_completed = serial;
        }
    }

    /// Everything submitted so far is done.
    pub fn complete_all(&mut self) {
        self.last_completed = self.last_submitted;
    }
}

/// The serial of the last command stream that referenced a resource.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceUse {
    serial: Serial,
}

impl ResourceUse {
    pub fn serial(&self) -> Serial {
        self.serial
    }

    pub fn update(&mut self, serial: Serial) {
        if serial > self.serial {
            self.serial = serial;
        }
    }

    pub fn is_in_use(&self, clock: &SerialClock) -> bool {
        clock.is_in_use(self.serial)
    }
}
